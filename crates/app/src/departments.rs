use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use staffbook_core::types::{Department, Employee, EmployeeFilter};
use staffbook_core::validation::DepartmentDraft;

use crate::problem::ProblemResponse;
use crate::router::{parse_id, AppState};

const NOT_FOUND: &str = "department_not_found";

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Department>>, ProblemResponse> {
    Ok(Json(state.storage().departments().list().await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<DepartmentDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Department>), ProblemResponse> {
    let Json(draft) = payload?;
    let record = draft.validate_new()?;
    let department = state.storage().departments().insert(&record).await?;
    info!(stage = "api", department_id = department.id, "department created");
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Department>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    Ok(Json(state.storage().departments().fetch(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<DepartmentDraft>, JsonRejection>,
) -> Result<Json<Department>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    let Json(draft) = payload?;
    let patch = draft.validate_patch()?;
    Ok(Json(state.storage().departments().update(id, &patch).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    state.storage().departments().delete(id).await?;
    info!(stage = "api", department_id = id, "department deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn employees(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Vec<Employee>>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    if !state.storage().departments().exists(id).await? {
        return Err(ProblemResponse::not_found(NOT_FOUND, "department not found"));
    }
    let filter = EmployeeFilter {
        department_id: Some(id),
        ..EmployeeFilter::default()
    };
    Ok(Json(state.storage().employees().list(&filter).await?))
}
