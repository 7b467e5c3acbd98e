use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use staffbook_core::types::{Employee, EmployeeFilter, RecordId, TransactionRecord};
use staffbook_core::validation::{EmployeeDraft, TransactionDraft, ValidationErrors};
use staffbook_storage::EmployeeError;

use crate::problem::ProblemResponse;
use crate::router::{parse_id, query_value, AppState};

const NOT_FOUND: &str = "employee_not_found";

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeQuery {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    department_id: Option<String>,
}

impl EmployeeQuery {
    fn into_filter(self) -> Result<EmployeeFilter, ValidationErrors> {
        let department_id = match query_value(self.department_id) {
            Some(raw) => Some(raw.parse::<RecordId>().map_err(|_| {
                ValidationErrors::single("department_id", "Enter a whole number.")
            })?),
            None => None,
        };
        Ok(EmployeeFilter {
            name: query_value(self.name),
            department_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignManagerBody {
    #[serde(default)]
    manager_id: Option<RecordId>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<EmployeeQuery>,
) -> Result<Json<Vec<Employee>>, ProblemResponse> {
    let filter = query.into_filter()?;
    Ok(Json(state.storage().employees().list(&filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<EmployeeDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<Employee>), ProblemResponse> {
    let Json(draft) = payload?;
    let record = draft.validate_new()?;
    let employee = state.staffing().hire(&record).await?;
    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Employee>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    Ok(Json(state.storage().employees().fetch(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<EmployeeDraft>, JsonRejection>,
) -> Result<Json<Employee>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    let Json(draft) = payload?;
    let patch = draft.validate_patch(id)?;
    Ok(Json(state.staffing().update(id, &patch).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    state.storage().employees().delete(id).await?;
    info!(stage = "api", employee_id = id, "employee deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_manager(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<AssignManagerBody>, JsonRejection>,
) -> Result<Json<Employee>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    let Json(body) = payload?;
    let Some(manager_id) = body.manager_id else {
        ensure_exists(&state, id).await?;
        return Err(ValidationErrors::single("manager_id", "manager_id is required.").into());
    };
    Ok(Json(state.staffing().assign_manager(id, manager_id).await?))
}

/// Returns the manager record, or `null` when the employee reports to nobody.
pub async fn manager(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Option<Employee>>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    let employees = state.storage().employees();
    let employee = employees.fetch(id).await?;
    let Some(manager_id) = employee.manager_id else {
        return Ok(Json(None));
    };
    match employees.fetch(manager_id).await {
        Ok(manager) => Ok(Json(Some(manager))),
        Err(EmployeeError::NotFound) => Ok(Json(None)),
        Err(err) => Err(err.into()),
    }
}

pub async fn transactions(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Vec<TransactionRecord>>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    ensure_exists(&state, id).await?;
    Ok(Json(state.storage().transactions().list_for_employee(id).await?))
}

pub async fn record_transaction(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TransactionDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionRecord>), ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    let Json(draft) = payload?;
    ensure_exists(&state, id).await?;
    let record = draft.validate_new(id, state.now())?;
    let created = state.staffing().record_transaction(&record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn subordinates(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Vec<Employee>>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    ensure_exists(&state, id).await?;
    Ok(Json(state.storage().employees().list_subordinates(id).await?))
}

pub async fn hierarchy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Vec<Employee>>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    Ok(Json(state.staffing().hierarchy(id).await?))
}

async fn ensure_exists(state: &AppState, id: RecordId) -> Result<(), ProblemResponse> {
    if state.storage().employees().exists(id).await? {
        Ok(())
    } else {
        Err(EmployeeError::NotFound.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        create_department, create_employee, fixed_now, send, setup_app, setup_app_with,
    };
    use serde_json::{json, Value};
    use staffbook_core::types::TransferPolicy;

    fn ids(body: &Value) -> Vec<i64> {
        body.as_array()
            .expect("array body")
            .iter()
            .map(|item| item["id"].as_i64().expect("id"))
            .collect()
    }

    async fn assign(app: &axum::Router, employee: i64, manager: i64) -> StatusCode {
        send(
            app,
            "PUT",
            &format!("/api/employees/{employee}/assign-manager"),
            Some(json!({ "manager_id": manager })),
        )
        .await
        .0
    }

    #[tokio::test]
    async fn create_synthesizes_hire_transaction() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;

        let (status, employee) = send(
            &app,
            "POST",
            "/api/employees",
            Some(json!({
                "user": { "username": "grace", "first_name": "Grace", "last_name": "Hopper" },
                "email": "grace@example.com",
                "designation": "Engineer",
                "department_id": eng,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(employee["user"]["username"], "grace");
        assert_eq!(employee["department"]["name"], "Engineering");
        assert!(employee["manager"].is_null());

        let id = employee["id"].as_i64().expect("id");
        let (status, ledger) = send(&app, "GET", &format!("/api/employees/{id}/transactions"), None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = ledger.as_array().expect("array");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["transaction_type"], "HIRE");
        assert_eq!(entries[0]["employee"], "Grace Hopper");
        assert_eq!(entries[0]["new_department"], "Engineering");
        assert!(entries[0]["previous_department_id"].is_null());
        let date: chrono::DateTime<chrono::Utc> =
            serde_json::from_value(entries[0]["transaction_date"].clone()).expect("date");
        assert_eq!(date, fixed_now());
    }

    #[tokio::test]
    async fn failed_create_rolls_back_everything() {
        let (app, database) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        create_employee(&app, "grace", eng).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/employees",
            Some(json!({
                "user": { "username": "other" },
                "email": "grace@example.com",
                "department_id": eng,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["email"].is_array());

        let (status, body) = send(
            &app,
            "POST",
            "/api/employees",
            Some(json!({ "user": { "username": "grace" }, "department_id": eng })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["user.username"].is_array());

        for table in ["users", "employees", "transactions"] {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            let count: (i64,) = sqlx::query_as(&sql)
                .fetch_one(database.pool())
                .await
                .expect("count");
            assert_eq!(count.0, 1, "{table} should hold only the first hire");
        }
    }

    #[tokio::test]
    async fn create_validates_fields_and_references() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/employees",
            Some(json!({ "email": "not-an-email", "department_id": eng })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["user"].is_array());
        assert!(body["errors"]["email"].is_array());

        let (status, body) = send(
            &app,
            "POST",
            "/api/employees",
            Some(json!({ "user": { "username": "x" }, "department_id": 404, "manager_id": 9 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["department_id"].is_array());
        assert!(body["errors"]["manager_id"].is_array());
    }

    #[tokio::test]
    async fn list_filters_by_name_and_department() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let ops = create_department(&app, "Ops").await;
        let alice = create_employee(&app, "alice", eng).await;
        let bob = create_employee(&app, "bob", ops).await;
        let alicia = create_employee(&app, "alicia", ops).await;

        let (_, body) = send(&app, "GET", "/api/employees?name=ALI", None).await;
        assert_eq!(ids(&body), vec![alice, alicia]);

        let (_, body) = send(&app, "GET", &format!("/api/employees?department_id={ops}"), None).await;
        assert_eq!(ids(&body), vec![bob, alicia]);

        let (_, body) = send(
            &app,
            "GET",
            &format!("/api/employees?name=ali&department_id={ops}"),
            None,
        )
        .await;
        assert_eq!(ids(&body), vec![alicia]);

        let (_, body) = send(&app, "GET", "/api/employees?name=&department_id=", None).await;
        assert_eq!(ids(&body).len(), 3);

        let (status, _) = send(&app, "GET", "/api/employees?department_id=ops", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn name_filter_folds_accented_and_cyrillic_case() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/employees",
            Some(json!({
                "user": { "username": "emartin", "first_name": "Émile", "last_name": "Martin" },
                "department_id": eng,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let emile = body["id"].as_i64().expect("id");
        let ivan = create_employee(&app, "ivan", eng).await;

        // émile, ÉMILE
        for query in ["name=%C3%A9mile", "name=%C3%89MILE"] {
            let (_, body) = send(&app, "GET", &format!("/api/employees?{query}"), None).await;
            assert_eq!(ids(&body), vec![emile], "{query}");
        }

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/employees/{ivan}"),
            Some(json!({ "user": { "first_name": "Иван", "last_name": "Петров" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // иван петров
        let (_, body) = send(
            &app,
            "GET",
            "/api/employees?name=%D0%B8%D0%B2%D0%B0%D0%BD%20%D0%BF%D0%B5%D1%82%D1%80%D0%BE%D0%B2",
            None,
        )
        .await;
        assert_eq!(ids(&body), vec![ivan]);
    }

    #[tokio::test]
    async fn update_changes_identity_and_clears_optionals() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let id = create_employee(&app, "grace", eng).await;

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/employees/{id}"),
            Some(json!({ "user": { "last_name": "Hopper" }, "email": null, "phone": "555" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["first_name"], "GRACE");
        assert_eq!(body["user"]["last_name"], "Hopper");
        assert!(body["email"].is_null());
        assert_eq!(body["phone"], "555");

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/employees/{id}"),
            Some(json!({ "manager_id": id })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PATCH", "/api/employees/999", Some(json!({ "phone": "1" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn department_change_respects_transfer_policy() {
        for (policy, expected) in [(TransferPolicy::Manual, 1), (TransferPolicy::Record, 2)] {
            let (app, _) = setup_app_with(policy).await;
            let eng = create_department(&app, "Engineering").await;
            let ops = create_department(&app, "Ops").await;
            let id = create_employee(&app, "grace", eng).await;

            let (status, body) = send(
                &app,
                "PATCH",
                &format!("/api/employees/{id}"),
                Some(json!({ "department_id": ops })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["department"]["id"], ops);

            let (_, ledger) = send(&app, "GET", &format!("/api/employees/{id}/transactions"), None).await;
            let entries = ledger.as_array().expect("array");
            assert_eq!(entries.len(), expected, "policy {policy:?}");
            if policy == TransferPolicy::Record {
                assert_eq!(entries[1]["transaction_type"], "TRANSFER");
                assert_eq!(entries[1]["previous_department"], "Engineering");
                assert_eq!(entries[1]["new_department"], "Ops");
            }
        }
    }

    #[tokio::test]
    async fn assign_manager_paths() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let boss = create_employee(&app, "boss", eng).await;
        let worker = create_employee(&app, "worker", eng).await;

        assert_eq!(assign(&app, worker, boss).await, StatusCode::OK);
        assert_eq!(assign(&app, worker, 999).await, StatusCode::NOT_FOUND);
        assert_eq!(assign(&app, worker, worker).await, StatusCode::BAD_REQUEST);
        assert_eq!(assign(&app, 999, boss).await, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/employees/{worker}/assign-manager"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["manager_id"].is_array());

        let (_, body) = send(&app, "GET", &format!("/api/employees/{worker}"), None).await;
        assert_eq!(body["manager_id"], boss);
        assert_eq!(body["manager"], "BOSS Doe");
    }

    #[tokio::test]
    async fn manager_is_null_when_absent() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let boss = create_employee(&app, "boss", eng).await;
        let worker = create_employee(&app, "worker", eng).await;

        let (status, body) = send(&app, "GET", &format!("/api/employees/{boss}/manager"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());

        assign(&app, worker, boss).await;
        let (status, body) = send(&app, "GET", &format!("/api/employees/{worker}/manager"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], boss);

        let (status, _) = send(&app, "GET", "/api/employees/999/manager", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn subordinates_and_hierarchy() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let root = create_employee(&app, "root", eng).await;
        let a = create_employee(&app, "a", eng).await;
        let b = create_employee(&app, "b", eng).await;
        let a1 = create_employee(&app, "a1", eng).await;
        assign(&app, b, root).await;
        assign(&app, a, root).await;
        assign(&app, a1, a).await;

        let (_, body) = send(&app, "GET", &format!("/api/employees/{root}/subordinates"), None).await;
        assert_eq!(ids(&body), vec![a, b]);

        let (status, body) = send(&app, "GET", &format!("/api/employees/{root}/hierarchy"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ids(&body), vec![a, a1, b]);

        let (_, body) = send(&app, "GET", &format!("/api/employees/{a1}/hierarchy"), None).await;
        assert!(ids(&body).is_empty());
    }

    #[tokio::test]
    async fn hierarchy_cycle_is_a_conflict() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let a = create_employee(&app, "a", eng).await;
        let b = create_employee(&app, "b", eng).await;
        assign(&app, b, a).await;
        assign(&app, a, b).await;

        let (status, body) = send(&app, "GET", &format!("/api/employees/{a}/hierarchy"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "hierarchy_cycle");
    }

    #[tokio::test]
    async fn delete_removes_employee_and_keeps_reports() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let boss = create_employee(&app, "boss", eng).await;
        let worker = create_employee(&app, "worker", eng).await;
        assign(&app, worker, boss).await;

        let (status, _) = send(&app, "DELETE", &format!("/api/employees/{boss}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &format!("/api/employees/{boss}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", &format!("/api/employees/{worker}"), None).await;
        assert!(body["manager_id"].is_null());
    }
}
