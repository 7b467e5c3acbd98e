use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use staffbook_core::types::{DateRange, RecordId, TransactionFilter, TransactionRecord};
use staffbook_core::validation::{TransactionDraft, ValidationErrors};

use crate::problem::ProblemResponse;
use crate::router::{parse_id, query_value, AppState};

const NOT_FOUND: &str = "transaction_not_found";

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(default)]
    employee_id: Option<String>,
    #[serde(default)]
    transaction_type: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
}

impl TransactionQuery {
    fn into_filter(self) -> Result<TransactionFilter, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let employee_id = query_value(self.employee_id).and_then(|raw| {
            raw.parse::<RecordId>()
                .map_err(|_| errors.add("employee_id", "Enter a whole number."))
                .ok()
        });
        let start = query_value(self.start_date);
        let end = query_value(self.end_date);
        let date_range = DateRange::from_bounds(start.as_deref(), end.as_deref())
            .map_err(|err| errors.add(err.field, err.to_string()))
            .ok()
            .flatten();

        errors.finish(TransactionFilter {
            employee_id,
            transaction_type: query_value(self.transaction_type),
            date_range,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ProblemResponse> {
    let filter = query.into_filter()?;
    Ok(Json(state.storage().transactions().list(&filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<TransactionDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionRecord>), ProblemResponse> {
    let Json(draft) = payload?;
    let Some(employee_id) = draft.target_employee() else {
        return Err(ValidationErrors::single("employee_id", "This field is required.").into());
    };
    let record = draft.validate_new(employee_id, state.now())?;
    let created = state.staffing().record_transaction(&record).await?;
    info!(
        stage = "api",
        transaction_id = created.id,
        employee_id,
        "transaction recorded"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn retrieve(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<TransactionRecord>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    Ok(Json(state.storage().transactions().fetch(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TransactionDraft>, JsonRejection>,
) -> Result<Json<TransactionRecord>, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    let Json(draft) = payload?;
    let patch = draft.validate_patch()?;
    Ok(Json(state.staffing().amend_transaction(id, &patch).await?))
}

pub async fn destroy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let id = parse_id(&raw_id, NOT_FOUND)?;
    state.storage().transactions().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_department, create_employee, send, setup_app};
    use axum::Router;
    use serde_json::{json, Value};

    async fn record(app: &Router, body: Value) -> (StatusCode, Value) {
        send(app, "POST", "/api/transactions", Some(body)).await
    }

    fn kinds(body: &Value) -> Vec<String> {
        body.as_array()
            .expect("array body")
            .iter()
            .map(|item| item["transaction_type"].as_str().expect("type").to_string())
            .collect()
    }

    #[tokio::test]
    async fn create_validates_employee_and_type() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let id = create_employee(&app, "grace", eng).await;

        let (status, body) = record(&app, json!({ "transaction_type": "HIRE" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["employee_id"].is_array());

        let (status, _) = record(&app, json!({ "employee_id": 999, "transaction_type": "HIRE" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = record(&app, json!({ "employee_id": id, "transaction_type": "PROMOTION" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["errors"]["transaction_type"][0],
            "\"PROMOTION\" is not a valid choice"
        );

        let (status, body) = record(
            &app,
            json!({ "employee": id, "transaction_type": "TRANSFER", "new_department_id": 404 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["new_department_id"].is_array());

        let (status, body) = record(
            &app,
            json!({
                "employee": id,
                "transaction_type": "TERMINATION",
                "transaction_date": "2024-06-30T17:00:00Z",
                "remarks": "contract ended",
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["employee_id"], id);
        assert_eq!(body["remarks"], "contract ended");
    }

    #[tokio::test]
    async fn create_accepts_both_employee_keys() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let grace = create_employee(&app, "grace", eng).await;
        let alan = create_employee(&app, "alan", eng).await;

        let (status, body) = record(
            &app,
            json!({ "employee": grace, "employee_id": grace, "transaction_type": "TRANSFER" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["employee_id"], grace);

        let (status, body) = record(
            &app,
            json!({ "employee": grace, "employee_id": alan, "transaction_type": "TRANSFER" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["employee_id"], alan);
    }

    #[tokio::test]
    async fn sub_resource_path_wins_over_body() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let grace = create_employee(&app, "grace", eng).await;
        let alan = create_employee(&app, "alan", eng).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/employees/{grace}/transactions"),
            Some(json!({ "employee_id": alan, "transaction_type": "TERMINATION" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["employee_id"], grace);
    }

    #[tokio::test]
    async fn list_filters_with_inclusive_range_only_when_both_bounds() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let ops = create_department(&app, "Ops").await;
        let id = create_employee(&app, "grace", eng).await;
        create_employee(&app, "alan", ops).await;

        for (kind, date) in [
            ("TRANSFER", "2024-06-10T00:00:00Z"),
            ("TRANSFER", "2024-06-20T23:59:59.500Z"),
            ("TERMINATION", "2024-07-01T08:00:00Z"),
        ] {
            let (status, _) = record(
                &app,
                json!({ "employee_id": id, "transaction_type": kind, "transaction_date": date }),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (_, body) = send(&app, "GET", &format!("/api/transactions?employee_id={id}"), None).await;
        assert_eq!(kinds(&body), vec!["HIRE", "TRANSFER", "TRANSFER", "TERMINATION"]);

        let (_, body) = send(
            &app,
            "GET",
            &format!("/api/transactions?employee_id={id}&start_date=2024-06-10&end_date=2024-06-20"),
            None,
        )
        .await;
        assert_eq!(kinds(&body), vec!["TRANSFER", "TRANSFER"]);

        let (_, body) = send(
            &app,
            "GET",
            &format!("/api/transactions?employee_id={id}&start_date=2024-06-10"),
            None,
        )
        .await;
        assert_eq!(kinds(&body).len(), 4);

        let (_, body) = send(&app, "GET", "/api/transactions?transaction_type=HIRE", None).await;
        assert_eq!(kinds(&body), vec!["HIRE", "HIRE"]);

        let (status, body) = send(&app, "GET", "/api/transactions?transaction_type=PROMOTION", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(kinds(&body).is_empty());

        let (status, _) = send(
            &app,
            "GET",
            "/api/transactions?start_date=yesterday&end_date=2024-06-20",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (app, _) = setup_app().await;
        let eng = create_department(&app, "Engineering").await;
        let ops = create_department(&app, "Ops").await;
        let id = create_employee(&app, "grace", eng).await;
        let (_, created) = record(&app, json!({ "employee_id": id, "transaction_type": "TRANSFER" })).await;
        let tx_id = created["id"].as_i64().expect("id");

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/transactions/{tx_id}"),
            Some(json!({ "previous_department_id": eng, "new_department_id": ops, "remarks": "reorg" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previous_department"], "Engineering");
        assert_eq!(body["new_department"], "Ops");
        assert_eq!(body["transaction_type"], "TRANSFER");

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/transactions/{tx_id}"),
            Some(json!({ "transaction_type": "SABBATICAL" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for method in ["PATCH", "PUT"] {
            let (status, body) = send(
                &app,
                method,
                &format!("/api/transactions/{tx_id}"),
                Some(json!({ "transaction_type": null })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{method}");
            assert_eq!(body["errors"]["transaction_type"][0], "This field may not be null.");
        }
        let (_, body) = send(&app, "GET", &format!("/api/transactions/{tx_id}"), None).await;
        assert_eq!(body["transaction_type"], "TRANSFER");

        let (status, _) = send(&app, "DELETE", &format!("/api/transactions/{tx_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, "GET", &format!("/api/transactions/{tx_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "transaction_not_found");
    }
}
