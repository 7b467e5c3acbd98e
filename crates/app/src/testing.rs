use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use staffbook_core::types::TransferPolicy;
use staffbook_storage::Database;

use crate::router::{app_router, AppState};
use crate::staffing::Clock;
use crate::telemetry;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
}

pub fn fixed_clock() -> Clock {
    Arc::new(fixed_now)
}

pub async fn setup_database() -> Database {
    let database = Database::connect("sqlite::memory:")
        .await
        .expect("connect");
    database.run_migrations().await.expect("migrations");
    database
}

pub async fn setup_app() -> (Router, Database) {
    setup_app_with(TransferPolicy::Manual).await
}

pub async fn setup_app_with(policy: TransferPolicy) -> (Router, Database) {
    let metrics = telemetry::init_metrics().expect("metrics init");
    let database = setup_database().await;
    let state = AppState::new(metrics, database.clone(), policy).with_clock(fixed_clock(), policy);
    (app_router(state), database)
}

/// Sends one request and decodes the JSON body, `Value::Null` when empty.
pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .expect("handler should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should read")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

pub async fn create_department(app: &Router, name: &str) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/departments",
        Some(serde_json::json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_i64().expect("department id")
}

pub async fn create_employee(app: &Router, username: &str, department_id: i64) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/employees",
        Some(serde_json::json!({
            "user": {
                "username": username,
                "first_name": username.to_uppercase(),
                "last_name": "Doe",
            },
            "email": format!("{username}@example.com"),
            "department_id": department_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_i64().expect("employee id")
}
