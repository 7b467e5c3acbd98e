use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use staffbook_core::types::{RecordId, TransferPolicy};
use staffbook_storage::Database;

use crate::problem::ProblemResponse;
use crate::staffing::{Clock, StaffingService};
use crate::{departments, employees, telemetry, transactions};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Clock,
    staffing: StaffingService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, transfer_policy: TransferPolicy) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let staffing = StaffingService::new(storage.clone(), clock.clone(), transfer_policy);
        Self {
            metrics,
            storage,
            clock,
            staffing,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock, transfer_policy: TransferPolicy) -> Self {
        self.clock = clock.clone();
        self.staffing = StaffingService::new(self.storage.clone(), clock, transfer_policy);
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn staffing(&self) -> &StaffingService {
        &self.staffing
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/api/departments",
            get(departments::list).post(departments::create),
        )
        .route(
            "/api/departments/:id",
            get(departments::retrieve)
                .put(departments::update)
                .patch(departments::update)
                .delete(departments::destroy),
        )
        .route("/api/departments/:id/employees", get(departments::employees))
        .route(
            "/api/employees",
            get(employees::list).post(employees::create),
        )
        .route(
            "/api/employees/:id",
            get(employees::retrieve)
                .put(employees::update)
                .patch(employees::update)
                .delete(employees::destroy),
        )
        .route(
            "/api/employees/:id/assign-manager",
            put(employees::assign_manager),
        )
        .route("/api/employees/:id/manager", get(employees::manager))
        .route(
            "/api/employees/:id/transactions",
            get(employees::transactions).post(employees::record_transaction),
        )
        .route(
            "/api/employees/:id/subordinates",
            get(employees::subordinates),
        )
        .route("/api/employees/:id/hierarchy", get(employees::hierarchy))
        .route(
            "/api/transactions",
            get(transactions::list).post(transactions::create),
        )
        .route(
            "/api/transactions/:id",
            get(transactions::retrieve)
                .put(transactions::update)
                .patch(transactions::update)
                .delete(transactions::destroy),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Parses a path segment as a record id; anything else cannot name a record.
pub(crate) fn parse_id(raw: &str, problem_type: &'static str) -> Result<RecordId, ProblemResponse> {
    raw.trim()
        .parse::<RecordId>()
        .map_err(|_| ProblemResponse::not_found(problem_type, format!("no record with id {raw}")))
}

/// Treats blank query values as absent.
pub(crate) fn query_value(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
