use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::Serialize;
use tracing::error;

use staffbook_core::hierarchy::HierarchyError;
use staffbook_core::validation::ValidationErrors;
use staffbook_storage::{DepartmentError, EmployeeError, IdentityError, TransactionError};

use crate::staffing::StaffingError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<ValidationErrors>,
}

/// RFC 7807 style error body returned by every handler.
#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
                errors: None,
            },
        }
    }

    /// 400 carrying per-field messages.
    pub fn validation(errors: ValidationErrors) -> Self {
        let mut problem = Self::new(
            StatusCode::BAD_REQUEST,
            "validation_error",
            errors.to_string(),
        );
        problem.body.errors = Some(errors);
        problem
    }

    pub fn not_found(problem_type: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, problem_type, detail)
    }

    /// 500 whose detail stays in the logs.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        error!(stage = "api", error = %err, "storage operation failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "an internal storage error occurred",
        )
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        counter!("api_problems_total", "type" => self.body.problem_type).increment(1);
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<JsonRejection> for ProblemResponse {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_json", rejection.body_text())
    }
}

impl From<ValidationErrors> for ProblemResponse {
    fn from(errors: ValidationErrors) -> Self {
        Self::validation(errors)
    }
}

impl From<DepartmentError> for ProblemResponse {
    fn from(err: DepartmentError) -> Self {
        match err {
            DepartmentError::NotFound => Self::not_found("department_not_found", err.to_string()),
            DepartmentError::DuplicateName => Self::validation(ValidationErrors::single(
                "name",
                "department with this name already exists.",
            )),
            DepartmentError::Database(err) => Self::storage(err),
        }
    }
}

impl From<IdentityError> for ProblemResponse {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::NotFound => Self::not_found("employee_not_found", err.to_string()),
            IdentityError::DuplicateUsername => Self::validation(ValidationErrors::single(
                "user.username",
                "A user with that username already exists.",
            )),
            IdentityError::Database(err) => Self::storage(err),
        }
    }
}

impl From<EmployeeError> for ProblemResponse {
    fn from(err: EmployeeError) -> Self {
        match err {
            EmployeeError::NotFound => Self::not_found("employee_not_found", err.to_string()),
            EmployeeError::DuplicateEmail => Self::validation(ValidationErrors::single(
                "email",
                "employee with this email already exists.",
            )),
            EmployeeError::MissingReference => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_reference", err.to_string())
            }
            EmployeeError::SelfManagement => Self::validation(ValidationErrors::single(
                "manager_id",
                "An employee cannot be their own manager.",
            )),
            EmployeeError::Database(err) => Self::storage(err),
        }
    }
}

impl From<TransactionError> for ProblemResponse {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::NotFound => {
                Self::not_found("transaction_not_found", err.to_string())
            }
            TransactionError::MissingReference => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_reference", err.to_string())
            }
            TransactionError::UnknownType(_) => Self::storage(err),
            TransactionError::Database(err) => Self::storage(err),
        }
    }
}

impl From<HierarchyError> for ProblemResponse {
    fn from(err: HierarchyError) -> Self {
        Self::new(StatusCode::CONFLICT, "hierarchy_cycle", err.to_string())
    }
}

impl From<StaffingError> for ProblemResponse {
    fn from(err: StaffingError) -> Self {
        match err {
            StaffingError::EmployeeNotFound => {
                Self::not_found("employee_not_found", err.to_string())
            }
            StaffingError::ManagerNotFound => Self::not_found("manager_not_found", err.to_string()),
            StaffingError::Validation(errors) => Self::validation(errors),
            StaffingError::Hierarchy(err) => err.into(),
            StaffingError::Identity(err) => err.into(),
            StaffingError::Employee(err) => err.into(),
            StaffingError::Department(err) => err.into(),
            StaffingError::Transaction(err) => err.into(),
            StaffingError::Database(err) => Self::storage(err),
        }
    }
}
