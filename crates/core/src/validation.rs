//! Request drafts as they arrive on the wire and their validated counterparts.
//!
//! Drafts keep every field optional so that missing or malformed input is reported per field
//! instead of failing the whole body at deserialization time. `Option<Option<T>>` fields
//! distinguish "absent" (leave unchanged) from `null` (clear).

use std::{collections::BTreeMap, str::FromStr};

use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{RecordId, TransactionType};

pub const DEPARTMENT_NAME_MAX: usize = 100;
pub const USERNAME_MAX: usize = 150;
pub const PERSON_NAME_MAX: usize = 150;
pub const EMAIL_MAX: usize = 254;
pub const PHONE_MAX: usize = 15;
pub const DESIGNATION_MAX: usize = 100;

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const BLANK: &str = "This field may not be blank.";

/// Field-level validation failures keyed by field path (`user.username`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single failing field.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns `value` when no errors were collected.
    pub fn finish<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn required_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Option<String> {
    let Some(value) = value else {
        errors.add(field, REQUIRED);
        return None;
    };
    present_text(errors, field, value, max)
}

fn present_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: &str,
    max: usize,
) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, BLANK);
        return None;
    }
    check_length(errors, field, trimmed, max).then(|| trimmed.to_string())
}

fn check_length(errors: &mut ValidationErrors, field: &str, value: &str, max: usize) -> bool {
    if value.chars().count() > max {
        errors.add(
            field,
            format!("Ensure this field has no more than {max} characters."),
        );
        return false;
    }
    true
}

/// Blank optional text is stored as null.
fn optional_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Option<String> {
    let trimmed = value.map(str::trim).filter(|value| !value.is_empty())?;
    check_length(errors, field, trimmed, max).then(|| trimmed.to_string())
}

/// Accepts a bare RFC 5322 address whose domain has at least two labels.
fn optional_email(errors: &mut ValidationErrors, value: Option<&str>) -> Option<String> {
    let email = optional_text(errors, "email", value, EMAIL_MAX)?;
    let accepted = EmailAddress::from_str(&email)
        .map(|address| address.email() == email && address.domain().contains('.'))
        .unwrap_or(false);
    if accepted {
        Some(email)
    } else {
        errors.add("email", "Enter a valid email address.");
        None
    }
}

fn name_part(errors: &mut ValidationErrors, field: &str, value: Option<&str>) -> String {
    let value = value.map(str::trim).unwrap_or_default();
    if check_length(errors, field, value, PERSON_NAME_MAX) {
        value.to_string()
    } else {
        String::new()
    }
}

fn patch_text(
    errors: &mut ValidationErrors,
    field: &str,
    value: &Option<Option<String>>,
    max: usize,
) -> Option<Option<String>> {
    value
        .as_ref()
        .map(|inner| optional_text(errors, field, inner.as_deref(), max))
}

/// Department create/update body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepartmentDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDepartment {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}

impl DepartmentDraft {
    pub fn validate_new(&self) -> Result<NewDepartment, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = required_text(&mut errors, "name", self.name.as_deref(), DEPARTMENT_NAME_MAX);
        let description = self
            .description
            .clone()
            .flatten()
            .filter(|value| !value.trim().is_empty());
        match name {
            Some(name) => errors.finish(NewDepartment { name, description }),
            None => Err(errors),
        }
    }

    pub fn validate_patch(&self) -> Result<DepartmentPatch, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = self
            .name
            .as_deref()
            .and_then(|value| present_text(&mut errors, "name", value, DEPARTMENT_NAME_MAX));
        let description = self
            .description
            .as_ref()
            .map(|inner| inner.clone().filter(|value| !value.trim().is_empty()));
        errors.finish(DepartmentPatch { name, description })
    }
}

/// Identity fields nested under `user` in employee bodies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonDraft {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPerson {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonPatch {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl PersonPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }
}

/// Employee create/update body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeDraft {
    #[serde(default)]
    pub user: Option<PersonDraft>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub designation: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub department_id: Option<Option<RecordId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub manager_id: Option<Option<RecordId>>,
}

/// Validated input for the hire path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEmployee {
    pub person: NewPerson,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub designation: Option<String>,
    pub department_id: RecordId,
    pub manager_id: Option<RecordId>,
}

/// Validated partial update of an employee and its identity record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeePatch {
    pub person: PersonPatch,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub designation: Option<Option<String>>,
    pub department_id: Option<RecordId>,
    pub manager_id: Option<Option<RecordId>>,
}

impl EmployeePatch {
    /// Returns `true` when no employee-table column is touched.
    pub fn has_no_employee_fields(&self) -> bool {
        self.email.is_none()
            && self.phone.is_none()
            && self.designation.is_none()
            && self.department_id.is_none()
            && self.manager_id.is_none()
    }
}

impl EmployeeDraft {
    pub fn validate_new(&self) -> Result<NewEmployee, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let person = match &self.user {
            Some(user) => {
                let username = required_text(
                    &mut errors,
                    "user.username",
                    user.username.as_deref(),
                    USERNAME_MAX,
                );
                let first_name = name_part(&mut errors, "user.first_name", user.first_name.as_deref());
                let last_name = name_part(&mut errors, "user.last_name", user.last_name.as_deref());
                username.map(|username| NewPerson {
                    username,
                    first_name,
                    last_name,
                })
            }
            None => {
                errors.add("user", REQUIRED);
                None
            }
        };

        let email = optional_email(&mut errors, self.email.clone().flatten().as_deref());
        let phone = optional_text(&mut errors, "phone", self.phone.clone().flatten().as_deref(), PHONE_MAX);
        let designation = optional_text(
            &mut errors,
            "designation",
            self.designation.clone().flatten().as_deref(),
            DESIGNATION_MAX,
        );

        let department_id = match self.department_id {
            Some(Some(id)) => Some(id),
            Some(None) => {
                errors.add("department_id", NOT_NULL);
                None
            }
            None => {
                errors.add("department_id", REQUIRED);
                None
            }
        };
        let manager_id = self.manager_id.flatten();

        match (person, department_id) {
            (Some(person), Some(department_id)) => errors.finish(NewEmployee {
                person,
                email,
                phone,
                designation,
                department_id,
                manager_id,
            }),
            _ => Err(errors),
        }
    }

    /// Validates a partial update of employee `employee_id`.
    pub fn validate_patch(&self, employee_id: RecordId) -> Result<EmployeePatch, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let person = match &self.user {
            Some(user) => PersonPatch {
                username: user.username.as_deref().and_then(|value| {
                    present_text(&mut errors, "user.username", value, USERNAME_MAX)
                }),
                first_name: user
                    .first_name
                    .as_deref()
                    .map(|value| name_part(&mut errors, "user.first_name", Some(value))),
                last_name: user
                    .last_name
                    .as_deref()
                    .map(|value| name_part(&mut errors, "user.last_name", Some(value))),
            },
            None => PersonPatch::default(),
        };

        let email = self
            .email
            .as_ref()
            .map(|inner| optional_email(&mut errors, inner.as_deref()));
        let phone = patch_text(&mut errors, "phone", &self.phone, PHONE_MAX);
        let designation = patch_text(&mut errors, "designation", &self.designation, DESIGNATION_MAX);

        let department_id = match self.department_id {
            Some(Some(id)) => Some(id),
            Some(None) => {
                errors.add("department_id", NOT_NULL);
                None
            }
            None => None,
        };

        if self.manager_id == Some(Some(employee_id)) {
            errors.add("manager_id", "An employee cannot be their own manager.");
        }

        errors.finish(EmployeePatch {
            person,
            email,
            phone,
            designation,
            department_id,
            manager_id: self.manager_id,
        })
    }
}

/// Transaction create/update body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionDraft {
    #[serde(default)]
    pub employee_id: Option<RecordId>,
    /// Older clients send the employee under this key, sometimes next to `employee_id`.
    #[serde(default)]
    pub employee: Option<RecordId>,
    #[serde(default, deserialize_with = "double_option")]
    pub transaction_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub previous_department_id: Option<Option<RecordId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub new_department_id: Option<Option<RecordId>>,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub remarks: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub employee_id: RecordId,
    pub transaction_type: TransactionType,
    pub previous_department_id: Option<RecordId>,
    pub new_department_id: Option<RecordId>,
    pub transaction_date: DateTime<Utc>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPatch {
    pub transaction_type: Option<TransactionType>,
    pub previous_department_id: Option<Option<RecordId>>,
    pub new_department_id: Option<Option<RecordId>>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub remarks: Option<Option<String>>,
}

fn parse_transaction_type(errors: &mut ValidationErrors, raw: &str) -> Option<TransactionType> {
    match raw.parse::<TransactionType>() {
        Ok(kind) => Some(kind),
        Err(err) => {
            errors.add("transaction_type", err.to_string());
            None
        }
    }
}

impl TransactionDraft {
    /// The employee named by the body, `employee_id` winning over `employee`.
    pub fn target_employee(&self) -> Option<RecordId> {
        self.employee_id.or(self.employee)
    }

    /// Validates a new entry for `employee_id`, stamping `now` when no date is supplied.
    pub fn validate_new(
        &self,
        employee_id: RecordId,
        now: DateTime<Utc>,
    ) -> Result<NewTransaction, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let transaction_type = match &self.transaction_type {
            Some(Some(raw)) => parse_transaction_type(&mut errors, raw),
            Some(None) => {
                errors.add("transaction_type", NOT_NULL);
                None
            }
            None => {
                errors.add("transaction_type", REQUIRED);
                None
            }
        };
        let remarks = self
            .remarks
            .clone()
            .flatten()
            .filter(|value| !value.trim().is_empty());

        match transaction_type {
            Some(transaction_type) => errors.finish(NewTransaction {
                employee_id,
                transaction_type,
                previous_department_id: self.previous_department_id.flatten(),
                new_department_id: self.new_department_id.flatten(),
                transaction_date: self.transaction_date.unwrap_or(now),
                remarks,
            }),
            None => Err(errors),
        }
    }

    pub fn validate_patch(&self) -> Result<TransactionPatch, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let transaction_type = match &self.transaction_type {
            Some(Some(raw)) => parse_transaction_type(&mut errors, raw),
            Some(None) => {
                errors.add("transaction_type", NOT_NULL);
                None
            }
            None => None,
        };
        let remarks = self
            .remarks
            .as_ref()
            .map(|inner| inner.clone().filter(|value| !value.trim().is_empty()));

        errors.finish(TransactionPatch {
            transaction_type,
            previous_department_id: self.previous_department_id,
            new_department_id: self.new_department_id,
            transaction_date: self.transaction_date,
            remarks,
        })
    }
}
