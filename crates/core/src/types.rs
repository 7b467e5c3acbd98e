use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary key type shared by every table.
pub type RecordId = i64;

/// Organizational unit employees belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: RecordId,
    pub name: String,
    pub description: Option<String>,
}

/// Login identity attached one-to-one to an employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: RecordId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

/// Builds the human readable summary used wherever an employee is referenced on read.
pub fn display_name(username: &str, first_name: &str, last_name: &str) -> String {
    let full = format!("{} {}", first_name.trim(), last_name.trim());
    let full = full.trim();
    if full.is_empty() {
        username.to_string()
    } else {
        full.to_string()
    }
}

/// Employee as returned to clients, with relations resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: RecordId,
    pub user: Person,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub designation: Option<String>,
    pub department: Department,
    pub manager_id: Option<RecordId>,
    /// Display name of the manager.
    pub manager: Option<String>,
}

/// Closed set of employment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Hire,
    Transfer,
    Termination,
}

impl TransactionType {
    /// Returns the canonical database representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hire => "HIRE",
            Self::Transfer => "TRANSFER",
            Self::Termination => "TERMINATION",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "HIRE" => Ok(Self::Hire),
            "TRANSFER" => Ok(Self::Transfer),
            "TERMINATION" => Ok(Self::Termination),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("\"{0}\" is not a valid choice")]
pub struct UnknownTransactionType(pub String);

/// Ledger entry recording one employment event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: RecordId,
    pub employee_id: RecordId,
    /// Display name of the employee.
    pub employee: String,
    pub transaction_type: TransactionType,
    pub previous_department_id: Option<RecordId>,
    pub previous_department: Option<String>,
    pub new_department_id: Option<RecordId>,
    pub new_department: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub remarks: Option<String>,
}

/// What happens when an employee's department is changed through an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPolicy {
    /// Department changes are silent; TRANSFER entries are written by hand.
    #[default]
    Manual,
    /// A TRANSFER entry is written in the same unit of work as the update.
    Record,
}

impl TransferPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Record => "record",
        }
    }

    pub fn records_transfers(self) -> bool {
        matches!(self, Self::Record)
    }
}

impl FromStr for TransferPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(Self::Manual),
            "record" => Ok(Self::Record),
            other => Err(other.to_string()),
        }
    }
}

/// Filters accepted by the employee listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeeFilter {
    pub name: Option<String>,
    pub department_id: Option<RecordId>,
}

/// Filters accepted by the transaction listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub employee_id: Option<RecordId>,
    pub transaction_type: Option<String>,
    pub date_range: Option<DateRange>,
}

/// Inclusive timestamp interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Builds a range only when both bounds are supplied.
    pub fn from_bounds(
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Option<Self>, DateBoundError> {
        match (start, end) {
            (Some(start), Some(end)) => Ok(Some(Self {
                start: parse_bound(start, BoundSide::Start)?,
                end: parse_bound(end, BoundSide::End)?,
            })),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundSide {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} must be an RFC 3339 timestamp or a YYYY-MM-DD date (got {value})")]
pub struct DateBoundError {
    pub field: &'static str,
    pub value: String,
}

fn parse_bound(raw: &str, side: BoundSide) -> Result<DateTime<Utc>, DateBoundError> {
    let raw = raw.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Ok(value.with_timezone(&Utc));
    }

    let field = match side {
        BoundSide::Start => "start_date",
        BoundSide::End => "end_date",
    };
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| DateBoundError {
        field,
        value: raw.to_string(),
    })?;
    let time = match side {
        BoundSide::Start => chrono::NaiveTime::MIN,
        // Stored timestamps carry millisecond precision.
        BoundSide::End => chrono::NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or_default(),
    };
    Ok(date.and_time(time).and_utc())
}
