use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Truncates a timestamp to millisecond precision, the resolution the store
/// persists. Values assigned at write time must pass through this so the
/// response body and a later read report the same instant.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .unwrap_or(at)
}

/// A department record as persisted in the store.
///
/// `employee_count` is deliberately absent: it is a derived value owned by
/// the employees table and is attached at read time (see [`DepartmentView`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub established_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A department together with its live employee count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentView {
    #[serde(flatten)]
    pub department: Department,
    pub employee_count: i64,
}

impl DepartmentView {
    pub fn new(department: Department, employee_count: i64) -> Self {
        Self {
            department,
            employee_count,
        }
    }
}

/// An employee record persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub employee_number: String,
    pub name: String,
    pub email: String,
    pub department_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    pub status: EmployeeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hired_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Employment status persisted in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeStatus {
    Active,
    OnLeave,
    Resigned,
}

impl EmployeeStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::OnLeave => "ON_LEAVE",
            Self::Resigned => "RESIGNED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "ON_LEAVE" => Some(Self::OnLeave),
            "RESIGNED" => Some(Self::Resigned),
            _ => None,
        }
    }
}

/// Audit entry recorded whenever an employee record changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeLog {
    pub id: i64,
    pub employee_id: i64,
    pub change_type: EmployeeChangeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Kind of change captured by an [`EmployeeLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeChangeType {
    Created,
    Updated,
    Deleted,
}

impl EmployeeChangeType {
    /// Returns the canonical database representation for the change type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(Self::Created),
            "UPDATED" => Some(Self::Updated),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}
