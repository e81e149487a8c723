use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use hrbank_core::pagination::{paginate, CursorPage, PageCursor};
use hrbank_core::types::{
    truncate_to_millis, Employee, EmployeeChangeType, EmployeeLog, EmployeeStatus,
};
use hrbank_storage::{
    Database, EmployeeChanges, EmployeeError, EmployeeFilter, EmployeeLogError, NewEmployee,
    NewEmployeeLog,
};

use crate::pagetoken::{self, clamp_page_size, CursorPageResponse};
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Fields supplied when registering an employee. The employee number is never
/// caller-supplied; the service assigns it.
#[derive(Debug, Clone)]
pub struct EmployeeDraft {
    pub name: String,
    pub email: String,
    pub department_id: i64,
    pub position: Option<String>,
    pub status: EmployeeStatus,
    pub hired_at: Option<NaiveDate>,
}

/// Partial update for an employee. Absent fields keep their stored value;
/// `memo` is recorded on the audit entry, not on the employee.
#[derive(Debug, Clone, Default)]
pub struct EmployeeUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub department_id: Option<i64>,
    pub position: Option<String>,
    pub status: Option<EmployeeStatus>,
    pub hired_at: Option<NaiveDate>,
    pub memo: Option<String>,
}

/// Optional restrictions for the employee listing: status, a name/email
/// substring, the owning department's name, and the position title.
#[derive(Debug, Clone, Default)]
pub struct EmployeeListFilter {
    pub status: Option<EmployeeStatus>,
    pub search: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
}

/// The employee service. Every mutation commits the row change and its audit
/// entry in one transaction, so the trail never disagrees with the records.
#[derive(Clone)]
pub struct EmployeeService {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl EmployeeService {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    // Truncated to the precision the store persists, so the registration
    // response and later reads agree on the instant.
    fn now(&self) -> DateTime<Utc> {
        truncate_to_millis((self.clock)())
    }

    /// Registers an employee and appends the CREATED audit entry.
    ///
    /// The assigned department must exist; the foreign key reports the
    /// violation even when a concurrent delete wins the race.
    pub async fn register(&self, draft: EmployeeDraft) -> Result<Employee, EmployeeServiceError> {
        require_filled("name", &draft.name)?;
        require_filled("email", &draft.email)?;

        let employee_number = format!("EMP-{}", Uuid::new_v4().simple());
        let now = self.now();
        let repo = self.database.employees();
        let logs = self.database.employee_logs();

        let mut tx = repo.begin().await?;
        let id = repo
            .insert(
                &mut tx,
                NewEmployee {
                    employee_number: &employee_number,
                    name: &draft.name,
                    email: &draft.email,
                    department_id: draft.department_id,
                    position: draft.position.as_deref(),
                    status: draft.status,
                    hired_at: draft.hired_at,
                    created_at: now,
                },
            )
            .await?;
        logs.append(
            &mut tx,
            NewEmployeeLog {
                employee_id: id,
                change_type: EmployeeChangeType::Created,
                memo: None,
                changed_at: now,
            },
        )
        .await?;
        tx.commit().await?;

        info!(stage = "employee", id, number = %employee_number, "employee registered");
        Ok(Employee {
            id,
            employee_number,
            name: draft.name,
            email: draft.email,
            department_id: draft.department_id,
            position: draft.position,
            status: draft.status,
            hired_at: draft.hired_at,
            created_at: now,
            updated_at: now,
        })
    }

    /// Loads an employee by id.
    pub async fn get(&self, id: i64) -> Result<Employee, EmployeeServiceError> {
        self.database
            .employees()
            .find_by_id(id)
            .await?
            .ok_or(EmployeeServiceError::NotFound)
    }

    /// Lists employees in ascending (created_at, id) order after the cursor.
    /// All filters are optional; blank filter text is treated as absent.
    pub async fn list(
        &self,
        cursor: Option<PageCursor>,
        filter: EmployeeListFilter,
        page_size: usize,
    ) -> Result<CursorPage<Employee>, EmployeeServiceError> {
        let status = filter.status;
        let search = normalize(filter.search.as_deref());
        let department = normalize(filter.department.as_deref());
        let position = normalize(filter.position.as_deref());

        let repo = self.database.employees();
        let page = paginate(
            cursor,
            page_size,
            |employee: &Employee| PageCursor::new(employee.created_at, employee.id),
            move |cursor, limit| async move {
                repo.find_page(
                    cursor,
                    EmployeeFilter {
                        status,
                        search: search.as_deref(),
                        department: department.as_deref(),
                        position: position.as_deref(),
                    },
                    limit,
                )
                .await
            },
        )
        .await?;
        Ok(page)
    }

    /// Headcount statistics: how many employees match the status and
    /// hire-date range, each restriction optional.
    pub async fn count(
        &self,
        status: Option<EmployeeStatus>,
        hired_from: Option<NaiveDate>,
        hired_to: Option<NaiveDate>,
    ) -> Result<i64, EmployeeServiceError> {
        let count = self
            .database
            .employees()
            .count_filtered(status, hired_from, hired_to)
            .await?;
        Ok(count)
    }

    /// Applies a partial update and appends the UPDATED audit entry, carrying
    /// the caller's memo when one was given.
    pub async fn update(
        &self,
        id: i64,
        changes: EmployeeUpdate,
    ) -> Result<Employee, EmployeeServiceError> {
        if let Some(name) = &changes.name {
            require_filled("name", name)?;
        }
        if let Some(email) = &changes.email {
            require_filled("email", email)?;
        }

        let repo = self.database.employees();
        let logs = self.database.employee_logs();
        let existing = repo
            .find_by_id(id)
            .await?
            .ok_or(EmployeeServiceError::NotFound)?;
        let now = self.now();

        let name = changes.name.unwrap_or(existing.name);
        let email = changes.email.unwrap_or(existing.email);
        let department_id = changes.department_id.unwrap_or(existing.department_id);
        let position = changes.position.or(existing.position);
        let status = changes.status.unwrap_or(existing.status);
        let hired_at = changes.hired_at.or(existing.hired_at);

        let mut tx = repo.begin().await?;
        let updated = repo
            .update(
                &mut tx,
                id,
                EmployeeChanges {
                    name: &name,
                    email: &email,
                    department_id,
                    position: position.as_deref(),
                    status,
                    hired_at,
                    updated_at: now,
                },
            )
            .await?;
        logs.append(
            &mut tx,
            NewEmployeeLog {
                employee_id: id,
                change_type: EmployeeChangeType::Updated,
                memo: changes.memo.as_deref(),
                changed_at: now,
            },
        )
        .await?;
        tx.commit().await?;

        info!(stage = "employee", id, "employee updated");
        Ok(updated)
    }

    /// Deletes an employee and appends the DELETED audit entry. The audit row
    /// outlives the employee row on purpose.
    pub async fn delete(&self, id: i64) -> Result<(), EmployeeServiceError> {
        let repo = self.database.employees();
        let logs = self.database.employee_logs();
        repo.find_by_id(id)
            .await?
            .ok_or(EmployeeServiceError::NotFound)?;

        let mut tx = repo.begin().await?;
        repo.delete(&mut tx, id).await?;
        logs.append(
            &mut tx,
            NewEmployeeLog {
                employee_id: id,
                change_type: EmployeeChangeType::Deleted,
                memo: None,
                changed_at: self.now(),
            },
        )
        .await?;
        tx.commit().await?;

        info!(stage = "employee", id, "employee deleted");
        Ok(())
    }

    /// Reads the audit trail newest-first, strictly before the cursor.
    pub async fn list_logs(
        &self,
        cursor: Option<PageCursor>,
        page_size: usize,
    ) -> Result<CursorPage<EmployeeLog>, EmployeeServiceError> {
        let logs = self.database.employee_logs();
        let page = paginate(
            cursor,
            page_size,
            |log: &EmployeeLog| PageCursor::new(log.changed_at, log.id),
            move |cursor, limit| async move { logs.find_page(cursor, limit).await },
        )
        .await?;
        Ok(page)
    }
}

fn require_filled(field: &'static str, value: &str) -> Result<(), EmployeeServiceError> {
    if value.trim().is_empty() {
        return Err(EmployeeServiceError::Validation(format!(
            "employee {field} must not be blank"
        )));
    }
    Ok(())
}

fn normalize(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Error taxonomy of the employee service.
#[derive(Debug, Error)]
pub enum EmployeeServiceError {
    #[error("employee not found")]
    NotFound,
    #[error("referenced department does not exist")]
    DepartmentNotFound,
    #[error("employee email is already in use")]
    DuplicateEmail,
    #[error("{0}")]
    Validation(String),
    #[error("employee storage error: {0}")]
    Employee(EmployeeError),
    #[error("audit log error: {0}")]
    AuditLog(#[from] EmployeeLogError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<EmployeeError> for EmployeeServiceError {
    fn from(err: EmployeeError) -> Self {
        match err {
            EmployeeError::NotFound => Self::NotFound,
            EmployeeError::DuplicateEmail => Self::DuplicateEmail,
            EmployeeError::MissingDepartment => Self::DepartmentNotFound,
            other => Self::Employee(other),
        }
    }
}

impl From<EmployeeServiceError> for ProblemResponse {
    fn from(err: EmployeeServiceError) -> Self {
        match &err {
            EmployeeServiceError::NotFound => {
                ProblemResponse::not_found("employee_not_found", err.to_string())
            }
            EmployeeServiceError::DepartmentNotFound => {
                ProblemResponse::not_found("department_not_found", err.to_string())
            }
            EmployeeServiceError::DuplicateEmail => {
                ProblemResponse::conflict("duplicate_employee_email", err.to_string())
            }
            EmployeeServiceError::Validation(_) => {
                ProblemResponse::bad_request("invalid_request", err.to_string())
            }
            EmployeeServiceError::Employee(inner) => {
                error!(stage = "employee", error = %inner, "storage failure");
                ProblemResponse::internal("employee storage failure")
            }
            EmployeeServiceError::AuditLog(inner) => {
                error!(stage = "employee", error = %inner, "audit log failure");
                ProblemResponse::internal("employee storage failure")
            }
            EmployeeServiceError::Database(inner) => {
                error!(stage = "employee", error = %inner, "storage failure");
                ProblemResponse::internal("employee storage failure")
            }
        }
    }
}

fn track<T>(op: &'static str, result: &Result<T, EmployeeServiceError>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    counter!("employee_ops_total", "op" => op, "result" => outcome).increment(1);
}

/// Request body for registration.
#[derive(Debug, Deserialize)]
pub struct RegisterEmployeeRequest {
    pub name: String,
    pub email: String,
    pub department_id: i64,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub status: Option<EmployeeStatus>,
    #[serde(default)]
    pub hired_at: Option<NaiveDate>,
}

/// Request body for a partial update.
#[derive(Debug, Deserialize)]
pub struct UpdateEmployeeRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub department_id: Option<i64>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub status: Option<EmployeeStatus>,
    #[serde(default)]
    pub hired_at: Option<NaiveDate>,
    #[serde(default)]
    pub memo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListEmployeesQuery {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CountEmployeesQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    from: Option<NaiveDate>,
    #[serde(default)]
    to: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct EmployeeCountResponse {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    size: Option<usize>,
}

fn decode_cursor(token: Option<&str>) -> Result<Option<PageCursor>, ProblemResponse> {
    token
        .map(pagetoken::decode)
        .transpose()
        .map_err(|err| ProblemResponse::bad_request("invalid_cursor", err.to_string()))
}

fn parse_status(raw: Option<&str>) -> Result<Option<EmployeeStatus>, ProblemResponse> {
    match raw {
        None => Ok(None),
        Some(raw) => EmployeeStatus::parse(raw).map(Some).ok_or_else(|| {
            ProblemResponse::bad_request("invalid_status", format!("unknown employee status {raw:?}"))
        }),
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterEmployeeRequest>,
) -> Result<(StatusCode, Json<Employee>), ProblemResponse> {
    let result = state
        .employees()
        .register(EmployeeDraft {
            name: body.name,
            email: body.email,
            department_id: body.department_id,
            position: body.position,
            status: body.status.unwrap_or(EmployeeStatus::Active),
            hired_at: body.hired_at,
        })
        .await;
    track("register", &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Employee>, ProblemResponse> {
    let result = state.employees().get(id).await;
    track("get", &result);
    Ok(Json(result?))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListEmployeesQuery>,
) -> Result<Json<CursorPageResponse<Employee>>, ProblemResponse> {
    let cursor = decode_cursor(query.cursor.as_deref())?;
    let status = parse_status(query.status.as_deref())?;
    let page_size = clamp_page_size(query.size);

    let filter = EmployeeListFilter {
        status,
        search: query.search,
        department: query.department,
        position: query.position,
    };
    let result = state.employees().list(cursor, filter, page_size).await;
    track("list", &result);
    let page = result?;
    Ok(Json(CursorPageResponse::from_page(page, |employee| employee)))
}

pub async fn count(
    State(state): State<AppState>,
    Query(query): Query<CountEmployeesQuery>,
) -> Result<Json<EmployeeCountResponse>, ProblemResponse> {
    let status = parse_status(query.status.as_deref())?;
    let result = state.employees().count(status, query.from, query.to).await;
    track("count", &result);
    Ok(Json(EmployeeCountResponse { count: result? }))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateEmployeeRequest>,
) -> Result<Json<Employee>, ProblemResponse> {
    let result = state
        .employees()
        .update(
            id,
            EmployeeUpdate {
                name: body.name,
                email: body.email,
                department_id: body.department_id,
                position: body.position,
                status: body.status,
                hired_at: body.hired_at,
                memo: body.memo,
            },
        )
        .await;
    track("update", &result);
    Ok(Json(result?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let result = state.employees().delete(id).await;
    track("delete", &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<CursorPageResponse<EmployeeLog>>, ProblemResponse> {
    let cursor = decode_cursor(query.cursor.as_deref())?;
    let page_size = clamp_page_size(query.size);

    let result = state.employees().list_logs(cursor, page_size).await;
    track("logs", &result);
    let page = result?;
    Ok(Json(CursorPageResponse::from_page(page, |log| log)))
}
