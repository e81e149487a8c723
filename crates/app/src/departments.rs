use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use hrbank_core::department::{self, DepartmentRuleError};
use hrbank_core::pagination::{paginate, CursorPage, PageCursor};
use hrbank_core::types::{truncate_to_millis, Department, DepartmentView};
use hrbank_storage::{Database, DepartmentChanges, DepartmentError, NewDepartment};

use crate::pagetoken::{self, clamp_page_size, CursorPageResponse};
use crate::problem::ProblemResponse;
use crate::router::AppState;

/// The department aggregate service: single-entity operations hit the store
/// directly, listing delegates to the pagination engine.
#[derive(Clone)]
pub struct DepartmentService {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl DepartmentService {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    // Truncated to the precision the store persists, so returned views and
    // later reads agree on the instant.
    fn now(&self) -> DateTime<Utc> {
        truncate_to_millis((self.clock)())
    }

    /// Creates a department. The name pre-check gives a friendly error; the
    /// store's unique index is the authority when concurrent creates race.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        established_date: Option<NaiveDate>,
    ) -> Result<DepartmentView, DepartmentServiceError> {
        department::validate_name(name)?;

        let repo = self.database.departments();
        if repo.exists_by_name(name).await? {
            return Err(DepartmentServiceError::DuplicateName);
        }

        let created = repo
            .insert(NewDepartment {
                name,
                description,
                established_date,
                created_at: self.now(),
            })
            .await?;

        info!(stage = "department", id = created.id, "department created");
        Ok(DepartmentView::new(created, 0))
    }

    /// Loads a department with its live employee count.
    pub async fn get(&self, id: i64) -> Result<DepartmentView, DepartmentServiceError> {
        let repo = self.database.departments();
        let department = repo
            .find_by_id(id)
            .await?
            .ok_or(DepartmentServiceError::NotFound)?;
        let employee_count = repo.count_employees(id).await?;
        Ok(DepartmentView::new(department, employee_count))
    }

    /// Lists departments in ascending (created_at, id) order after the
    /// cursor, each with its live employee count.
    pub async fn list(
        &self,
        cursor: Option<PageCursor>,
        search: Option<&str>,
        sort_field: Option<&str>,
        sort_direction: Option<&str>,
        page_size: usize,
    ) -> Result<CursorPage<DepartmentView>, DepartmentServiceError> {
        department::validate_sort(sort_field, sort_direction)?;
        let search = department::normalize_search(search);

        let repo = self.database.departments();
        let fetch_repo = repo.clone();
        let page = paginate(
            cursor,
            page_size,
            |department: &Department| PageCursor::new(department.created_at, department.id),
            move |cursor, limit| async move {
                fetch_repo.find_page(cursor, search.as_deref(), limit).await
            },
        )
        .await?;

        let mut items = Vec::with_capacity(page.items.len());
        for department in page.items {
            let employee_count = repo.count_employees(department.id).await?;
            items.push(DepartmentView::new(department, employee_count));
        }

        Ok(CursorPage {
            items,
            next_cursor: page.next_cursor,
            has_next: page.has_next,
        })
    }

    /// Rewrites a department's mutable fields. Renaming to a name held by a
    /// different department is a conflict; keeping the current name is not.
    pub async fn update(
        &self,
        id: i64,
        name: &str,
        description: Option<&str>,
        established_date: Option<NaiveDate>,
    ) -> Result<DepartmentView, DepartmentServiceError> {
        department::validate_name(name)?;

        let repo = self.database.departments();
        repo.find_by_id(id)
            .await?
            .ok_or(DepartmentServiceError::NotFound)?;
        if repo.exists_by_name_excluding(name, id).await? {
            return Err(DepartmentServiceError::DuplicateName);
        }

        let updated = repo
            .update(
                id,
                DepartmentChanges {
                    name,
                    description,
                    established_date,
                    updated_at: self.now(),
                },
            )
            .await?;
        let employee_count = repo.count_employees(id).await?;

        info!(stage = "department", id, "department updated");
        Ok(DepartmentView::new(updated, employee_count))
    }

    /// Deletes a department. Blocked, never cascaded, while employees still
    /// reference it.
    pub async fn delete(&self, id: i64) -> Result<(), DepartmentServiceError> {
        let repo = self.database.departments();
        repo.find_by_id(id)
            .await?
            .ok_or(DepartmentServiceError::NotFound)?;

        let employee_count = repo.count_employees(id).await?;
        department::ensure_deletable(employee_count)?;

        match repo.delete(id).await {
            // An employee slipped in after the occupancy check; report the
            // same conflict the check would have raised.
            Err(DepartmentError::HasEmployees) => {
                let live = repo.count_employees(id).await?;
                return Err(DepartmentServiceError::HasEmployees(live.max(1)));
            }
            other => other?,
        }
        info!(stage = "department", id, "department deleted");
        Ok(())
    }
}

/// Error taxonomy of the department service. All variants are deterministic
/// validation failures except `Storage`; none are retried.
#[derive(Debug, Error)]
pub enum DepartmentServiceError {
    #[error("department not found")]
    NotFound,
    #[error("department name is already in use")]
    DuplicateName,
    #[error("department still has {0} employee(s) assigned")]
    HasEmployees(i64),
    #[error("{0}")]
    Validation(DepartmentRuleError),
    #[error("department storage error: {0}")]
    Storage(DepartmentError),
}

impl From<DepartmentRuleError> for DepartmentServiceError {
    fn from(err: DepartmentRuleError) -> Self {
        match err {
            DepartmentRuleError::HasEmployees(count) => Self::HasEmployees(count),
            other => Self::Validation(other),
        }
    }
}

impl From<DepartmentError> for DepartmentServiceError {
    fn from(err: DepartmentError) -> Self {
        match err {
            DepartmentError::NotFound => Self::NotFound,
            DepartmentError::DuplicateName => Self::DuplicateName,
            DepartmentError::HasEmployees => Self::HasEmployees(1),
            other => Self::Storage(other),
        }
    }
}

impl From<DepartmentServiceError> for ProblemResponse {
    fn from(err: DepartmentServiceError) -> Self {
        match &err {
            DepartmentServiceError::NotFound => {
                ProblemResponse::not_found("department_not_found", err.to_string())
            }
            DepartmentServiceError::DuplicateName => {
                ProblemResponse::conflict("duplicate_department_name", err.to_string())
            }
            DepartmentServiceError::HasEmployees(_) => {
                ProblemResponse::conflict("department_has_employees", err.to_string())
            }
            DepartmentServiceError::Validation(_) => {
                ProblemResponse::bad_request("invalid_request", err.to_string())
            }
            DepartmentServiceError::Storage(inner) => {
                error!(stage = "department", error = %inner, "storage failure");
                ProblemResponse::internal("department storage failure")
            }
        }
    }
}

fn track<T>(op: &'static str, result: &Result<T, DepartmentServiceError>) {
    let outcome = if result.is_ok() { "ok" } else { "error" };
    counter!("department_ops_total", "op" => op, "result" => outcome).increment(1);
}

/// Request body for create and update.
#[derive(Debug, Deserialize)]
pub struct DepartmentRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub established_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ListDepartmentsQuery {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    sort_field: Option<String>,
    #[serde(default)]
    sort_direction: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<DepartmentRequest>,
) -> Result<(StatusCode, Json<DepartmentView>), ProblemResponse> {
    let result = state
        .departments()
        .create(
            &body.name,
            body.description.as_deref(),
            body.established_date,
        )
        .await;
    track("create", &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DepartmentView>, ProblemResponse> {
    let result = state.departments().get(id).await;
    track("get", &result);
    Ok(Json(result?))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListDepartmentsQuery>,
) -> Result<Json<CursorPageResponse<DepartmentView>>, ProblemResponse> {
    let cursor = query
        .cursor
        .as_deref()
        .map(pagetoken::decode)
        .transpose()
        .map_err(|err| ProblemResponse::bad_request("invalid_cursor", err.to_string()))?;
    let page_size = clamp_page_size(query.size);

    let result = state
        .departments()
        .list(
            cursor,
            query.search.as_deref(),
            query.sort_field.as_deref(),
            query.sort_direction.as_deref(),
            page_size,
        )
        .await;
    track("list", &result);
    let page = result?;
    Ok(Json(CursorPageResponse::from_page(page, |view| view)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<DepartmentRequest>,
) -> Result<Json<DepartmentView>, ProblemResponse> {
    let result = state
        .departments()
        .update(
            id,
            &body.name,
            body.description.as_deref(),
            body.established_date,
        )
        .await;
    track("update", &result);
    Ok(Json(result?))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ProblemResponse> {
    let result = state.departments().delete(id).await;
    track("delete", &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrbank_core::types::EmployeeStatus;
    use hrbank_storage::NewEmployee;

    async fn setup() -> (Database, DepartmentService) {
        let url = format!(
            "sqlite:file:departments_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        let service = DepartmentService::new(database.clone(), Arc::new(Utc::now));
        (database, service)
    }

    async fn add_employee(database: &Database, department_id: i64, email: &str) {
        let repo = database.employees();
        let mut tx = repo.begin().await.expect("begin");
        repo.insert(
            &mut tx,
            NewEmployee {
                employee_number: email,
                name: "Someone",
                email,
                department_id,
                position: None,
                status: EmployeeStatus::Active,
                hired_at: None,
                created_at: Utc::now(),
            },
        )
        .await
        .expect("insert employee");
        tx.commit().await.expect("commit");
    }

    #[tokio::test]
    async fn create_assigns_zero_employee_count() {
        let (_database, service) = setup().await;
        let view = service
            .create("Research", Some("R&D"), None)
            .await
            .expect("create");
        assert_eq!(view.department.name, "Research");
        assert_eq!(view.employee_count, 0);
    }

    #[tokio::test]
    async fn create_and_get_report_the_same_timestamps() {
        let (_database, service) = setup().await;
        let created = service.create("Research", None, None).await.expect("create");
        let reloaded = service.get(created.department.id).await.expect("get");

        // Utc::now carries nanoseconds; the store keeps milliseconds. Both
        // views must agree anyway.
        assert_eq!(reloaded.department.created_at, created.department.created_at);
        assert_eq!(reloaded.department.updated_at, created.department.updated_at);
    }

    #[tokio::test]
    async fn create_rejects_existing_names() {
        let (_database, service) = setup().await;
        service.create("Engineering", None, None).await.expect("create");

        let err = service.create("Engineering", None, None).await.unwrap_err();
        assert!(matches!(err, DepartmentServiceError::DuplicateName));
    }

    #[tokio::test]
    async fn blank_names_fail_validation() {
        let (_database, service) = setup().await;
        let err = service.create("   ", None, None).await.unwrap_err();
        assert!(matches!(err, DepartmentServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn get_missing_department_is_not_found() {
        let (_database, service) = setup().await;
        let err = service.get(12345).await.unwrap_err();
        assert!(matches!(err, DepartmentServiceError::NotFound));
    }

    #[tokio::test]
    async fn get_reports_live_employee_count() {
        let (database, service) = setup().await;
        let view = service.create("Engineering", None, None).await.expect("create");
        add_employee(&database, view.department.id, "a@example.com").await;
        add_employee(&database, view.department.id, "b@example.com").await;

        let reloaded = service.get(view.department.id).await.expect("get");
        assert_eq!(reloaded.employee_count, 2);
    }

    #[tokio::test]
    async fn renaming_to_a_taken_name_conflicts_but_self_rename_succeeds() {
        let (_database, service) = setup().await;
        service.create("Engineering", None, None).await.expect("create");
        let sales = service.create("Sales", None, None).await.expect("create");

        let err = service
            .update(sales.department.id, "Engineering", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DepartmentServiceError::DuplicateName));

        let unchanged = service
            .update(sales.department.id, "Sales", Some("Field sales"), None)
            .await
            .expect("self rename");
        assert_eq!(unchanged.department.name, "Sales");
        assert_eq!(unchanged.department.description.as_deref(), Some("Field sales"));
    }

    #[tokio::test]
    async fn update_missing_department_is_not_found() {
        let (_database, service) = setup().await;
        let err = service.update(777, "Ghost", None, None).await.unwrap_err();
        assert!(matches!(err, DepartmentServiceError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_blocked_while_occupied() {
        let (database, service) = setup().await;
        let view = service.create("Engineering", None, None).await.expect("create");
        add_employee(&database, view.department.id, "a@example.com").await;

        let err = service.delete(view.department.id).await.unwrap_err();
        assert!(matches!(err, DepartmentServiceError::HasEmployees(1)));

        // Still present after the refused delete.
        assert!(service.get(view.department.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_of_an_empty_department_is_final() {
        let (_database, service) = setup().await;
        let view = service.create("Engineering", None, None).await.expect("create");

        service.delete(view.department.id).await.expect("delete");
        let err = service.get(view.department.id).await.unwrap_err();
        assert!(matches!(err, DepartmentServiceError::NotFound));
    }

    #[tokio::test]
    async fn listing_concatenates_every_department_exactly_once() {
        let (_database, service) = setup().await;
        for name in ["A", "B", "C", "D", "E"] {
            service.create(name, None, None).await.expect("create");
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = service
                .list(cursor, None, None, None, 2)
                .await
                .expect("list");
            assert!(page.items.len() <= 2);
            seen.extend(page.items.iter().map(|view| view.department.name.clone()));
            if !page.has_next {
                assert_eq!(page.next_cursor, None);
                break;
            }
            cursor = page.next_cursor;
        }

        assert_eq!(seen, vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn listing_filters_by_search_text() {
        let (_database, service) = setup().await;
        service.create("Engineering", None, None).await.expect("create");
        service
            .create("Support", Some("customer engineering liaison"), None)
            .await
            .expect("create");
        service.create("Sales", None, None).await.expect("create");

        let page = service
            .list(None, Some("  ENGINEER "), None, None, 10)
            .await
            .expect("list");
        let names: Vec<&str> = page
            .items
            .iter()
            .map(|view| view.department.name.as_str())
            .collect();
        assert_eq!(names, vec!["Engineering", "Support"]);
        assert!(!page.has_next);
    }

    #[tokio::test]
    async fn listing_rejects_unsupported_sort_requests() {
        let (_database, service) = setup().await;
        let err = service
            .list(None, None, Some("name"), None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DepartmentServiceError::Validation(_)));

        let err = service
            .list(None, None, None, Some("desc"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, DepartmentServiceError::Validation(_)));
    }
}
