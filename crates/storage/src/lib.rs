use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use hrbank_core::pagination::PageCursor;
use hrbank_core::types::{
    Department, Employee, EmployeeChangeType, EmployeeLog, EmployeeStatus,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for interacting with department records.
    pub fn departments(&self) -> DepartmentRepository {
        DepartmentRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with employee records.
    pub fn employees(&self) -> EmployeeRepository {
        EmployeeRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with the employee audit log.
    pub fn employee_logs(&self) -> EmployeeLogRepository {
        EmployeeLogRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `departments` table.
#[derive(Clone)]
pub struct DepartmentRepository {
    pool: SqlitePool,
}

impl DepartmentRepository {
    /// Inserts a new department, mapping the unique-name index violation.
    pub async fn insert(&self, record: NewDepartment<'_>) -> Result<Department, DepartmentError> {
        let created_at = to_rfc3339(record.created_at);
        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO departments (name, description, established_date, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.name)
        .bind(record.description)
        .bind(record.established_date)
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await;

        let id = result.map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("2067") {
                    DepartmentError::DuplicateName
                } else {
                    DepartmentError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => DepartmentError::Database(other),
        })?;

        Ok(Department {
            id,
            name: record.name.to_string(),
            description: record.description.map(str::to_string),
            established_date: record.established_date,
            created_at: record.created_at,
            updated_at: record.created_at,
        })
    }

    /// Loads a department by id.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Department>, DepartmentError> {
        let row = sqlx::query_as::<_, DepartmentRow>(
            "SELECT id, name, description, established_date, created_at, updated_at \
             FROM departments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DepartmentRow::into_domain))
    }

    /// Returns `true` when a department with the given name exists.
    pub async fn exists_by_name(&self, name: &str) -> Result<bool, DepartmentError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE name = ?)",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Like [`exists_by_name`](Self::exists_by_name), but a department's own
    /// row never counts as a collision. Used on rename.
    pub async fn exists_by_name_excluding(
        &self,
        name: &str,
        id: i64,
    ) -> Result<bool, DepartmentError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE name = ? AND id != ?)",
        )
        .bind(name)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Rewrites the mutable fields of a department.
    pub async fn update(
        &self,
        id: i64,
        changes: DepartmentChanges<'_>,
    ) -> Result<Department, DepartmentError> {
        let result = sqlx::query_as::<_, DepartmentRow>(
            "UPDATE departments \
             SET name = ?, description = ?, established_date = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING id, name, description, established_date, created_at, updated_at",
        )
        .bind(changes.name)
        .bind(changes.description)
        .bind(changes.established_date)
        .bind(to_rfc3339(changes.updated_at))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        let row = result.map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("2067") {
                    DepartmentError::DuplicateName
                } else {
                    DepartmentError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => DepartmentError::Database(other),
        })?;

        row.map(DepartmentRow::into_domain)
            .ok_or(DepartmentError::NotFound)
    }

    /// Deletes a department row.
    ///
    /// The service checks occupancy first, but an employee inserted between
    /// that check and this statement trips the foreign key instead; the
    /// violation is mapped so the race loser still sees the occupancy error.
    pub async fn delete(&self, id: i64) -> Result<(), DepartmentError> {
        let result = sqlx::query("DELETE FROM departments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("787") => {
                    DepartmentError::HasEmployees
                }
                other => DepartmentError::Database(other),
            })?;

        if result.rows_affected() == 0 {
            return Err(DepartmentError::NotFound);
        }
        Ok(())
    }

    /// Fetches up to `limit` departments strictly after the cursor in
    /// ascending (created_at, id) order, optionally filtered by a
    /// case-insensitive substring match on name or description.
    ///
    /// Timestamps are stored as fixed-width RFC3339 UTC strings, so the text
    /// comparison in SQL agrees with chronological order.
    pub async fn find_page(
        &self,
        cursor: Option<PageCursor>,
        search: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Department>, DepartmentError> {
        let cursor_at = cursor.map(|cursor| to_rfc3339(cursor.at));
        let cursor_id = cursor.map(|cursor| cursor.id).unwrap_or(0);
        let pattern = search.map(like_pattern);

        let rows = sqlx::query_as::<_, DepartmentRow>(
            "SELECT id, name, description, established_date, created_at, updated_at \
             FROM departments \
             WHERE (?1 IS NULL OR created_at > ?1 OR (created_at = ?1 AND id > ?2)) \
               AND (?3 IS NULL \
                    OR LOWER(name) LIKE ?3 \
                    OR LOWER(COALESCE(description, '')) LIKE ?3) \
             ORDER BY created_at ASC, id ASC \
             LIMIT ?4",
        )
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DepartmentRow::into_domain).collect())
    }

    /// Live employee count for a department. Never cached: the count is a
    /// view over rows the department does not own.
    pub async fn count_employees(&self, id: i64) -> Result<i64, DepartmentError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM employees WHERE department_id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Data required to create a department row.
#[derive(Debug, Clone)]
pub struct NewDepartment<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub established_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Replacement values for a department's mutable fields.
#[derive(Debug, Clone)]
pub struct DepartmentChanges<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub established_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// Errors raised by department row operations.
#[derive(Debug, Error)]
pub enum DepartmentError {
    #[error("department name is already in use")]
    DuplicateName,
    #[error("department not found")]
    NotFound,
    #[error("department still has employees assigned")]
    HasEmployees,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct DepartmentRow {
    id: i64,
    name: String,
    description: Option<String>,
    established_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepartmentRow {
    fn into_domain(self) -> Department {
        Department {
            id: self.id,
            name: self.name,
            description: self.description,
            established_date: self.established_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Repository for the `employees` table.
///
/// Mutations take an explicit transaction so callers can pair the row change
/// with its audit-log entry atomically.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

impl EmployeeRepository {
    /// Begins a SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Inserts a new employee row, mapping the unique-email violation and
    /// the missing-department foreign key violation.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: NewEmployee<'_>,
    ) -> Result<i64, EmployeeError> {
        let created_at = to_rfc3339(record.created_at);
        let result = sqlx::query_scalar::<_, i64>(
            "INSERT INTO employees \
             (employee_number, name, email, department_id, position, status, hired_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.employee_number)
        .bind(record.name)
        .bind(record.email)
        .bind(record.department_id)
        .bind(record.position)
        .bind(record.status.as_str())
        .bind(record.hired_at)
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&mut **tx)
        .await;

        result.map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    if code == "2067" {
                        return EmployeeError::DuplicateEmail;
                    }
                    if code == "787" {
                        return EmployeeError::MissingDepartment;
                    }
                }
                EmployeeError::Database(sqlx::Error::Database(db_err))
            }
            other => EmployeeError::Database(other),
        })
    }

    /// Loads an employee by id.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Employee>, EmployeeError> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            "SELECT id, employee_number, name, email, department_id, position, status, \
                    hired_at, created_at, updated_at \
             FROM employees WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EmployeeRow::into_domain))
    }

    /// Rewrites the mutable fields of an employee.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        changes: EmployeeChanges<'_>,
    ) -> Result<Employee, EmployeeError> {
        let result = sqlx::query_as::<_, EmployeeRow>(
            "UPDATE employees \
             SET name = ?, email = ?, department_id = ?, position = ?, status = ?, \
                 hired_at = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING id, employee_number, name, email, department_id, position, status, \
                       hired_at, created_at, updated_at",
        )
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.department_id)
        .bind(changes.position)
        .bind(changes.status.as_str())
        .bind(changes.hired_at)
        .bind(to_rfc3339(changes.updated_at))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await;

        let row = result.map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    if code == "2067" {
                        return EmployeeError::DuplicateEmail;
                    }
                    if code == "787" {
                        return EmployeeError::MissingDepartment;
                    }
                }
                EmployeeError::Database(sqlx::Error::Database(db_err))
            }
            other => EmployeeError::Database(other),
        })?;

        row.map(EmployeeRow::into_domain)
            .ok_or(EmployeeError::NotFound)
    }

    /// Deletes an employee row.
    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), EmployeeError> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EmployeeError::NotFound);
        }
        Ok(())
    }

    /// Fetches up to `limit` employees strictly after the cursor in ascending
    /// (created_at, id) order. Every filter is optional: status, a
    /// case-insensitive substring match on name or email, the owning
    /// department's name, and the position title.
    pub async fn find_page(
        &self,
        cursor: Option<PageCursor>,
        filter: EmployeeFilter<'_>,
        limit: usize,
    ) -> Result<Vec<Employee>, EmployeeError> {
        let cursor_at = cursor.map(|cursor| to_rfc3339(cursor.at));
        let cursor_id = cursor.map(|cursor| cursor.id).unwrap_or(0);
        let search = filter.search.map(like_pattern);
        let department = filter.department.map(like_pattern);
        let position = filter.position.map(like_pattern);

        let rows = sqlx::query_as::<_, EmployeeRow>(
            "SELECT e.id, e.employee_number, e.name, e.email, e.department_id, e.position, \
                    e.status, e.hired_at, e.created_at, e.updated_at \
             FROM employees e \
             JOIN departments d ON d.id = e.department_id \
             WHERE (?1 IS NULL OR e.created_at > ?1 OR (e.created_at = ?1 AND e.id > ?2)) \
               AND (?3 IS NULL OR e.status = ?3) \
               AND (?4 IS NULL OR LOWER(e.name) LIKE ?4 OR LOWER(e.email) LIKE ?4) \
               AND (?5 IS NULL OR LOWER(d.name) LIKE ?5) \
               AND (?6 IS NULL OR LOWER(COALESCE(e.position, '')) LIKE ?6) \
             ORDER BY e.created_at ASC, e.id ASC \
             LIMIT ?7",
        )
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(filter.status.map(EmployeeStatus::as_str))
        .bind(search)
        .bind(department)
        .bind(position)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EmployeeRow::into_domain).collect())
    }

    /// Counts employees, optionally restricted by status and by a hire-date
    /// range. Rows without a hire date are excluded once either bound is
    /// given.
    pub async fn count_filtered(
        &self,
        status: Option<EmployeeStatus>,
        hired_from: Option<NaiveDate>,
        hired_to: Option<NaiveDate>,
    ) -> Result<i64, EmployeeError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM employees \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR hired_at >= ?2) \
               AND (?3 IS NULL OR hired_at <= ?3)",
        )
        .bind(status.map(EmployeeStatus::as_str))
        .bind(hired_from)
        .bind(hired_to)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

/// Optional filters for the employee listing scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmployeeFilter<'a> {
    pub status: Option<EmployeeStatus>,
    pub search: Option<&'a str>,
    pub department: Option<&'a str>,
    pub position: Option<&'a str>,
}

/// Data required to create an employee row.
#[derive(Debug, Clone)]
pub struct NewEmployee<'a> {
    pub employee_number: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub department_id: i64,
    pub position: Option<&'a str>,
    pub status: EmployeeStatus,
    pub hired_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Replacement values for an employee's mutable fields.
#[derive(Debug, Clone)]
pub struct EmployeeChanges<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub department_id: i64,
    pub position: Option<&'a str>,
    pub status: EmployeeStatus,
    pub hired_at: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// Errors raised by employee row operations.
#[derive(Debug, Error)]
pub enum EmployeeError {
    #[error("employee email is already in use")]
    DuplicateEmail,
    #[error("referenced department does not exist")]
    MissingDepartment,
    #[error("employee not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeRow {
    id: i64,
    employee_number: String,
    name: String,
    email: String,
    department_id: i64,
    position: Option<String>,
    status: String,
    hired_at: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EmployeeRow {
    fn into_domain(self) -> Employee {
        let status = EmployeeStatus::parse(&self.status).unwrap_or(EmployeeStatus::Active);
        Employee {
            id: self.id,
            employee_number: self.employee_number,
            name: self.name,
            email: self.email,
            department_id: self.department_id,
            position: self.position,
            status,
            hired_at: self.hired_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Repository for the `employee_logs` audit table.
#[derive(Clone)]
pub struct EmployeeLogRepository {
    pool: SqlitePool,
}

impl EmployeeLogRepository {
    /// Appends an audit entry inside the caller's transaction.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: NewEmployeeLog<'_>,
    ) -> Result<i64, EmployeeLogError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO employee_logs (employee_id, change_type, memo, changed_at) \
             VALUES (?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.employee_id)
        .bind(record.change_type.as_str())
        .bind(record.memo)
        .bind(to_rfc3339(record.changed_at))
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }

    /// Fetches up to `limit` audit entries strictly before the cursor in
    /// descending (changed_at, id) order. The audit trail reads newest-first.
    pub async fn find_page(
        &self,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<Vec<EmployeeLog>, EmployeeLogError> {
        let cursor_at = cursor.map(|cursor| to_rfc3339(cursor.at));
        let cursor_id = cursor.map(|cursor| cursor.id).unwrap_or(0);

        let rows = sqlx::query_as::<_, EmployeeLogRow>(
            "SELECT id, employee_id, change_type, memo, changed_at \
             FROM employee_logs \
             WHERE (?1 IS NULL OR changed_at < ?1 OR (changed_at = ?1 AND id < ?2)) \
             ORDER BY changed_at DESC, id DESC \
             LIMIT ?3",
        )
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EmployeeLogRow::into_domain).collect())
    }
}

/// Data required to append an audit entry.
#[derive(Debug, Clone)]
pub struct NewEmployeeLog<'a> {
    pub employee_id: i64,
    pub change_type: EmployeeChangeType,
    pub memo: Option<&'a str>,
    pub changed_at: DateTime<Utc>,
}

/// Errors raised by audit log operations.
#[derive(Debug, Error)]
pub enum EmployeeLogError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeLogRow {
    id: i64,
    employee_id: i64,
    change_type: String,
    memo: Option<String>,
    changed_at: DateTime<Utc>,
}

impl EmployeeLogRow {
    fn into_domain(self) -> EmployeeLog {
        let change_type =
            EmployeeChangeType::parse(&self.change_type).unwrap_or(EmployeeChangeType::Updated);
        EmployeeLog {
            id: self.id,
            employee_id: self.employee_id,
            change_type,
            memo: self.memo,
            changed_at: self.changed_at,
        }
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn like_pattern(search: &str) -> String {
    format!("%{}%", search.to_lowercase())
}
