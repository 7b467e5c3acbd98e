use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use staffbook_core::hierarchy::ManagerEdge;
use staffbook_core::types::{display_name, Department, Employee, EmployeeFilter, Person, RecordId};
use staffbook_core::validation::{EmployeePatch, NewEmployee};

use crate::{like_pattern, violation, Violation};

const EMPLOYEE_SELECT: &str = r#"
SELECT e.id,
       e.email,
       e.phone,
       e.designation,
       e.manager_id,
       u.id AS user_id,
       u.username,
       u.first_name,
       u.last_name,
       d.id AS department_id,
       d.name AS department_name,
       d.description AS department_description,
       mu.username AS manager_username,
       mu.first_name AS manager_first_name,
       mu.last_name AS manager_last_name
  FROM employees AS e
  JOIN users AS u ON u.id = e.user_id
  JOIN departments AS d ON d.id = e.department_id
  LEFT JOIN employees AS m ON m.id = e.manager_id
  LEFT JOIN users AS mu ON mu.id = m.user_id
"#;

/// Repository for the `employees` table.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

impl EmployeeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the employee row for an identity created in the same transaction.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        person_id: RecordId,
        record: &NewEmployee,
    ) -> Result<RecordId, EmployeeError> {
        sqlx::query_scalar(
            "INSERT INTO employees (user_id, email, phone, designation, department_id, manager_id) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(person_id)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.designation)
        .bind(record.department_id)
        .bind(record.manager_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(EmployeeError::from_write)
    }

    pub async fn fetch(&self, id: RecordId) -> Result<Employee, EmployeeError> {
        let mut builder = QueryBuilder::<Sqlite>::new(EMPLOYEE_SELECT);
        builder.push(" WHERE e.id = ").push_bind(id);
        builder
            .build_query_as::<EmployeeRow>()
            .fetch_optional(&self.pool)
            .await?
            .map(EmployeeRow::into_domain)
            .ok_or(EmployeeError::NotFound)
    }

    pub async fn exists(&self, id: RecordId) -> Result<bool, EmployeeError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM employees WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Reads the foreign keys of an employee inside a unit of work.
    pub async fn locate(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: RecordId,
    ) -> Result<EmployeeKeys, EmployeeError> {
        sqlx::query_as::<_, EmployeeKeys>(
            "SELECT id, user_id, department_id, manager_id FROM employees WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EmployeeError::NotFound)
    }

    /// Lists employees matching every supplied filter, ordered by id.
    ///
    /// The name filter is a case-insensitive substring match against the username, either
    /// name part, or "first last". Case folding is Unicode-aware.
    pub async fn list(&self, filter: &EmployeeFilter) -> Result<Vec<Employee>, EmployeeError> {
        let mut builder = QueryBuilder::<Sqlite>::new(EMPLOYEE_SELECT);
        builder.push(" WHERE 1 = 1");

        if let Some(name) = filter.name.as_deref() {
            // `search_text` is stored lowercased; see `identities::search_text`.
            builder
                .push(" AND u.search_text LIKE ")
                .push_bind(like_pattern(&name.to_lowercase()))
                .push(" ESCAPE '\\'");
        }
        if let Some(department_id) = filter.department_id {
            builder
                .push(" AND e.department_id = ")
                .push_bind(department_id);
        }
        builder.push(" ORDER BY e.id");

        let rows = builder
            .build_query_as::<EmployeeRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EmployeeRow::into_domain).collect())
    }

    /// Lists the direct reports of `manager_id`, ordered by id.
    pub async fn list_subordinates(
        &self,
        manager_id: RecordId,
    ) -> Result<Vec<Employee>, EmployeeError> {
        let mut builder = QueryBuilder::<Sqlite>::new(EMPLOYEE_SELECT);
        builder
            .push(" WHERE e.manager_id = ")
            .push_bind(manager_id)
            .push(" ORDER BY e.id");
        let rows = builder
            .build_query_as::<EmployeeRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EmployeeRow::into_domain).collect())
    }

    /// Loads the whole manager relation for a hierarchy walk.
    pub async fn manager_edges(&self) -> Result<Vec<ManagerEdge>, EmployeeError> {
        let edges = sqlx::query_as::<_, (RecordId, Option<RecordId>)>(
            "SELECT id, manager_id FROM employees",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(edges)
    }

    /// Writes the employee-table columns present in `patch`.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: RecordId,
        patch: &EmployeePatch,
    ) -> Result<(), EmployeeError> {
        if patch.has_no_employee_fields() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE employees SET ");
        {
            let mut assignments = builder.separated(", ");
            if let Some(email) = &patch.email {
                assignments.push("email = ").push_bind_unseparated(email.clone());
            }
            if let Some(phone) = &patch.phone {
                assignments.push("phone = ").push_bind_unseparated(phone.clone());
            }
            if let Some(designation) = &patch.designation {
                assignments
                    .push("designation = ")
                    .push_bind_unseparated(designation.clone());
            }
            if let Some(department_id) = patch.department_id {
                assignments
                    .push("department_id = ")
                    .push_bind_unseparated(department_id);
            }
            if let Some(manager_id) = patch.manager_id {
                assignments
                    .push("manager_id = ")
                    .push_bind_unseparated(manager_id);
            }
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(EmployeeError::from_write)?;
        if result.rows_affected() == 0 {
            return Err(EmployeeError::NotFound);
        }
        Ok(())
    }

    /// Points employee `id` at `manager_id`.
    pub async fn set_manager(
        &self,
        id: RecordId,
        manager_id: RecordId,
    ) -> Result<(), EmployeeError> {
        let result = sqlx::query("UPDATE employees SET manager_id = ? WHERE id = ?")
            .bind(manager_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(EmployeeError::from_write)?;
        if result.rows_affected() == 0 {
            return Err(EmployeeError::NotFound);
        }
        Ok(())
    }

    /// Deletes the employee by removing its identity record.
    ///
    /// The cascade removes the employee row and its transactions; reports of the employee keep
    /// existing with their manager cleared.
    pub async fn delete(&self, id: RecordId) -> Result<(), EmployeeError> {
        let result = sqlx::query(
            "DELETE FROM users WHERE id = (SELECT user_id FROM employees WHERE id = ?)",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EmployeeError::NotFound);
        }
        Ok(())
    }
}

/// Foreign keys of an employee row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct EmployeeKeys {
    pub id: RecordId,
    pub user_id: RecordId,
    pub department_id: RecordId,
    pub manager_id: Option<RecordId>,
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeRow {
    id: RecordId,
    email: Option<String>,
    phone: Option<String>,
    designation: Option<String>,
    manager_id: Option<RecordId>,
    user_id: RecordId,
    username: String,
    first_name: String,
    last_name: String,
    department_id: RecordId,
    department_name: String,
    department_description: Option<String>,
    manager_username: Option<String>,
    manager_first_name: Option<String>,
    manager_last_name: Option<String>,
}

impl EmployeeRow {
    fn into_domain(self) -> Employee {
        let manager = self.manager_username.as_deref().map(|username| {
            display_name(
                username,
                self.manager_first_name.as_deref().unwrap_or_default(),
                self.manager_last_name.as_deref().unwrap_or_default(),
            )
        });
        Employee {
            id: self.id,
            user: Person {
                id: self.user_id,
                username: self.username,
                first_name: self.first_name,
                last_name: self.last_name,
            },
            email: self.email,
            phone: self.phone,
            designation: self.designation,
            department: Department {
                id: self.department_id,
                name: self.department_name,
                description: self.department_description,
            },
            manager_id: self.manager_id,
            manager,
        }
    }
}

/// Errors that can occur while working with employees.
#[derive(Debug, Error)]
pub enum EmployeeError {
    #[error("employee not found")]
    NotFound,
    #[error("employee with this email already exists")]
    DuplicateEmail,
    #[error("referenced department or manager does not exist")]
    MissingReference,
    #[error("an employee cannot be their own manager")]
    SelfManagement,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EmployeeError {
    fn from_write(err: sqlx::Error) -> Self {
        match violation(&err) {
            Some(Violation::Unique(_)) => Self::DuplicateEmail,
            Some(Violation::ForeignKey) => Self::MissingReference,
            Some(Violation::Check) => Self::SelfManagement,
            None => Self::Database(err),
        }
    }
}
