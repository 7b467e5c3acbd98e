use sqlx::SqlitePool;
use thiserror::Error;

use staffbook_core::types::{Department, RecordId};
use staffbook_core::validation::{DepartmentPatch, NewDepartment};

use crate::{violation, Violation};

/// Repository for the `departments` table.
#[derive(Clone)]
pub struct DepartmentRepository {
    pool: SqlitePool,
}

impl DepartmentRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a department and returns the stored row.
    pub async fn insert(&self, record: &NewDepartment) -> Result<Department, DepartmentError> {
        let id: RecordId = sqlx::query_scalar(
            "INSERT INTO departments (name, description) VALUES (?, ?) RETURNING id",
        )
        .bind(&record.name)
        .bind(&record.description)
        .fetch_one(&self.pool)
        .await
        .map_err(DepartmentError::from_write)?;

        Ok(Department {
            id,
            name: record.name.clone(),
            description: record.description.clone(),
        })
    }

    pub async fn fetch(&self, id: RecordId) -> Result<Department, DepartmentError> {
        sqlx::query_as::<_, DepartmentRow>(
            "SELECT id, name, description FROM departments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(DepartmentRow::into_domain)
        .ok_or(DepartmentError::NotFound)
    }

    pub async fn exists(&self, id: RecordId) -> Result<bool, DepartmentError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM departments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Lists every department ordered by id.
    pub async fn list(&self) -> Result<Vec<Department>, DepartmentError> {
        let rows = sqlx::query_as::<_, DepartmentRow>(
            "SELECT id, name, description FROM departments ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DepartmentRow::into_domain).collect())
    }

    /// Applies a partial update, leaving absent fields untouched.
    pub async fn update(
        &self,
        id: RecordId,
        patch: &DepartmentPatch,
    ) -> Result<Department, DepartmentError> {
        let current = self.fetch(id).await?;
        let updated = Department {
            id,
            name: patch.name.clone().unwrap_or(current.name),
            description: patch.description.clone().unwrap_or(current.description),
        };

        let result = sqlx::query("UPDATE departments SET name = ?, description = ? WHERE id = ?")
            .bind(&updated.name)
            .bind(&updated.description)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DepartmentError::from_write)?;

        if result.rows_affected() == 0 {
            return Err(DepartmentError::NotFound);
        }
        Ok(updated)
    }

    /// Deletes a department together with its employees.
    ///
    /// Identity records of the department's employees go first; their removal cascades to the
    /// employee rows and those employees' transactions. Dropping the department itself then
    /// nulls the previous/new department references of the remaining ledger entries.
    pub async fn delete(&self, id: RecordId) -> Result<(), DepartmentError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM users \
             WHERE id IN (SELECT user_id FROM employees WHERE department_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM departments WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DepartmentError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DepartmentRow {
    id: RecordId,
    name: String,
    description: Option<String>,
}

impl DepartmentRow {
    fn into_domain(self) -> Department {
        Department {
            id: self.id,
            name: self.name,
            description: self.description,
        }
    }
}

/// Errors that can occur while working with departments.
#[derive(Debug, Error)]
pub enum DepartmentError {
    #[error("department not found")]
    NotFound,
    #[error("department with this name already exists")]
    DuplicateName,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl DepartmentError {
    fn from_write(err: sqlx::Error) -> Self {
        match violation(&err) {
            Some(Violation::Unique(_)) => Self::DuplicateName,
            _ => Self::Database(err),
        }
    }
}
