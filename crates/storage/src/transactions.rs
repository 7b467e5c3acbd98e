use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use staffbook_core::types::{display_name, RecordId, TransactionFilter, TransactionRecord};
use staffbook_core::validation::{NewTransaction, TransactionPatch};

use crate::{to_rfc3339, violation, Violation};

const TRANSACTION_SELECT: &str = r#"
SELECT t.id,
       t.employee_id,
       t.transaction_type,
       t.previous_department_id,
       pd.name AS previous_department_name,
       t.new_department_id,
       nd.name AS new_department_name,
       t.transaction_date,
       t.remarks,
       u.username,
       u.first_name,
       u.last_name
  FROM transactions AS t
  JOIN employees AS e ON e.id = t.employee_id
  JOIN users AS u ON u.id = e.user_id
  LEFT JOIN departments AS pd ON pd.id = t.previous_department_id
  LEFT JOIN departments AS nd ON nd.id = t.new_department_id
"#;

/// Repository for the employment transaction ledger.
#[derive(Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a ledger entry as part of a larger unit of work.
    pub async fn insert_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewTransaction,
    ) -> Result<RecordId, TransactionError> {
        sqlx::query_scalar(
            "INSERT INTO transactions \
             (employee_id, transaction_type, previous_department_id, new_department_id, transaction_date, remarks) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.employee_id)
        .bind(record.transaction_type.as_str())
        .bind(record.previous_department_id)
        .bind(record.new_department_id)
        .bind(to_rfc3339(record.transaction_date))
        .bind(&record.remarks)
        .fetch_one(&mut **tx)
        .await
        .map_err(TransactionError::from_write)
    }

    /// Appends a standalone ledger entry.
    pub async fn insert(&self, record: &NewTransaction) -> Result<RecordId, TransactionError> {
        let mut tx = self.pool.begin().await?;
        let id = self.insert_in(&mut tx, record).await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn fetch(&self, id: RecordId) -> Result<TransactionRecord, TransactionError> {
        let mut builder = QueryBuilder::<Sqlite>::new(TRANSACTION_SELECT);
        builder.push(" WHERE t.id = ").push_bind(id);
        builder
            .build_query_as::<TransactionRow>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TransactionError::NotFound)?
            .into_domain()
    }

    /// Lists entries matching every supplied filter, oldest first.
    pub async fn list(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionRecord>, TransactionError> {
        let mut builder = QueryBuilder::<Sqlite>::new(TRANSACTION_SELECT);
        builder.push(" WHERE 1 = 1");

        if let Some(employee_id) = filter.employee_id {
            builder.push(" AND t.employee_id = ").push_bind(employee_id);
        }
        if let Some(transaction_type) = &filter.transaction_type {
            builder
                .push(" AND t.transaction_type = ")
                .push_bind(transaction_type.clone());
        }
        // Stored dates share one fixed-width UTC format, so text order is time order.
        if let Some(range) = filter.date_range {
            builder
                .push(" AND t.transaction_date BETWEEN ")
                .push_bind(to_rfc3339(range.start))
                .push(" AND ")
                .push_bind(to_rfc3339(range.end));
        }
        builder.push(" ORDER BY t.transaction_date, t.id");

        builder
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect()
    }

    pub async fn list_for_employee(
        &self,
        employee_id: RecordId,
    ) -> Result<Vec<TransactionRecord>, TransactionError> {
        self.list(&TransactionFilter {
            employee_id: Some(employee_id),
            ..TransactionFilter::default()
        })
        .await
    }

    /// Applies a partial edit to an existing entry.
    pub async fn update(
        &self,
        id: RecordId,
        patch: &TransactionPatch,
    ) -> Result<TransactionRecord, TransactionError> {
        let current = self.fetch(id).await?;

        let transaction_type = patch
            .transaction_type
            .unwrap_or(current.transaction_type);
        let previous_department_id = patch
            .previous_department_id
            .unwrap_or(current.previous_department_id);
        let new_department_id = patch
            .new_department_id
            .unwrap_or(current.new_department_id);
        let transaction_date = patch
            .transaction_date
            .unwrap_or(current.transaction_date);
        let remarks = patch.remarks.clone().unwrap_or(current.remarks);

        let result = sqlx::query(
            "UPDATE transactions \
             SET transaction_type = ?, previous_department_id = ?, new_department_id = ?, \
                 transaction_date = ?, remarks = ? \
             WHERE id = ?",
        )
        .bind(transaction_type.as_str())
        .bind(previous_department_id)
        .bind(new_department_id)
        .bind(to_rfc3339(transaction_date))
        .bind(&remarks)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(TransactionError::from_write)?;

        if result.rows_affected() == 0 {
            return Err(TransactionError::NotFound);
        }
        self.fetch(id).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<(), TransactionError> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TransactionError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: RecordId,
    employee_id: RecordId,
    transaction_type: String,
    previous_department_id: Option<RecordId>,
    previous_department_name: Option<String>,
    new_department_id: Option<RecordId>,
    new_department_name: Option<String>,
    transaction_date: DateTime<Utc>,
    remarks: Option<String>,
    username: String,
    first_name: String,
    last_name: String,
}

impl TransactionRow {
    fn into_domain(self) -> Result<TransactionRecord, TransactionError> {
        let transaction_type = self
            .transaction_type
            .parse()
            .map_err(|_| TransactionError::UnknownType(self.transaction_type.clone()))?;
        Ok(TransactionRecord {
            id: self.id,
            employee_id: self.employee_id,
            employee: display_name(&self.username, &self.first_name, &self.last_name),
            transaction_type,
            previous_department_id: self.previous_department_id,
            previous_department: self.previous_department_name,
            new_department_id: self.new_department_id,
            new_department: self.new_department_name,
            transaction_date: self.transaction_date,
            remarks: self.remarks,
        })
    }
}

/// Errors that can occur while working with the ledger.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction not found")]
    NotFound,
    #[error("referenced employee or department does not exist")]
    MissingReference,
    #[error("stored transaction type {0} is not recognised")]
    UnknownType(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TransactionError {
    fn from_write(err: sqlx::Error) -> Self {
        match violation(&err) {
            Some(Violation::ForeignKey) => Self::MissingReference,
            _ => Self::Database(err),
        }
    }
}
