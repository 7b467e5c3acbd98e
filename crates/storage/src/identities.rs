use sqlx::{Sqlite, Transaction};
use thiserror::Error;

use staffbook_core::types::RecordId;
use staffbook_core::validation::{NewPerson, PersonPatch};

use crate::{violation, Violation};

/// Repository for the `users` identity table.
///
/// Identity rows are only written as part of an employee unit of work, so every operation takes
/// the caller's transaction.
#[derive(Clone, Default)]
pub struct IdentityRepository;

impl IdentityRepository {
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewPerson,
    ) -> Result<RecordId, IdentityError> {
        sqlx::query_scalar(
            "INSERT INTO users (username, first_name, last_name, search_text) \
             VALUES (?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(&record.username)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(search_text(&record.username, &record.first_name, &record.last_name))
        .fetch_one(&mut **tx)
        .await
        .map_err(IdentityError::from_write)
    }

    /// Updates the supplied name parts of identity `id`.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: RecordId,
        patch: &PersonPatch,
    ) -> Result<(), IdentityError> {
        if patch.is_empty() {
            return Ok(());
        }

        let (username, first_name, last_name) = sqlx::query_as::<_, (String, String, String)>(
            "SELECT username, first_name, last_name FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(IdentityError::NotFound)?;

        let username = patch.username.clone().unwrap_or(username);
        let first_name = patch.first_name.clone().unwrap_or(first_name);
        let last_name = patch.last_name.clone().unwrap_or(last_name);

        sqlx::query(
            "UPDATE users \
             SET username = ?, first_name = ?, last_name = ?, search_text = ? \
             WHERE id = ?",
        )
        .bind(&username)
        .bind(&first_name)
        .bind(&last_name)
        .bind(search_text(&username, &first_name, &last_name))
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(IdentityError::from_write)?;
        Ok(())
    }
}

/// Case-folded text the employee name filter matches against.
///
/// SQLite's `LIKE` only folds ASCII, so both this column and the needle are lowercased in Rust.
/// The newline keeps a needle from matching across the username and the full name.
pub(crate) fn search_text(username: &str, first_name: &str, last_name: &str) -> String {
    format!("{username}\n{first_name} {last_name}").to_lowercase()
}

/// Errors that can occur while writing identity records.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity record not found")]
    NotFound,
    #[error("a user with that username already exists")]
    DuplicateUsername,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IdentityError {
    fn from_write(err: sqlx::Error) -> Self {
        match violation(&err) {
            Some(Violation::Unique(_)) => Self::DuplicateUsername,
            _ => Self::Database(err),
        }
    }
}
