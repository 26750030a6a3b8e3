//! Cold-store operations on the `cases` table.
//!
//! Finalized cases are append-only: one case per calendar date, written
//! exactly once at the end of a successful run. The full case is stored
//! as a JSONB payload alongside the columns worth querying directly.

use caseforge_types::Case;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::error::StoreError;

/// Operations on the `cases` table.
pub struct PgCaseStore<'a> {
    pool: &'a PgPool,
}

impl<'a> PgCaseStore<'a> {
    /// Create a new case store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a finalized case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a case for the date is
    /// already stored (the table is append-only), or
    /// [`StoreError::Postgres`] for any other failure.
    pub async fn insert(&self, case: &Case) -> Result<(), StoreError> {
        let payload = serde_json::to_value(case)?;
        let difficulty = serde_json::to_value(case.difficulty)?
            .as_str()
            .unwrap_or("medium")
            .to_owned();

        let result = sqlx::query(
            r"INSERT INTO cases (case_date, title, difficulty, payload, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(case.case_date)
        .bind(&case.title)
        .bind(difficulty)
        .bind(&payload)
        .bind(case.generated_at)
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(case_date = %case.case_date, "Inserted case");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::AlreadyExists(case.case_date.to_string()))
            }
            Err(e) => Err(StoreError::Postgres(e)),
        }
    }

    /// Fetch the case for a date, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Postgres`] if the query fails.
    pub async fn get(&self, case_date: NaiveDate) -> Result<Option<Case>, StoreError> {
        let payload: Option<serde_json::Value> = sqlx::query_scalar(
            r"SELECT payload FROM cases WHERE case_date = $1",
        )
        .bind(case_date)
        .fetch_optional(self.pool)
        .await?;

        payload
            .map(|p| serde_json::from_value(p).map_err(StoreError::Serialization))
            .transpose()
    }
}
