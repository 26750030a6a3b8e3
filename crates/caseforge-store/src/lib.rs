//! Data layer for the Caseforge generator (`Dragonfly` + `PostgreSQL`).
//!
//! `Dragonfly` serves as the write-heavy hot store for in-flight draft
//! accumulators, checkpointed after every successful pipeline stage.
//! `PostgreSQL` serves as the append-only cold store for finalized
//! cases. In-memory equivalents back tests and offline dry runs.
//!
//! # Architecture
//!
//! ```text
//! Pipeline run
//!     |
//!     +-- Checkpoint after each stage --> drafts  (Dragonfly | memory)
//!     |
//!     +-- Finalize once at the end ----> cases   (PostgreSQL | memory)
//! ```
//!
//! Backends are selected by enum dispatch rather than trait objects,
//! matching the async-method constraints used across the workspace.
//!
//! # Modules
//!
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) draft operations
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`case_store`] -- Append-only case insertion and querying
//! - [`memory`] -- In-memory backends for tests and dry runs
//! - [`error`] -- Shared error types

pub mod case_store;
pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod postgres;

use caseforge_types::{Case, DraftId, GenerationState};
use chrono::NaiveDate;

// Re-export primary types for convenience.
pub use case_store::PgCaseStore;
pub use dragonfly::DragonflyPool;
pub use error::StoreError;
pub use memory::{MemoryCaseStore, MemoryDraftStore};
pub use postgres::{PostgresConfig, PostgresPool};

/// The draft accumulator store (hot, mutable, one key per run).
#[derive(Clone)]
pub enum DraftStore {
    /// `Dragonfly`/Redis-backed drafts.
    Dragonfly(DragonflyPool),
    /// In-memory drafts for tests and dry runs.
    Memory(MemoryDraftStore),
}

impl DraftStore {
    /// Checkpoint a draft accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or the write fails.
    pub async fn put_draft(&self, state: &GenerationState) -> Result<(), StoreError> {
        match self {
            Self::Dragonfly(pool) => pool.put_draft(state).await,
            Self::Memory(store) => store.put_draft(state),
        }
    }

    /// Load a draft accumulator, `None` when no checkpoint exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read or deserialization fails.
    pub async fn get_draft(
        &self,
        draft_id: DraftId,
    ) -> Result<Option<GenerationState>, StoreError> {
        match self {
            Self::Dragonfly(pool) => pool.get_draft(draft_id).await,
            Self::Memory(store) => store.get_draft(draft_id),
        }
    }

    /// Remove a draft after successful finalisation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    pub async fn delete_draft(&self, draft_id: DraftId) -> Result<(), StoreError> {
        match self {
            Self::Dragonfly(pool) => pool.delete_draft(draft_id).await,
            Self::Memory(store) => store.delete_draft(draft_id),
        }
    }
}

/// The finalized case store (cold, append-only, one case per date).
#[derive(Clone)]
pub enum CaseStore {
    /// `PostgreSQL`-backed cases.
    Postgres(PostgresPool),
    /// In-memory cases for tests and dry runs.
    Memory(MemoryCaseStore),
}

impl CaseStore {
    /// Insert a finalized case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when a case for the date is
    /// already stored.
    pub async fn insert(&self, case: &Case) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => PgCaseStore::new(pool.pool()).insert(case).await,
            Self::Memory(store) => store.insert(case),
        }
    }

    /// Fetch the case for a date, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn get(&self, case_date: NaiveDate) -> Result<Option<Case>, StoreError> {
        match self {
            Self::Postgres(pool) => PgCaseStore::new(pool.pool()).get(case_date).await,
            Self::Memory(store) => store.get(case_date),
        }
    }
}
