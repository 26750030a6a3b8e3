//! In-memory store backends.
//!
//! Used by tests and offline dry runs so the full pipeline (including
//! checkpointing and finalisation) can execute without Dragonfly or
//! `PostgreSQL`. Cloning shares the underlying maps, so a test can keep
//! a handle after moving a clone into the orchestrator.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use caseforge_types::{Case, DraftId, GenerationState};
use chrono::NaiveDate;

use crate::error::StoreError;

/// In-memory draft accumulator store.
#[derive(Clone, Default)]
pub struct MemoryDraftStore {
    drafts: Arc<Mutex<BTreeMap<DraftId, GenerationState>>>,
}

impl MemoryDraftStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checkpoint a draft accumulator.
    pub fn put_draft(&self, state: &GenerationState) -> Result<(), StoreError> {
        if let Ok(mut drafts) = self.drafts.lock() {
            drafts.insert(state.draft_id, state.clone());
        }
        Ok(())
    }

    /// Load a draft accumulator, `None` when no checkpoint exists.
    pub fn get_draft(&self, draft_id: DraftId) -> Result<Option<GenerationState>, StoreError> {
        Ok(self
            .drafts
            .lock()
            .ok()
            .and_then(|drafts| drafts.get(&draft_id).cloned()))
    }

    /// Remove a draft after successful finalisation.
    pub fn delete_draft(&self, draft_id: DraftId) -> Result<(), StoreError> {
        if let Ok(mut drafts) = self.drafts.lock() {
            drafts.remove(&draft_id);
        }
        Ok(())
    }

    /// Number of drafts currently checkpointed.
    pub fn len(&self) -> usize {
        self.drafts.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// The first checkpointed draft by draft id, if any. Handy for
    /// tests recovering a checkpoint without knowing its id.
    pub fn first_draft(&self) -> Option<GenerationState> {
        self.drafts
            .lock()
            .ok()
            .and_then(|drafts| drafts.values().next().cloned())
    }

    /// Whether no drafts are checkpointed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory finalized case store.
#[derive(Clone, Default)]
pub struct MemoryCaseStore {
    cases: Arc<Mutex<BTreeMap<NaiveDate, Case>>>,
}

impl MemoryCaseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a finalized case; append-only per date.
    pub fn insert(&self, case: &Case) -> Result<(), StoreError> {
        let Ok(mut cases) = self.cases.lock() else {
            return Ok(());
        };
        if cases.contains_key(&case.case_date) {
            return Err(StoreError::AlreadyExists(case.case_date.to_string()));
        }
        cases.insert(case.case_date, case.clone());
        Ok(())
    }

    /// Fetch the case for a date, `None` when absent.
    pub fn get(&self, case_date: NaiveDate) -> Result<Option<Case>, StoreError> {
        Ok(self
            .cases
            .lock()
            .ok()
            .and_then(|cases| cases.get(&case_date).cloned()))
    }
}
