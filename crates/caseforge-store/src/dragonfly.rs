//! `Dragonfly` (Redis-compatible) hot state operations.
//!
//! `Dragonfly` holds the draft accumulator for every in-flight
//! generation run. The orchestrator checkpoints the accumulator here
//! after each successful stage, which is what makes resume-from-stage
//! possible after a crash or cancellation.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `draft:{draftId}` | JSON | Serialized [`GenerationState`] |

use caseforge_types::{DraftId, GenerationState};
use fred::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and provides typed draft
/// operations.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Serialize `value` as JSON and store it at `key`.
    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value)?;
        let _: () = self.client.set(key, json.as_str(), None, None, false).await?;
        Ok(())
    }

    /// Read the value at `key` and deserialize from JSON, `None` when
    /// the key does not exist.
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        value
            .map(|s| serde_json::from_str(&s).map_err(StoreError::Serialization))
            .transpose()
    }

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }

    /// Checkpoint a draft accumulator at `draft:{draftId}`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if serialization or the write fails.
    pub async fn put_draft(&self, state: &GenerationState) -> Result<(), StoreError> {
        self.set_json(&draft_key(state.draft_id), state).await
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
        self.get_json(&draft_key(draft_id)).await
    }

    /// Remove a draft after successful finalisation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the delete fails.
    pub async fn delete_draft(&self, draft_id: DraftId) -> Result<(), StoreError> {
        self.delete(&draft_key(draft_id)).await
    }
}

/// The hot-store key for a draft accumulator.
fn draft_key(draft_id: DraftId) -> String {
    format!("draft:{draft_id}")
}
