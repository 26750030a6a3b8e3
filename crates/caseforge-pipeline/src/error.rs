//! Error types for the generation pipeline.
//!
//! Distinguishes three failure classes: retryable attempt failures
//! (malformed model output, surfaced back to the generator as repair
//! context), budget exhaustion ([`PipelineError::StageFailed`], the
//! terminal "this run is dead" error carrying the last validator
//! output), and fatal invariant violations that indicate a bug rather
//! than a bad generation.

use caseforge_llm::LlmError;
use caseforge_store::StoreError;
use caseforge_types::Stage;

/// Errors that can abort a generation run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The run input failed schema validation; nothing was executed.
    #[error("invalid run input: {0}")]
    InvalidInput(String),

    /// The requested resume stage is not a valid resume point.
    #[error("cannot resume from stage {0}: the template seeds the whole run")]
    InvalidResume(Stage),

    /// A stage exhausted its retry budget.
    #[error("stage {stage} failed: {reason}")]
    StageFailed {
        /// The stage that exhausted its budget.
        stage: Stage,
        /// Why the final attempt was rejected.
        reason: String,
        /// The last validator error list, for operator inspection.
        last_errors: Vec<String>,
    },

    /// Model output parsed as JSON but did not match the stage's
    /// expected shape. Retryable: fed back as repair context.
    #[error("stage {stage} returned malformed output: {message}")]
    Malformed {
        /// The stage whose output was malformed.
        stage: Stage,
        /// The deserialization failure.
        message: String,
    },

    /// A stage needs a field an earlier stage should have written.
    /// Indicates a resume from the wrong stage or a programming bug.
    #[error("stage {stage} requires missing state field: {field}")]
    MissingField {
        /// The stage that needed the field.
        stage: Stage,
        /// The absent accumulator field.
        field: &'static str,
    },

    /// A deterministic invariant failed; the case is not shippable.
    #[error("fatal error in stage {stage}: {message}")]
    Fatal {
        /// The stage that detected the violation.
        stage: Stage,
        /// Details, including offending ids where applicable.
        message: String,
    },

    /// A model-layer failure.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Whether the orchestrator should count this error as a failed
    /// attempt and retry the stage (budget permitting) instead of
    /// aborting the run.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Malformed { .. } => true,
            Self::Llm(llm) => matches!(
                llm,
                LlmError::Backend(_) | LlmError::Timeout | LlmError::Parse { .. }
            ),
            _ => false,
        }
    }
}

/// Fetch a required accumulator field or fail with
/// [`PipelineError::MissingField`].
pub fn require<'a, T>(
    field: &'a Option<T>,
    stage: Stage,
    name: &'static str,
) -> Result<&'a T, PipelineError> {
    field
        .as_ref()
        .ok_or(PipelineError::MissingField { stage, field: name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            PipelineError::Malformed {
                stage: Stage::GenerateEvents,
                message: String::from("missing field"),
            }
            .is_retryable()
        );
        assert!(PipelineError::Llm(LlmError::Timeout).is_retryable());
        assert!(
            !PipelineError::Fatal {
                stage: Stage::BuildFactGraph,
                message: String::from("no reachable character"),
            }
            .is_retryable()
        );
        assert!(!PipelineError::Llm(LlmError::Config(String::new())).is_retryable());
    }

    #[test]
    fn require_reports_the_missing_field() {
        let absent: Option<u32> = None;
        let result = require(&absent, Stage::DeriveKnowledge, "events");
        assert!(matches!(
            result,
            Err(PipelineError::MissingField {
                stage: Stage::DeriveKnowledge,
                field: "events",
            })
        ));

        let present = Some(7u32);
        assert_eq!(require(&present, Stage::DeriveKnowledge, "events").ok(), Some(&7));
    }
}
