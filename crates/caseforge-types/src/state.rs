//! Run input, validation results, and the progressive accumulator.
//!
//! One generation run owns one [`GenerationState`]. Each stage reads the
//! accumulator, writes its own fields, and hands control back to the
//! orchestrator, which checkpoints the state to the draft store after
//! every successful stage. Any stage from `generateEvents` onwards can
//! be resumed from a checkpoint.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::enums::{Difficulty, Stage};
use crate::ids::{CharacterId, DraftId, EntryId, FactId, RoleId};
use crate::structs::{
    CaseEvent, CasebookEntry, Character, ComputedKnowledge, Fact, FactGraph, FactSkeleton,
    Location, Question, Template,
};

// ---------------------------------------------------------------------------
// Run input
// ---------------------------------------------------------------------------

/// Parameters for one generation run.
///
/// Schema-validated at run entry; a malformed input is rejected before
/// any stage executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    /// Calendar date the case is generated for (`YYYY-MM-DD`); keys the
    /// finalized case in the cold store.
    pub case_date: NaiveDate,
    /// Requested difficulty tier. Defaults to medium.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    /// Optional crime-type hint. When absent, the template stage rolls a
    /// hidden setting flavor to bias variety.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 3, max = 80))]
    pub crime_type: Option<String>,
    /// Per-stage model routing: stage name to a backend alias resolved
    /// against the engine configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_config: Option<BTreeMap<Stage, String>>,
}

impl GenerationInput {
    /// The effective difficulty tier (medium when unset).
    pub fn difficulty_or_default(&self) -> Difficulty {
        self.difficulty.unwrap_or_default()
    }

    /// The backend alias routed to `stage`, if any.
    pub fn model_alias_for(&self, stage: Stage) -> Option<&str> {
        self.model_config
            .as_ref()
            .and_then(|m| m.get(&stage))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Validation results
// ---------------------------------------------------------------------------

/// Outcome of a deterministic validator.
///
/// Errors block progression and are fed back to the generator on the
/// next attempt as repair context; warnings are logged and never block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Whether the validated stage output may be accepted.
    pub valid: bool,
    /// Human-readable error descriptions, one per violation.
    pub errors: Vec<String>,
    /// Non-blocking observations.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// A passing result with no findings.
    pub const fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Build a result from collected findings: valid iff no errors.
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// The accumulator
// ---------------------------------------------------------------------------

/// The progressive accumulator threaded through all stages.
///
/// Fields are `Option`s filled in stage order; the orchestrator writes
/// at most one group of fields per stage. Once written, a field is only
/// rewritten by re-running its stage (plus the fact-graph stage's
/// clean-on-rerun sweep over synthetic knowledge entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationState {
    /// Unique identifier of this run; keys the draft store.
    pub draft_id: DraftId,
    /// The run parameters.
    pub input: GenerationInput,
    /// S1 output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    /// S2 output (agent/involvement rewritten in place by S3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<CaseEvent>>,
    /// S2k output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_knowledge: Option<ComputedKnowledge>,
    /// S3 output (knowledge states mutated in place by S5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<Character>>,
    /// S3 output: role id to character id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_mapping: Option<BTreeMap<RoleId, CharacterId>>,
    /// S4 output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<Location>>,
    /// S5 output: all fact skeletons in deterministic order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_skeletons: Option<Vec<FactSkeleton>>,
    /// S5 output: the reachable bipartite graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_graph: Option<FactGraph>,
    /// S6 output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facts: Option<Vec<Fact>>,
    /// S7 output: the 2-4 seed facts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction_fact_ids: Option<Vec<FactId>>,
    /// S7 output: opening prose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    /// S7 output: finalized title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// S8 output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub casebook: Option<Vec<CasebookEntry>>,
    /// S8v product consumed by S10v: every fact reachable from the
    /// introduction via the casebook's gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable_fact_ids: Option<BTreeSet<FactId>>,
    /// S9 output: per-entry prose scenes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prose: Option<BTreeMap<EntryId, String>>,
    /// S10 output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
    /// S11 output: ordered entry ids, walkable without gate violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_path: Option<Vec<EntryId>>,
    /// Latest validator outcome (transient; cleared when its stage
    /// passes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    /// Per-stage retry counters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_attempts: BTreeMap<Stage, u32>,
}

impl GenerationState {
    /// Create a fresh accumulator for a new run.
    pub fn new(input: GenerationInput) -> Self {
        Self {
            draft_id: DraftId::new(),
            input,
            template: None,
            events: None,
            computed_knowledge: None,
            characters: None,
            role_mapping: None,
            locations: None,
            fact_skeletons: None,
            fact_graph: None,
            facts: None,
            introduction_fact_ids: None,
            introduction: None,
            title: None,
            casebook: None,
            reachable_fact_ids: None,
            prose: None,
            questions: None,
            optimal_path: None,
            validation: None,
            stage_attempts: BTreeMap::new(),
        }
    }

    /// Number of attempts already spent on `stage`.
    pub fn attempts(&self, stage: Stage) -> u32 {
        self.stage_attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Record a failed attempt at `stage` and keep the validator output
    /// for the next attempt's repair context.
    pub fn record_failed_attempt(&mut self, stage: Stage, result: ValidationResult) {
        let counter = self.stage_attempts.entry(stage).or_insert(0);
        *counter = counter.saturating_add(1);
        self.validation = Some(result);
    }

    /// Clear transient per-stage state after a stage passes validation.
    pub fn clear_stage_transients(&mut self, stage: Stage) {
        self.validation = None;
        self.stage_attempts.remove(&stage);
    }

    /// The repair-context error list from the previous failed attempt,
    /// empty on a first attempt.
    pub fn previous_errors(&self) -> &[String] {
        self.validation
            .as_ref()
            .map_or(&[], |v| v.errors.as_slice())
    }
}

/// A resume request: the saved accumulator plus the stage to restart at.
///
/// The wire format is the persisted state JSON with one extra top-level
/// `startFromStep` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    /// Stage to restart from. `generateTemplate` is rejected: the
    /// template seeds the whole run.
    pub start_from_step: Stage,
    /// The checkpointed accumulator from the failed run.
    #[serde(flatten)]
    pub state: GenerationState,
}
