//! S12: assemble the final [`Case`] from the accumulator.
//!
//! Every field must be present by now; a missing one means the run was
//! resumed from the wrong stage. Persistence itself (append-only case
//! insert, draft deletion) is driven by the orchestrator, which owns
//! the store handles.

use caseforge_types::{Case, GenerationState, Stage};
use chrono::Utc;

use crate::error::{PipelineError, require};

/// Assemble the finalized case.
pub fn assemble(state: &GenerationState) -> Result<Case, PipelineError> {
    let stage = Stage::StoreCase;
    Ok(Case {
        case_date: state.input.case_date,
        title: require(&state.title, stage, "title")?.clone(),
        difficulty: state.input.difficulty_or_default(),
        introduction: require(&state.introduction, stage, "introduction")?.clone(),
        introduction_fact_ids: require(
            &state.introduction_fact_ids,
            stage,
            "introductionFactIds",
        )?
        .clone(),
        events: require(&state.events, stage, "events")?.clone(),
        characters: require(&state.characters, stage, "characters")?.clone(),
        locations: require(&state.locations, stage, "locations")?.clone(),
        facts: require(&state.facts, stage, "facts")?.clone(),
        casebook: require(&state.casebook, stage, "casebook")?.clone(),
        prose: require(&state.prose, stage, "prose")?.clone(),
        questions: require(&state.questions, stage, "questions")?.clone(),
        optimal_path: require(&state.optimal_path, stage, "optimalPath")?.clone(),
        generated_at: Utc::now(),
    })
}
