//! S7: pick the introduction facts, write the opening, finalize the
//! title.
//!
//! The 2-4 chosen seed facts are everything the player starts with, so
//! the post-parse validator insists they are true, that they exist, and
//! that together they mention enough distinct subjects to open up the
//! casebook.

use std::collections::BTreeSet;

use caseforge_types::{FactId, GenerationState, Stage, ValidationResult};
use serde::Deserialize;

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the introduction call.
const MAX_TOKENS: u32 = 4096;

/// Bounds on the number of introduction facts.
const MIN_INTRO_FACTS: usize = 2;

/// Upper bound on the number of introduction facts.
const MAX_INTRO_FACTS: usize = 4;

/// Minimum distinct subjects the seed facts must mention.
const MIN_SEED_SUBJECTS: usize = 2;

/// Wire shape of the S7 response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntroductionPayload {
    introduction_fact_ids: Vec<FactId>,
    introduction: String,
    title: String,
}

/// Run the introduction call and store the result.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let template = require(&state.template, Stage::GenerateIntroduction, "template")?;
    let facts = require(&state.facts, Stage::GenerateIntroduction, "facts")?;

    let seed_candidates: Vec<_> = facts
        .iter()
        .filter(|f| f.veracity)
        .map(|f| {
            serde_json::json!({
                "id": f.id,
                "description": f.description,
                "subjects": f.subjects,
            })
        })
        .collect();

    let context = serde_json::json!({
        "title": template.title,
        "tone": template.tone,
        "atmosphere": template.atmosphere,
        "facts_json": serde_json::to_string_pretty(&seed_candidates)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateIntroduction, state, &context, MAX_TOKENS)
        .await?;
    let payload: IntroductionPayload =
        parse_payload(Stage::GenerateIntroduction, completion.value)?;

    state.introduction_fact_ids = Some(payload.introduction_fact_ids);
    state.introduction = Some(payload.introduction);
    state.title = Some(payload.title);
    Ok(())
}

/// Post-parse validation of the introduction choices.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();

    let Some(intro_ids) = state.introduction_fact_ids.as_ref() else {
        return ValidationResult::from_findings(
            vec![String::from("no introduction was generated")],
            Vec::new(),
        );
    };

    if intro_ids.len() < MIN_INTRO_FACTS || intro_ids.len() > MAX_INTRO_FACTS {
        errors.push(format!(
            "expected {MIN_INTRO_FACTS}-{MAX_INTRO_FACTS} introduction facts, got {}",
            intro_ids.len()
        ));
    }

    let mut seed_subjects = BTreeSet::new();
    if let Some(facts) = state.facts.as_ref() {
        for id in intro_ids {
            match facts.iter().find(|f| &f.id == id) {
                None => errors.push(format!("introduction fact {id} does not exist")),
                Some(fact) if !fact.veracity => {
                    errors.push(format!("introduction fact {id} is false"));
                }
                Some(fact) => seed_subjects.extend(fact.subjects.iter().cloned()),
            }
        }
    }
    if seed_subjects.len() < MIN_SEED_SUBJECTS {
        errors.push(format!(
            "introduction facts mention only {} distinct subject(s); the player has nowhere to go",
            seed_subjects.len()
        ));
    }

    if state
        .introduction
        .as_ref()
        .is_none_or(|i| i.trim().is_empty())
    {
        errors.push(String::from("introduction prose is empty"));
    }
    if state.title.as_ref().is_none_or(|t| t.trim().is_empty()) {
        errors.push(String::from("finalized title is empty"));
    }

    ValidationResult::from_findings(errors, Vec::new())
}
