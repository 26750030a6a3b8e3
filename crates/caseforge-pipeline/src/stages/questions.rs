//! S10: generate the quiz, and S10v validation.
//!
//! Answers are typed (person / location / fact). Fact answers are held
//! to the strictest standard: accepted facts must exist, be true, carry
//! exactly the stated category, and be reachable from the introduction
//! (the set S8v computed). False facts may never be accepted answers.

use std::collections::BTreeSet;

use caseforge_types::{
    Answer, CharacterId, GenerationState, LocationId, Question, Stage, ValidationResult,
};
use serde::Deserialize;

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the questions call.
const MAX_TOKENS: u32 = 4096;

/// Wire shape of the S10 response.
#[derive(Debug, Deserialize)]
struct QuestionsPayload {
    questions: Vec<Question>,
}

/// Run the question generation call and store the result.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let characters = require(&state.characters, Stage::GenerateQuestions, "characters")?;
    let locations = require(&state.locations, Stage::GenerateQuestions, "locations")?;
    let facts = require(&state.facts, Stage::GenerateQuestions, "facts")?;
    let reachable = require(
        &state.reachable_fact_ids,
        Stage::GenerateQuestions,
        "reachableFactIds",
    )?;

    let character_summaries: Vec<_> = characters
        .iter()
        .map(|c| serde_json::json!({"id": c.id, "name": c.name, "societalRole": c.societal_role}))
        .collect();
    let location_summaries: Vec<_> = locations
        .iter()
        .map(|l| serde_json::json!({"id": l.id, "name": l.name}))
        .collect();
    let answerable: Vec<_> = facts
        .iter()
        .filter(|f| f.veracity && reachable.contains(&f.id) && !f.id.is_red_herring())
        .map(|f| {
            serde_json::json!({
                "id": f.id,
                "category": f.category,
                "description": f.description,
            })
        })
        .collect();

    let context = serde_json::json!({
        "difficulty": state.input.difficulty_or_default(),
        "characters_json": serde_json::to_string_pretty(&character_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "locations_json": serde_json::to_string_pretty(&location_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "facts_json": serde_json::to_string_pretty(&answerable)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateQuestions, state, &context, MAX_TOKENS)
        .await?;
    let payload: QuestionsPayload = parse_payload(Stage::GenerateQuestions, completion.value)?;
    state.questions = Some(payload.questions);
    Ok(())
}

/// S10v: validate the quiz.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();

    let Some(questions) = state.questions.as_ref() else {
        return ValidationResult::from_findings(
            vec![String::from("no questions were generated")],
            Vec::new(),
        );
    };
    if questions.is_empty() {
        return ValidationResult::from_findings(
            vec![String::from("the quiz has no questions")],
            Vec::new(),
        );
    }

    let character_ids: BTreeSet<CharacterId> = state
        .characters
        .iter()
        .flatten()
        .map(|c| c.id.clone())
        .collect();
    let location_ids: BTreeSet<LocationId> = state
        .locations
        .iter()
        .flatten()
        .map(|l| l.id.clone())
        .collect();
    let empty = BTreeSet::new();
    let reachable = state.reachable_fact_ids.as_ref().unwrap_or(&empty);

    for question in questions {
        if question.answer.is_empty() {
            errors.push(format!("question {} accepts no answers", question.id));
            continue;
        }
        match &question.answer {
            Answer::Person { accepted_ids } => {
                for id in accepted_ids {
                    if !character_ids.contains(id) {
                        errors.push(format!(
                            "question {} accepts unknown character {id}",
                            question.id
                        ));
                    }
                }
            }
            Answer::Location { accepted_ids } => {
                for id in accepted_ids {
                    if !location_ids.contains(id) {
                        errors.push(format!(
                            "question {} accepts unknown location {id}",
                            question.id
                        ));
                    }
                }
            }
            Answer::Fact {
                fact_category,
                accepted_ids,
            } => {
                for id in accepted_ids {
                    let Some(fact) = state
                        .facts
                        .iter()
                        .flatten()
                        .find(|f| &f.id == id)
                    else {
                        errors.push(format!(
                            "question {} accepts unknown fact {id}",
                            question.id
                        ));
                        continue;
                    };
                    if !fact.veracity {
                        errors.push(format!(
                            "question {} accepts false fact {id}",
                            question.id
                        ));
                    }
                    if !reachable.contains(id) {
                        errors.push(format!(
                            "question {} accepts unreachable fact {id}",
                            question.id
                        ));
                    }
                    if fact.category != *fact_category {
                        errors.push(format!(
                            "question {} accepts fact {id} of category {:?}, expected {fact_category:?}",
                            question.id, fact.category
                        ));
                    }
                }
            }
        }
    }

    ValidationResult::from_findings(errors, Vec::new())
}
