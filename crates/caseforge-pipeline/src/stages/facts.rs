//! S6: generate fact descriptions and categories, and S6v validation.
//!
//! The generator receives the full skeleton list with source context
//! and returns a map `factId -> {description, category}`. The merge
//! keeps the skeleton authoritative for id, subjects, and veracity; the
//! generator only contributes prose and categorization.

use std::collections::{BTreeMap, BTreeSet};

use caseforge_types::{
    Fact, FactCategory, FactId, GenerationState, Stage, SubjectId, ValidationResult,
};
use serde::Deserialize;

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the fact-description call.
const MAX_TOKENS: u32 = 8192;

/// Wire shape of one S6 map entry.
#[derive(Debug, Deserialize)]
struct FactInfo {
    description: String,
    category: FactCategory,
}

/// Run the fact-description call and merge onto the skeletons.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let template = require(&state.template, Stage::DescribeFacts, "template")?;
    let skeletons = require(&state.fact_skeletons, Stage::DescribeFacts, "factSkeletons")?;

    let context = serde_json::json!({
        "tone": template.tone,
        "skeletons_json": serde_json::to_string_pretty(skeletons)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::DescribeFacts, state, &context, MAX_TOKENS)
        .await?;
    let described: BTreeMap<FactId, FactInfo> =
        parse_payload(Stage::DescribeFacts, completion.value)?;

    let skeletons = require(&state.fact_skeletons, Stage::DescribeFacts, "factSkeletons")?;
    let facts: Vec<Fact> = skeletons
        .iter()
        .filter_map(|skeleton| {
            described.get(&skeleton.id).map(|info| Fact {
                id: skeleton.id.clone(),
                description: info.description.clone(),
                category: info.category,
                subjects: skeleton.subjects.clone(),
                veracity: skeleton.veracity,
            })
        })
        .collect();

    state.facts = Some(facts);
    Ok(())
}

/// S6v: validate the merged facts against the skeletons.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();

    let (Some(skeletons), Some(facts)) = (state.fact_skeletons.as_ref(), state.facts.as_ref())
    else {
        return ValidationResult::from_findings(
            vec![String::from("no facts were generated")],
            Vec::new(),
        );
    };

    let facts_by_id: BTreeMap<&FactId, &Fact> = facts.iter().map(|f| (&f.id, f)).collect();
    for skeleton in skeletons {
        match facts_by_id.get(&skeleton.id) {
            None => errors.push(format!(
                "fact {} has no generated description",
                skeleton.id
            )),
            Some(fact) => {
                if fact.veracity != skeleton.veracity {
                    errors.push(format!(
                        "fact {} veracity diverged from its skeleton",
                        skeleton.id
                    ));
                }
                if fact.subjects != skeleton.subjects {
                    errors.push(format!(
                        "fact {} subjects diverged from its skeleton",
                        skeleton.id
                    ));
                }
                if fact.description.trim().is_empty() {
                    errors.push(format!("fact {} has an empty description", skeleton.id));
                }
            }
        }
    }

    let skeleton_ids: BTreeSet<&FactId> = skeletons.iter().map(|s| &s.id).collect();
    for fact in facts {
        if !skeleton_ids.contains(&fact.id) {
            errors.push(format!("fact {} matches no skeleton", fact.id));
        }
    }

    // Every subject must resolve to a character or a location.
    let mut valid_subjects: BTreeSet<SubjectId> = BTreeSet::new();
    if let Some(characters) = state.characters.as_ref() {
        valid_subjects.extend(characters.iter().map(|c| SubjectId::from(&c.id)));
    }
    if let Some(locations) = state.locations.as_ref() {
        valid_subjects.extend(locations.iter().map(|l| SubjectId::from(&l.id)));
    }
    for fact in facts {
        for subject in &fact.subjects {
            if !valid_subjects.contains(subject) {
                errors.push(format!(
                    "fact {} subject {subject} is neither a character nor a location",
                    fact.id
                ));
            }
        }
    }

    ValidationResult::from_findings(errors, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_types::{
        Character, CharacterId, Difficulty, FactSkeleton, FactSource, GenerationInput, Location,
        LocationId, ToneProfile,
    };
    use chrono::NaiveDate;

    fn skeleton(id: &str, subjects: &[&str], veracity: bool) -> FactSkeleton {
        FactSkeleton {
            id: FactId::new(id),
            subjects: subjects.iter().map(|s| SubjectId::new(*s)).collect(),
            veracity,
            source: FactSource::RedHerring,
        }
    }

    fn fact(id: &str, subjects: &[&str], veracity: bool) -> Fact {
        Fact {
            id: FactId::new(id),
            description: format!("about {id}"),
            category: FactCategory::Background,
            subjects: subjects.iter().map(|s| SubjectId::new(*s)).collect(),
            veracity,
        }
    }

    fn state_with(skeletons: Vec<FactSkeleton>, facts: Vec<Fact>) -> GenerationState {
        let mut state = GenerationState::new(GenerationInput {
            case_date: NaiveDate::from_ymd_opt(1893, 10, 14).unwrap_or_default(),
            difficulty: Some(Difficulty::Easy),
            crime_type: None,
            model_config: None,
        });
        state.characters = Some(vec![Character {
            id: CharacterId::new("char_maid"),
            name: String::from("Ada"),
            mystery_role: String::new(),
            societal_role: String::new(),
            description: String::new(),
            motivations: Vec::new(),
            knowledge: BTreeMap::new(),
            tone_profile: ToneProfile {
                register: String::new(),
                vocabulary: Vec::new(),
                quirk: None,
            },
            current_status: None,
        }]);
        state.locations = Some(vec![Location {
            id: LocationId::new("loc_study"),
            name: String::new(),
            kind: String::new(),
            description: String::new(),
            accessible_from: Vec::new(),
            visible_from: Vec::new(),
            audible_from: Vec::new(),
        }]);
        state.fact_skeletons = Some(skeletons);
        state.facts = Some(facts);
        state
    }

    #[test]
    fn matching_merge_passes() {
        let state = state_with(
            vec![skeleton("fact_a", &["char_maid", "loc_study"], true)],
            vec![fact("fact_a", &["char_maid", "loc_study"], true)],
        );
        let result = validate(&state);
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn missing_description_is_an_error() {
        let state = state_with(
            vec![skeleton("fact_a", &["char_maid"], true)],
            Vec::new(),
        );
        let result = validate(&state);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.contains("no generated description"))
        );
    }

    #[test]
    fn veracity_divergence_is_an_error() {
        let state = state_with(
            vec![skeleton("fact_a", &["char_maid"], false)],
            vec![fact("fact_a", &["char_maid"], true)],
        );
        let result = validate(&state);
        assert!(result.errors.iter().any(|e| e.contains("veracity diverged")));
    }

    #[test]
    fn unknown_subject_is_an_error() {
        let state = state_with(
            vec![skeleton("fact_a", &["char_ghost"], true)],
            vec![fact("fact_a", &["char_ghost"], true)],
        );
        let result = validate(&state);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.contains("neither a character nor a location"))
        );
    }

    #[test]
    fn invalid_category_fails_at_parse() {
        let json = serde_json::json!({
            "fact_a": {"description": "x", "category": "vibes"}
        });
        let parsed: Result<BTreeMap<FactId, FactInfo>, _> =
            parse_payload(Stage::DescribeFacts, json);
        assert!(matches!(parsed, Err(PipelineError::Malformed { .. })));
    }
}
