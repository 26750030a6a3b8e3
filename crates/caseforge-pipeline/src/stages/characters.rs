//! S3: generate characters, enforce the knowledge baseline, rewrite
//! roles to characters, and S3v validation.
//!
//! The S2k baseline is authoritative for what a character can
//! *truthfully* know. Enforcement always runs after generation:
//! missing baseline entries are inserted as `knows`, the generator may
//! keep any downgrade it chose (`suspects`, `hides`, `denies`), and
//! `knows` entries the generator invented outside the baseline are
//! stripped (synthesized bridge/red-herring facts excepted, since they
//! are appended by the fact-graph stage). `believes` entries are left
//! alone; they model false impressions.
//!
//! Once validation passes, every event's `agent` field and involvement
//! keys are rewritten through the role mapping, turning the role-keyed
//! event chain into a character-keyed one.

use std::collections::{BTreeMap, BTreeSet};

use caseforge_types::{
    Character, CharacterId, ComputedKnowledge, GenerationState, KnowledgeStatus, RoleId, Stage,
    SubjectId, ValidationResult,
};
use serde::Deserialize;
use tracing::debug;

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the characters call.
const MAX_TOKENS: u32 = 8192;

/// Wire shape of the S3 response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharactersPayload {
    role_mapping: BTreeMap<RoleId, CharacterId>,
    characters: Vec<Character>,
}

/// Run the character generation call, enforce the baseline, and store
/// the result.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let template = require(&state.template, Stage::GenerateCharacters, "template")?;
    let events = require(&state.events, Stage::GenerateCharacters, "events")?;
    let computed = require(
        &state.computed_knowledge,
        Stage::GenerateCharacters,
        "computedKnowledge",
    )?;

    let context = serde_json::json!({
        "era": template.era,
        "tone": template.tone,
        "roles_json": serde_json::to_string_pretty(&template.roles)
            .map_err(caseforge_llm::LlmError::from)?,
        "events_json": serde_json::to_string_pretty(events)
            .map_err(caseforge_llm::LlmError::from)?,
        "baseline_json": serde_json::to_string_pretty(&computed.role_knowledge)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateCharacters, state, &context, MAX_TOKENS)
        .await?;
    let mut payload: CharactersPayload =
        parse_payload(Stage::GenerateCharacters, completion.value)?;

    let computed = require(
        &state.computed_knowledge,
        Stage::GenerateCharacters,
        "computedKnowledge",
    )?;
    enforce_baseline(&mut payload.characters, &payload.role_mapping, computed);

    state.role_mapping = Some(payload.role_mapping);
    state.characters = Some(payload.characters);
    Ok(())
}

/// Make the S2k baseline authoritative over the generated knowledge
/// states.
fn enforce_baseline(
    characters: &mut [Character],
    role_mapping: &BTreeMap<RoleId, CharacterId>,
    computed: &ComputedKnowledge,
) {
    // A character's baseline is the union over every role mapped to it.
    let mut baseline_by_character: BTreeMap<&CharacterId, BTreeSet<_>> = BTreeMap::new();
    for (role, character_id) in role_mapping {
        if let Some(facts) = computed.role_knowledge.get(role) {
            baseline_by_character
                .entry(character_id)
                .or_default()
                .extend(facts.iter().cloned());
        }
    }

    for character in characters {
        let empty = BTreeSet::new();
        let baseline = baseline_by_character
            .get(&character.id)
            .unwrap_or(&empty);

        for fact in baseline {
            character
                .knowledge
                .entry(fact.clone())
                .or_insert(KnowledgeStatus::Knows);
        }

        // The generator cannot invent knowledge: strip `knows` entries
        // outside the baseline, sparing synthesized facts.
        character.knowledge.retain(|fact, status| {
            *status != KnowledgeStatus::Knows
                || baseline.contains(fact)
                || fact.is_synthetic()
        });
    }
}

/// S3v: validate the cast and the role mapping against the role-keyed
/// event chain, before the rewrite is applied.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();

    let (Some(characters), Some(role_mapping)) =
        (state.characters.as_ref(), state.role_mapping.as_ref())
    else {
        return ValidationResult::from_findings(
            vec![String::from("no characters were generated")],
            Vec::new(),
        );
    };

    let character_ids: BTreeSet<_> = characters.iter().map(|c| c.id.clone()).collect();
    if character_ids.len() != characters.len() {
        errors.push(String::from("duplicate character ids in the cast"));
    }

    if let Some(template) = state.template.as_ref() {
        for role in &template.roles {
            match role_mapping.get(&role.id) {
                None => errors.push(format!("role {} has no character mapping", role.id)),
                Some(character_id) if !character_ids.contains(character_id) => errors.push(
                    format!("role {} maps to unknown character {character_id}", role.id),
                ),
                Some(_) => {}
            }
        }
    }

    // Every event participant must resolve to a character after the
    // rewrite: either through the mapping or by already being one.
    if let Some(events) = state.events.as_ref() {
        for event in events {
            for subject in event.involvement.keys().chain(std::iter::once(&event.agent)) {
                let as_role = RoleId::new(subject.as_str());
                let resolves = role_mapping
                    .get(&as_role)
                    .is_some_and(|c| character_ids.contains(c))
                    || character_ids.contains(&CharacterId::new(subject.as_str()));
                if !resolves {
                    errors.push(format!(
                        "event {} participant {subject} resolves to no character",
                        event.id
                    ));
                }
            }
        }
    }

    ValidationResult::from_findings(errors, Vec::new())
}

/// Rewrite every event's agent and involvement keys from role ids to
/// character ids. Runs after S3v passes.
pub fn apply_role_rewrite(state: &mut GenerationState) -> Result<(), PipelineError> {
    let role_mapping = require(&state.role_mapping, Stage::GenerateCharacters, "roleMapping")?
        .clone();
    let events = state
        .events
        .as_mut()
        .ok_or(PipelineError::MissingField {
            stage: Stage::GenerateCharacters,
            field: "events",
        })?;

    let remap = |subject: &SubjectId| -> SubjectId {
        role_mapping
            .get(&RoleId::new(subject.as_str()))
            .map_or_else(|| subject.clone(), SubjectId::from)
    };

    for event in events.iter_mut() {
        event.agent = remap(&event.agent);
        let remapped = event
            .involvement
            .iter()
            .map(|(subject, involvement)| (remap(subject), *involvement))
            .collect();
        event.involvement = remapped;
    }

    debug!(events = events.len(), "rewrote events to character ids");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_types::{
        CaseEvent, Difficulty, EventId, FactId, GenerationInput, Involvement, LocationId,
        ToneProfile,
    };
    use chrono::NaiveDate;

    fn character(id: &str, knowledge: &[(&str, KnowledgeStatus)]) -> Character {
        Character {
            id: CharacterId::new(id),
            name: String::from(id),
            mystery_role: String::from("witness"),
            societal_role: String::from("clerk"),
            description: String::new(),
            motivations: Vec::new(),
            knowledge: knowledge
                .iter()
                .map(|(fact, status)| (FactId::new(*fact), *status))
                .collect(),
            tone_profile: ToneProfile {
                register: String::from("plain"),
                vocabulary: Vec::new(),
                quirk: None,
            },
            current_status: None,
        }
    }

    fn computed_with(role: &str, facts: &[&str]) -> ComputedKnowledge {
        let mut role_knowledge = BTreeMap::new();
        role_knowledge.insert(
            RoleId::new(role),
            facts.iter().map(|f| FactId::new(*f)).collect(),
        );
        ComputedKnowledge {
            role_knowledge,
            location_reveals: BTreeMap::new(),
        }
    }

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<RoleId, CharacterId> {
        pairs
            .iter()
            .map(|(role, ch)| (RoleId::new(*role), CharacterId::new(*ch)))
            .collect()
    }

    #[test]
    fn enforcement_inserts_missing_baseline_facts() {
        let mut characters = vec![character("char_maid", &[])];
        let computed = computed_with("role_maid", &["fact_quarrel"]);
        enforce_baseline(
            &mut characters,
            &mapping(&[("role_maid", "char_maid")]),
            &computed,
        );
        assert_eq!(
            characters
                .first()
                .and_then(|c| c.knowledge.get(&FactId::new("fact_quarrel")))
                .copied(),
            Some(KnowledgeStatus::Knows)
        );
    }

    #[test]
    fn enforcement_keeps_generator_downgrades() {
        let mut characters =
            vec![character("char_maid", &[("fact_quarrel", KnowledgeStatus::Hides)])];
        let computed = computed_with("role_maid", &["fact_quarrel"]);
        enforce_baseline(
            &mut characters,
            &mapping(&[("role_maid", "char_maid")]),
            &computed,
        );
        assert_eq!(
            characters
                .first()
                .and_then(|c| c.knowledge.get(&FactId::new("fact_quarrel")))
                .copied(),
            Some(KnowledgeStatus::Hides)
        );
    }

    #[test]
    fn enforcement_strips_invented_knowledge() {
        let mut characters = vec![character(
            "char_maid",
            &[
                ("fact_secret", KnowledgeStatus::Knows),
                ("fact_rumor", KnowledgeStatus::Believes),
            ],
        )];
        let computed = computed_with("role_maid", &[]);
        enforce_baseline(
            &mut characters,
            &mapping(&[("role_maid", "char_maid")]),
            &computed,
        );
        let knowledge = characters.first().map(|c| c.knowledge.clone()).unwrap_or_default();
        // Invented `knows` is stripped; `believes` survives.
        assert!(!knowledge.contains_key(&FactId::new("fact_secret")));
        assert_eq!(
            knowledge.get(&FactId::new("fact_rumor")).copied(),
            Some(KnowledgeStatus::Believes)
        );
    }

    #[test]
    fn enforcement_spares_synthetic_facts() {
        let mut characters = vec![character(
            "char_maid",
            &[("fact_bridge_char_maid_to_loc_cellar", KnowledgeStatus::Knows)],
        )];
        let computed = computed_with("role_maid", &[]);
        enforce_baseline(
            &mut characters,
            &mapping(&[("role_maid", "char_maid")]),
            &computed,
        );
        assert!(
            characters
                .first()
                .is_some_and(|c| c.knowledge.contains_key(&FactId::new(
                    "fact_bridge_char_maid_to_loc_cellar"
                )))
        );
    }

    fn state_for_rewrite() -> GenerationState {
        let mut involvement = BTreeMap::new();
        involvement.insert(SubjectId::new("role_thief"), Involvement::Agent);
        involvement.insert(SubjectId::new("role_maid"), Involvement::Present);
        let event = CaseEvent {
            id: EventId::new("E1"),
            description: String::new(),
            timestamp: 1,
            agent: SubjectId::new("role_thief"),
            location: LocationId::new("loc_study"),
            involvement,
            necessity: None,
            causes: Vec::new(),
            reveals: Vec::new(),
        };
        let mut state = GenerationState::new(GenerationInput {
            case_date: NaiveDate::from_ymd_opt(1893, 10, 14).unwrap_or_default(),
            difficulty: Some(Difficulty::Easy),
            crime_type: None,
            model_config: None,
        });
        state.events = Some(vec![event]);
        state.role_mapping = Some(mapping(&[
            ("role_thief", "char_thief"),
            ("role_maid", "char_maid"),
        ]));
        state
    }

    #[test]
    fn rewrite_remaps_agent_and_involvement_keys() {
        let mut state = state_for_rewrite();
        assert!(apply_role_rewrite(&mut state).is_ok());

        let event = state
            .events
            .as_ref()
            .and_then(|e| e.first())
            .cloned();
        let event = match event {
            Some(e) => e,
            None => return,
        };
        assert_eq!(event.agent.as_str(), "char_thief");
        assert!(event.involvement.contains_key(&SubjectId::new("char_thief")));
        assert!(event.involvement.contains_key(&SubjectId::new("char_maid")));
        assert!(!event.involvement.contains_key(&SubjectId::new("role_thief")));
    }

    #[test]
    fn validator_flags_unresolvable_participants() {
        let mut state = state_for_rewrite();
        state.characters = Some(vec![character("char_thief", &[])]);
        // role_maid maps to char_maid, which is not in the cast.
        let result = validate(&state);
        assert!(!result.valid);
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.contains("resolves to no character") || e.contains("unknown character"))
        );
    }
}
