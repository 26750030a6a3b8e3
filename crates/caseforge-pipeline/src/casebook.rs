//! S8: casebook skeleton, generative polish, and S8v reachability
//! validation.
//!
//! The skeleton phase is deterministic: one entry per character, one
//! per location that can reveal anything (dead-end locations are
//! omitted), with OR-gates derived from the facts that mention the
//! entry's subject. Facts nothing reveals are rescued onto the entry
//! with an overlapping subject. The generative polish pass only
//! overwrites presentation: label, address, and character presence.
//!
//! S8v checks referential integrity, then runs a bipartite BFS from the
//! introduction facts: every fact and every entry must be reachable,
//! and at least one entry must be gated directly on an introduction
//! fact. The reachable fact set is carried forward for the question
//! validator.

use std::collections::BTreeSet;

use caseforge_types::{
    CasebookEntry, EntryId, Fact, FactId, GenerationState, LocationId, Stage, SubjectId,
    ValidationResult,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the polish call.
const MAX_TOKENS: u32 = 6144;

/// Wire shape of the polish response.
#[derive(Debug, Deserialize)]
struct PolishPayload {
    entries: Vec<PolishEntry>,
}

/// One polished entry: presentation fields only.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolishEntry {
    id: EntryId,
    label: String,
    address: String,
    #[serde(default)]
    character_ids: Vec<caseforge_types::CharacterId>,
}

/// Build the deterministic casebook skeleton.
pub fn build_skeleton(state: &GenerationState) -> Result<Vec<CasebookEntry>, PipelineError> {
    let characters = require(&state.characters, Stage::BuildCasebook, "characters")?;
    let locations = require(&state.locations, Stage::BuildCasebook, "locations")?;
    let facts = require(&state.facts, Stage::BuildCasebook, "facts")?;
    let graph = require(&state.fact_graph, Stage::BuildCasebook, "factGraph")?;
    let intro = require(
        &state.introduction_fact_ids,
        Stage::BuildCasebook,
        "introductionFactIds",
    )?;

    let fact_ids: BTreeSet<&FactId> = facts.iter().map(|f| &f.id).collect();
    let location_ids: BTreeSet<&LocationId> = locations.iter().map(|l| &l.id).collect();
    let mut sorted_locations: Vec<_> = locations.iter().collect();
    sorted_locations.sort_by_key(|l| l.id.clone());
    let fallback_location = sorted_locations.first().map(|l| l.id.clone());

    // (subject, entry) pairs; the subject drives gates and rescue.
    let mut entries: Vec<(SubjectId, CasebookEntry)> = Vec::new();

    let mut sorted_characters: Vec<_> = characters.iter().collect();
    sorted_characters.sort_by_key(|c| c.id.clone());
    for character in sorted_characters {
        let subject = SubjectId::from(&character.id);
        let reveals: Vec<FactId> = character
            .revealable_facts()
            .filter(|f| fact_ids.contains(f))
            .cloned()
            .collect();

        // A plausible meeting place: the first location mentioned
        // alongside this character in any fact.
        let location = facts
            .iter()
            .filter(|f| f.subjects.contains(&subject))
            .flat_map(|f| f.subjects.iter())
            .find(|s| location_ids.contains(&LocationId::new(s.as_str())))
            .map(|s| LocationId::new(s.as_str()))
            .or_else(|| fallback_location.clone());
        let Some(location) = location else {
            return Err(PipelineError::Fatal {
                stage: Stage::BuildCasebook,
                message: String::from("cannot place casebook entries: no locations exist"),
            });
        };
        let address = locations
            .iter()
            .find(|l| l.id == location)
            .map(|l| l.name.clone())
            .unwrap_or_default();

        entries.push((
            subject.clone(),
            CasebookEntry {
                id: EntryId::new(format!("entry_{}", character.id)),
                label: character.name.clone(),
                address,
                location,
                characters: vec![character.id.clone()],
                reveals,
                requires_any_fact: gates_for(&subject, facts, intro),
            },
        ));
    }

    for location in sorted_locations {
        let subject = SubjectId::from(&location.id);
        let reveals: Vec<FactId> = graph
            .subject_to_facts
            .get(&subject)
            .cloned()
            .unwrap_or_default();
        if reveals.is_empty() {
            // Dead end: nothing to learn here.
            continue;
        }
        entries.push((
            subject.clone(),
            CasebookEntry {
                id: EntryId::new(format!("entry_{}", location.id)),
                label: location.name.clone(),
                address: location.name.clone(),
                location: location.id.clone(),
                characters: Vec::new(),
                reveals,
                requires_any_fact: gates_for(&subject, facts, intro),
            },
        ));
    }

    rescue_orphans(&mut entries, facts, intro);

    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

/// Derive an entry's OR-gate from the facts mentioning its subject.
///
/// Preference chain: non-introduction facts mentioning the subject,
/// else introduction facts mentioning the subject, else the first
/// introduction fact. The result is never empty as long as any
/// introduction fact exists.
fn gates_for(subject: &SubjectId, facts: &[Fact], intro: &[FactId]) -> Vec<FactId> {
    let intro_set: BTreeSet<&FactId> = intro.iter().collect();
    let mentioning: Vec<&FactId> = facts
        .iter()
        .filter(|f| f.subjects.contains(subject))
        .map(|f| &f.id)
        .collect();

    let non_intro: Vec<FactId> = mentioning
        .iter()
        .filter(|f| !intro_set.contains(**f))
        .map(|f| (*f).clone())
        .collect();
    if !non_intro.is_empty() {
        return non_intro;
    }

    let intro_mentioning: Vec<FactId> = mentioning
        .iter()
        .filter(|f| intro_set.contains(**f))
        .map(|f| (*f).clone())
        .collect();
    if !intro_mentioning.is_empty() {
        return intro_mentioning;
    }

    intro.first().cloned().into_iter().collect()
}

/// Append every fact nothing reveals to the entry whose subject
/// overlaps its subjects (first match), falling back to the first
/// entry.
fn rescue_orphans(
    entries: &mut [(SubjectId, CasebookEntry)],
    facts: &[Fact],
    intro: &[FactId],
) {
    let revealed: BTreeSet<FactId> = entries
        .iter()
        .flat_map(|(_, e)| e.reveals.iter().cloned())
        .collect();
    let intro_set: BTreeSet<&FactId> = intro.iter().collect();

    for fact in facts {
        if revealed.contains(&fact.id) || intro_set.contains(&fact.id) {
            continue;
        }
        let target = entries
            .iter()
            .position(|(subject, _)| fact.subjects.contains(subject))
            .unwrap_or(0);
        if let Some((_, entry)) = entries.get_mut(target) {
            if !entry.reveals.contains(&fact.id) {
                debug!(fact = %fact.id, entry = %entry.id, "rescued orphan fact");
                entry.reveals.push(fact.id.clone());
            }
        }
    }
}

/// Overwrite presentation fields from the polish payload. Structural
/// fields (ids, reveals, gates, location) are fixed.
fn merge_polish(casebook: &mut [CasebookEntry], payload: PolishPayload) {
    for polished in payload.entries {
        match casebook.iter_mut().find(|e| e.id == polished.id) {
            Some(entry) => {
                entry.label = polished.label;
                entry.address = polished.address;
                entry.characters = polished.character_ids;
            }
            None => warn!(entry = %polished.id, "polish referenced an unknown entry; ignored"),
        }
    }
}

/// Run the skeleton phase and the generative polish pass.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let mut casebook = build_skeleton(state)?;

    let template = require(&state.template, Stage::BuildCasebook, "template")?;
    let characters = require(&state.characters, Stage::BuildCasebook, "characters")?;
    let locations = require(&state.locations, Stage::BuildCasebook, "locations")?;

    let character_summaries: Vec<_> = characters
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "name": c.name,
                "societalRole": c.societal_role,
            })
        })
        .collect();
    let location_summaries: Vec<_> = locations
        .iter()
        .map(|l| serde_json::json!({"id": l.id, "name": l.name, "type": l.kind}))
        .collect();
    let entry_summaries: Vec<_> = casebook
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "locationId": e.location,
                "revealsFactIds": e.reveals,
            })
        })
        .collect();

    let context = serde_json::json!({
        "era": template.era,
        "tone": template.tone,
        "characters_json": serde_json::to_string_pretty(&character_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "locations_json": serde_json::to_string_pretty(&location_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "entries_json": serde_json::to_string_pretty(&entry_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::BuildCasebook, state, &context, MAX_TOKENS)
        .await?;
    let payload: PolishPayload = parse_payload(Stage::BuildCasebook, completion.value)?;
    merge_polish(&mut casebook, payload);

    state.casebook = Some(casebook);
    Ok(())
}

/// S8v: referential integrity, then bipartite BFS from the introduction
/// facts. On success the reachable fact set is stored for S10v.
pub fn validate(state: &mut GenerationState) -> ValidationResult {
    let mut errors = Vec::new();

    let (Some(casebook), Some(facts), Some(intro)) = (
        state.casebook.as_ref(),
        state.facts.as_ref(),
        state.introduction_fact_ids.as_ref(),
    ) else {
        return ValidationResult::from_findings(
            vec![String::from("no casebook was generated")],
            Vec::new(),
        );
    };

    let fact_ids: BTreeSet<&FactId> = facts.iter().map(|f| &f.id).collect();
    let location_ids: BTreeSet<LocationId> = state
        .locations
        .iter()
        .flatten()
        .map(|l| l.id.clone())
        .collect();
    let character_ids: BTreeSet<_> = state
        .characters
        .iter()
        .flatten()
        .map(|c| c.id.clone())
        .collect();

    for id in intro {
        if !fact_ids.contains(id) {
            errors.push(format!("introduction fact {id} does not exist"));
        }
    }

    for entry in casebook {
        if !location_ids.contains(&entry.location) {
            errors.push(format!(
                "entry {} references unknown location {}",
                entry.id, entry.location
            ));
        }
        for character in &entry.characters {
            if !character_ids.contains(character) {
                errors.push(format!(
                    "entry {} lists unknown character {character}",
                    entry.id
                ));
            }
        }
        if entry.requires_any_fact.is_empty() {
            errors.push(format!("entry {} has an empty gate", entry.id));
        }
        for gate in &entry.requires_any_fact {
            if !fact_ids.contains(gate) {
                errors.push(format!(
                    "entry {} gate references unknown fact {gate}",
                    entry.id
                ));
            }
        }
        for reveal in &entry.reveals {
            if !fact_ids.contains(reveal) {
                errors.push(format!(
                    "entry {} reveals unknown fact {reveal}",
                    entry.id
                ));
            }
        }
    }

    let intro_set: BTreeSet<FactId> = intro.iter().cloned().collect();
    if !casebook.iter().any(|e| {
        e.requires_any_fact
            .iter()
            .any(|g| intro_set.contains(g))
    }) {
        errors.push(String::from(
            "no entry is gated directly on an introduction fact: nowhere to go from the start",
        ));
    }

    // Bipartite BFS to fixpoint.
    let mut reachable_facts = intro_set;
    let mut reachable_entries: BTreeSet<EntryId> = BTreeSet::new();
    loop {
        let mut changed = false;
        for entry in casebook {
            if reachable_entries.contains(&entry.id) {
                continue;
            }
            if entry
                .requires_any_fact
                .iter()
                .any(|g| reachable_facts.contains(g))
            {
                reachable_entries.insert(entry.id.clone());
                for reveal in &entry.reveals {
                    reachable_facts.insert(reveal.clone());
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for fact in facts {
        if !reachable_facts.contains(&fact.id) {
            errors.push(format!(
                "fact {} is unreachable from the introduction",
                fact.id
            ));
        }
    }
    for entry in casebook {
        if !reachable_entries.contains(&entry.id) {
            errors.push(format!(
                "entry {} is unreachable from the introduction",
                entry.id
            ));
        }
    }

    let result = ValidationResult::from_findings(errors, Vec::new());
    if result.valid {
        state.reachable_fact_ids = Some(reachable_facts);
    }
    result
}
