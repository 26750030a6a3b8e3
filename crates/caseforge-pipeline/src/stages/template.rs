//! S1: generate the structural template.
//!
//! The template stage turns the run input into a blueprint: crime type,
//! era, style and tone, a causal slot skeleton, and a cast of roles.
//! Sizing follows the difficulty tier. When the caller supplied no
//! crime-type hint, a hidden setting flavor is rolled (seeded from the
//! draft id, so reruns of the same draft are reproducible) to bias
//! variety.

use std::collections::{BTreeMap, BTreeSet};

use caseforge_types::{Difficulty, GenerationState, Stage, Template, ValidationResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::context::{StageContext, parse_payload};
use crate::dag;
use crate::error::PipelineError;

/// Output token budget for the template call.
const MAX_TOKENS: u32 = 4096;

/// Hidden setting flavors rolled when no crime-type hint was given.
const SETTING_FLAVORS: [&str; 12] = [
    "seaside resort",
    "railway terminus hotel",
    "opera house",
    "university college",
    "merchant shipping office",
    "country estate",
    "newspaper printing house",
    "botanical garden",
    "auction house",
    "music hall",
    "grand arcade",
    "riverside warehouse district",
];

/// Slot and role count bounds per difficulty tier.
const fn tier_bounds(difficulty: Difficulty) -> (usize, usize, usize, usize) {
    match difficulty {
        Difficulty::Easy => (5, 6, 5, 6),
        Difficulty::Medium => (6, 8, 6, 8),
        Difficulty::Hard => (8, 10, 8, 12),
    }
}

/// Minimum number of required event slots.
const MIN_REQUIRED_SLOTS: usize = 3;

/// Run the template generation call and store the result.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let difficulty = state.input.difficulty_or_default();
    let (event_guidance, thread_guidance) = match difficulty {
        Difficulty::Easy => (
            "5-6 event slots and 5-6 roles",
            "Keep the chain readable; no deliberate misdirection.",
        ),
        Difficulty::Medium => (
            "6-8 event slots and 6-8 roles",
            "Weave in one red-herring thread.",
        ),
        Difficulty::Hard => (
            "8-10 event slots and 8-12 roles",
            "Weave in multiple misleading threads.",
        ),
    };

    let setting_flavor = if state.input.crime_type.is_none() {
        Some(roll_setting_flavor(state))
    } else {
        None
    };

    let context = serde_json::json!({
        "difficulty": difficulty,
        "crime_type": state.input.crime_type,
        "setting_flavor": setting_flavor,
        "event_guidance": event_guidance,
        "thread_guidance": thread_guidance,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateTemplate, state, &context, MAX_TOKENS)
        .await?;
    let template: Template = parse_payload(Stage::GenerateTemplate, completion.value)?;
    state.template = Some(template);
    Ok(())
}

/// Pick a setting flavor, seeded from the draft id.
fn roll_setting_flavor(state: &GenerationState) -> &'static str {
    let seed = state
        .draft_id
        .into_inner()
        .as_bytes()
        .iter()
        .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    let mut rng = StdRng::seed_from_u64(seed);
    let index = rng.random_range(0..SETTING_FLAVORS.len());
    SETTING_FLAVORS.get(index).copied().unwrap_or("harbor town")
}

/// Validate the generated template.
///
/// Checks tier-consistent slot and role counts, at least one root slot,
/// at least three required slots, and that the slot skeleton's
/// `causedBy` edges reference existing slots and form a DAG.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();
    let warnings = Vec::new();

    let Some(template) = state.template.as_ref() else {
        return ValidationResult::from_findings(
            vec![String::from("no template was generated")],
            warnings,
        );
    };

    let difficulty = state.input.difficulty_or_default();
    let (min_slots, max_slots, min_roles, max_roles) = tier_bounds(difficulty);

    let slot_count = template.event_slots.len();
    if slot_count < min_slots || slot_count > max_slots {
        errors.push(format!(
            "difficulty {difficulty:?} expects {min_slots}-{max_slots} event slots, got {slot_count}",
        ));
    }
    let role_count = template.roles.len();
    if role_count < min_roles || role_count > max_roles {
        errors.push(format!(
            "difficulty {difficulty:?} expects {min_roles}-{max_roles} roles, got {role_count}",
        ));
    }

    if template.root_slots().next().is_none() {
        errors.push(String::from(
            "template has no root event slot (every slot has causedBy parents)",
        ));
    }

    let required = template.required_slot_count();
    if required < MIN_REQUIRED_SLOTS {
        errors.push(format!(
            "template needs at least {MIN_REQUIRED_SLOTS} required event slots, got {required}",
        ));
    }

    let slot_ids: BTreeSet<_> = template.event_slots.iter().map(|s| s.id.clone()).collect();
    if slot_ids.len() != template.event_slots.len() {
        errors.push(String::from("template contains duplicate event slot ids"));
    }
    let mut edges = BTreeMap::new();
    for slot in &template.event_slots {
        for parent in &slot.caused_by {
            if !slot_ids.contains(parent) {
                errors.push(format!(
                    "slot {} causedBy references unknown slot {parent}",
                    slot.id
                ));
            }
        }
        // Edge direction: parent -> child.
        for parent in &slot.caused_by {
            edges
                .entry(parent.clone())
                .or_insert_with(Vec::new)
                .push(slot.id.clone());
        }
    }
    if let Err(cycle) = dag::topological_order(&slot_ids, &edges) {
        let witness: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        errors.push(format!(
            "event slot graph contains a cycle among: {}",
            witness.join(", ")
        ));
    }

    ValidationResult::from_findings(errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseforge_types::{
        EventId, EventSlot, GenerationInput, MysteryStyle, NarrativeTone, Necessity, RoleId,
        RoleSpec,
    };
    use chrono::NaiveDate;

    fn slot(id: &str, required: bool, caused_by: &[&str]) -> EventSlot {
        EventSlot {
            id: EventId::new(id),
            description: format!("slot {id}"),
            necessity: required.then_some(Necessity::Required),
            caused_by: caused_by.iter().map(|c| EventId::new(*c)).collect(),
        }
    }

    fn role(id: &str) -> RoleSpec {
        RoleSpec {
            id: RoleId::new(id),
            label: String::from(id),
            description: String::new(),
        }
    }

    fn valid_template() -> Template {
        Template {
            crime_type: String::from("theft"),
            title: String::from("Working Title"),
            era: String::from("1890s"),
            date: String::from("14 October 1893"),
            atmosphere: String::from("fog on the river"),
            style: MysteryStyle::Isolated,
            tone: NarrativeTone::Noir,
            event_slots: vec![
                slot("E1", true, &[]),
                slot("E2", true, &["E1"]),
                slot("E3", true, &["E2"]),
                slot("E4", false, &["E3"]),
                slot("E5", false, &["E2"]),
            ],
            roles: vec![
                role("role_thief"),
                role("role_victim"),
                role("role_maid"),
                role("role_butler"),
                role("role_constable"),
            ],
            difficulty: Difficulty::Easy,
        }
    }

    fn state_with(template: Template) -> GenerationState {
        let mut state = GenerationState::new(GenerationInput {
            case_date: NaiveDate::from_ymd_opt(1893, 10, 14).unwrap_or_default(),
            difficulty: Some(Difficulty::Easy),
            crime_type: Some(String::from("theft")),
            model_config: None,
        });
        state.template = Some(template);
        state
    }

    #[test]
    fn valid_template_passes() {
        let result = validate(&state_with(valid_template()));
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn missing_root_slot_is_an_error() {
        let mut template = valid_template();
        if let Some(first) = template.event_slots.first_mut() {
            first.caused_by = vec![EventId::new("E5")];
        }
        let result = validate(&state_with(template));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("no root")));
    }

    #[test]
    fn too_few_required_slots_is_an_error() {
        let mut template = valid_template();
        for slot in &mut template.event_slots {
            slot.necessity = None;
        }
        let result = validate(&state_with(template));
        assert!(result.errors.iter().any(|e| e.contains("required event slots")));
    }

    #[test]
    fn tier_bounds_are_enforced() {
        let mut template = valid_template();
        template.event_slots.truncate(3);
        let result = validate(&state_with(template));
        assert!(result.errors.iter().any(|e| e.contains("event slots, got 3")));
    }

    #[test]
    fn unknown_caused_by_reference_is_an_error() {
        let mut template = valid_template();
        if let Some(last) = template.event_slots.last_mut() {
            last.caused_by = vec![EventId::new("E99")];
        }
        let result = validate(&state_with(template));
        assert!(result.errors.iter().any(|e| e.contains("unknown slot E99")));
    }

    #[test]
    fn slot_cycle_is_reported_with_witness() {
        let mut template = valid_template();
        if let Some(first) = template.event_slots.first_mut() {
            first.caused_by = vec![EventId::new("E3")];
        }
        let result = validate(&state_with(template));
        assert!(result.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn setting_flavor_is_stable_per_draft() {
        let state = state_with(valid_template());
        assert_eq!(roll_setting_flavor(&state), roll_setting_flavor(&state));
    }
}
