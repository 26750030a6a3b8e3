//! S4: realize the location graph, and S4v validation.
//!
//! Placeholders are collected deterministically before the call: every
//! unique event location, plus every reveal subject that is neither a
//! role nor a character (after the S3 rewrite, anything left over is a
//! location placeholder). The generator must realize exactly these ids.
//!
//! Asymmetric accessibility is a warning, never an error.

use std::collections::BTreeSet;

use caseforge_types::{
    CharacterId, GenerationState, Location, LocationId, RoleId, Stage, ValidationResult,
};
use serde::Deserialize;

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the locations call.
const MAX_TOKENS: u32 = 6144;

/// Wire shape of the S4 response.
#[derive(Debug, Deserialize)]
struct LocationsPayload {
    locations: Vec<Location>,
}

/// Collect the location placeholder ids the generator must realize.
pub fn collect_placeholders(state: &GenerationState) -> Result<BTreeSet<LocationId>, PipelineError> {
    let events = require(&state.events, Stage::GenerateLocations, "events")?;

    let role_ids: BTreeSet<RoleId> = state
        .role_mapping
        .as_ref()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let character_ids: BTreeSet<CharacterId> = state
        .characters
        .as_ref()
        .map(|c| c.iter().map(|ch| ch.id.clone()).collect())
        .unwrap_or_default();

    let mut placeholders = BTreeSet::new();
    for event in events {
        placeholders.insert(event.location.clone());
        for reveal in &event.reveals {
            for subject in &reveal.subjects {
                let is_role = role_ids.contains(&RoleId::new(subject.as_str()));
                let is_character = character_ids.contains(&CharacterId::new(subject.as_str()));
                if !is_role && !is_character {
                    placeholders.insert(LocationId::new(subject.as_str()));
                }
            }
        }
    }
    Ok(placeholders)
}

/// Run the location generation call and store the result.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let placeholders = collect_placeholders(state)?;
    let template = require(&state.template, Stage::GenerateLocations, "template")?;

    let context = serde_json::json!({
        "era": template.era,
        "atmosphere": template.atmosphere,
        "placeholders_json": serde_json::to_string_pretty(&placeholders)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateLocations, state, &context, MAX_TOKENS)
        .await?;
    let payload: LocationsPayload = parse_payload(Stage::GenerateLocations, completion.value)?;
    state.locations = Some(payload.locations);
    Ok(())
}

/// S4v: validate the location graph.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(locations) = state.locations.as_ref() else {
        return ValidationResult::from_findings(
            vec![String::from("no locations were generated")],
            warnings,
        );
    };

    let location_ids: BTreeSet<_> = locations.iter().map(|l| l.id.clone()).collect();
    if location_ids.len() != locations.len() {
        errors.push(String::from("duplicate location ids"));
    }

    if let Some(events) = state.events.as_ref() {
        for event in events {
            if !location_ids.contains(&event.location) {
                errors.push(format!(
                    "event {} references unknown location {}",
                    event.id, event.location
                ));
            }
        }
    }

    for location in locations {
        for neighbor in &location.accessible_from {
            if !location_ids.contains(neighbor) {
                errors.push(format!(
                    "location {} accessibleFrom references unknown location {neighbor}",
                    location.id
                ));
            }
        }
        for neighbor in location.visible_from.iter().chain(&location.audible_from) {
            if !location_ids.contains(neighbor) {
                warnings.push(format!(
                    "location {} perception edge references unknown location {neighbor}",
                    location.id
                ));
            }
        }
    }

    // Accessibility should be symmetric; asymmetry is only a warning.
    for location in locations {
        for neighbor in &location.accessible_from {
            let reciprocal = locations
                .iter()
                .find(|l| &l.id == neighbor)
                .is_some_and(|l| l.accessible_from.contains(&location.id));
            if location_ids.contains(neighbor) && !reciprocal {
                warnings.push(format!(
                    "accessibility is asymmetric: {} is accessible from {neighbor}, but not vice versa",
                    location.id
                ));
            }
        }
    }

    ValidationResult::from_findings(errors, warnings)
}
