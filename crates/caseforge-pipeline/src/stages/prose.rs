//! S9: write the visit scene for every casebook entry.
//!
//! Prose quality is out of validation's reach; the only structural
//! concern is coverage, and a missing scene is a warning, not an error.

use std::collections::BTreeMap;

use caseforge_types::{EntryId, GenerationState, Stage};
use serde::Deserialize;
use tracing::warn;

use crate::context::{StageContext, parse_payload};
use crate::error::{PipelineError, require};

/// Output token budget for the prose call.
const MAX_TOKENS: u32 = 16384;

/// Wire shape of the S9 response.
#[derive(Debug, Deserialize)]
struct ProsePayload {
    scenes: BTreeMap<EntryId, String>,
}

/// Run the prose call and store the scenes.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let template = require(&state.template, Stage::GenerateProse, "template")?;
    let title = state.title.clone().unwrap_or_else(|| template.title.clone());
    let characters = require(&state.characters, Stage::GenerateProse, "characters")?;
    let facts = require(&state.facts, Stage::GenerateProse, "facts")?;
    let casebook = require(&state.casebook, Stage::GenerateProse, "casebook")?;

    let character_summaries: Vec<_> = characters
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "name": c.name,
                "societalRole": c.societal_role,
                "toneProfile": c.tone_profile,
                "knowledge": c.knowledge,
            })
        })
        .collect();
    let entry_summaries: Vec<_> = casebook
        .iter()
        .map(|e| {
            let revealed: Vec<_> = e
                .reveals
                .iter()
                .filter_map(|id| facts.iter().find(|f| &f.id == id))
                .map(|f| serde_json::json!({"id": f.id, "description": f.description}))
                .collect();
            serde_json::json!({
                "id": e.id,
                "label": e.label,
                "locationId": e.location,
                "characterIds": e.characters,
                "reveals": revealed,
            })
        })
        .collect();

    let context = serde_json::json!({
        "title": title,
        "tone": template.tone,
        "characters_json": serde_json::to_string_pretty(&character_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "entries_json": serde_json::to_string_pretty(&entry_summaries)
            .map_err(caseforge_llm::LlmError::from)?,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateProse, state, &context, MAX_TOKENS)
        .await?;
    let payload: ProsePayload = parse_payload(Stage::GenerateProse, completion.value)?;

    let casebook = require(&state.casebook, Stage::GenerateProse, "casebook")?;
    let missing: Vec<&EntryId> = casebook
        .iter()
        .map(|e| &e.id)
        .filter(|id| !payload.scenes.contains_key(id))
        .collect();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        warn!(entries = names.join(", "), "entries received no scene");
    }

    state.prose = Some(payload.scenes);
    Ok(())
}
