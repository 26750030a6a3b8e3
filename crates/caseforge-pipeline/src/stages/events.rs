//! S2: fill event slots with concrete events, and S2v validation.
//!
//! The event validator is self-contained (no external references): it
//! checks causal edge integrity, agent involvement, reveal shape, and
//! acyclicity of the `causes` relation via Kahn topological sort, with
//! the surviving unordered ids reported as a cycle witness.

use std::collections::{BTreeMap, BTreeSet};

use caseforge_types::{CaseEvent, GenerationState, Involvement, Stage, ValidationResult};
use serde::Deserialize;

use crate::context::{StageContext, parse_payload};
use crate::dag;
use crate::error::{PipelineError, require};

/// Output token budget for the events call.
const MAX_TOKENS: u32 = 8192;

/// Wire shape of the S2 response.
#[derive(Debug, Deserialize)]
struct EventsPayload {
    events: Vec<CaseEvent>,
}

/// Run the event generation call and store the result.
pub async fn generate(
    ctx: &StageContext<'_>,
    state: &mut GenerationState,
) -> Result<(), PipelineError> {
    let template = require(&state.template, Stage::GenerateEvents, "template")?;
    let template_json = serde_json::to_string_pretty(template).map_err(caseforge_llm::LlmError::from)?;

    let context = serde_json::json!({
        "template_json": template_json,
        "previous_errors": state.previous_errors(),
    });

    let completion = ctx
        .call(Stage::GenerateEvents, state, &context, MAX_TOKENS)
        .await?;
    let payload: EventsPayload = parse_payload(Stage::GenerateEvents, completion.value)?;
    state.events = Some(payload.events);
    Ok(())
}

/// S2v: validate the generated events.
pub fn validate(state: &GenerationState) -> ValidationResult {
    let mut errors = Vec::new();

    let Some(events) = state.events.as_ref() else {
        return ValidationResult::from_findings(
            vec![String::from("no events were generated")],
            Vec::new(),
        );
    };
    if events.is_empty() {
        return ValidationResult::from_findings(
            vec![String::from("the events list is empty")],
            Vec::new(),
        );
    }

    let event_ids: BTreeSet<_> = events.iter().map(|e| e.id.clone()).collect();

    for event in events {
        // 1. Every causes id exists.
        for cause in &event.causes {
            if !event_ids.contains(cause) {
                errors.push(format!(
                    "event {} causes unknown event {cause}",
                    event.id
                ));
            }
        }

        // 2. The agent appears in involvement with type agent.
        match event.involvement.get(&event.agent) {
            Some(Involvement::Agent) => {}
            Some(other) => errors.push(format!(
                "event {} agent {} has involvement {other:?}, expected agent",
                event.id, event.agent
            )),
            None => errors.push(format!(
                "event {} agent {} is missing from the involvement map",
                event.id, event.agent
            )),
        }

        // 4. Reveals are non-empty and well-formed.
        if event.reveals.is_empty() {
            errors.push(format!("event {} has no reveals", event.id));
        }
        for reveal in &event.reveals {
            if reveal.fact_id.as_str().is_empty() {
                errors.push(format!("event {} has a reveal with an empty fact id", event.id));
            }
            if reveal.subjects.is_empty() {
                errors.push(format!(
                    "event {} reveal {} has no subjects",
                    event.id, reveal.fact_id
                ));
            }
        }
    }

    // 5. The causal DAG is acyclic (Kahn), cycle witness on failure.
    let edges: BTreeMap<_, _> = events
        .iter()
        .map(|e| (e.id.clone(), e.causes.clone()))
        .collect();
    if let Err(cycle) = dag::topological_order(&event_ids, &edges) {
        let witness: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        errors.push(format!(
            "causal graph contains a cycle among: {}",
            witness.join(", ")
        ));
    }

    ValidationResult::from_findings(errors, Vec::new())
}
