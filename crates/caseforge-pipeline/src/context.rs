//! Shared context handed to every generative stage.
//!
//! Bundles the model client and prompt engine, and centralizes the
//! render-route-call-parse sequence so stages only build their context
//! JSON and deserialize their payload.

use caseforge_llm::{JsonCompletion, ModelCall, ModelClient, PromptEngine};
use caseforge_types::{GenerationState, Stage};
use serde::de::DeserializeOwned;

use crate::error::PipelineError;

/// Borrowed handles every generative stage needs.
pub struct StageContext<'a> {
    /// The model client (routing, retries, cost accounting).
    pub model: &'a ModelClient,
    /// The prompt engine.
    pub prompts: &'a PromptEngine,
}

impl StageContext<'_> {
    /// Render the stage prompt, route the call per the run's model
    /// config, and return the parsed JSON completion.
    pub async fn call(
        &self,
        stage: Stage,
        state: &GenerationState,
        context: &serde_json::Value,
        max_tokens: u32,
    ) -> Result<JsonCompletion, PipelineError> {
        let prompt = self.prompts.render(stage, context)?;
        let call = ModelCall::from_prompt(stage, &prompt)
            .with_alias(state.input.model_alias_for(stage).map(ToOwned::to_owned))
            .with_max_tokens(max_tokens);
        Ok(self.model.complete_json(&call).await?)
    }
}

/// Deserialize a stage payload, mapping shape mismatches to the
/// retryable [`PipelineError::Malformed`] so the serde error reaches the
/// generator as repair context.
pub fn parse_payload<T: DeserializeOwned>(
    stage: Stage,
    value: serde_json::Value,
) -> Result<T, PipelineError> {
    serde_json::from_value(value).map_err(|e| PipelineError::Malformed {
        stage,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq, serde::Deserialize)]
    struct Payload {
        title: String,
    }

    #[test]
    fn parse_payload_maps_serde_errors_to_malformed() {
        let good = serde_json::json!({"title": "The Hollow Bell"});
        let parsed: Result<Payload, _> = parse_payload(Stage::GenerateTemplate, good);
        assert_eq!(
            parsed.ok(),
            Some(Payload {
                title: String::from("The Hollow Bell")
            })
        );

        let bad = serde_json::json!({"headline": "nope"});
        let parsed: Result<Payload, _> = parse_payload(Stage::GenerateTemplate, bad);
        assert!(matches!(
            parsed,
            Err(PipelineError::Malformed {
                stage: Stage::GenerateTemplate,
                ..
            })
        ));
    }
}
