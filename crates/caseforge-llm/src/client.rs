//! The model client: per-stage backend routing, timeouts, transient
//! backoff, and JSON parse retries.
//!
//! Every generative stage goes through [`ModelClient::complete_json`]:
//! the call is routed to a backend by alias, wrapped in a per-call
//! deadline, retried with exponential backoff on transient HTTP
//! failures, and — when the response text does not contain parseable
//! JSON — retried up to a small local budget with the failed text
//! injected back as an assistant message plus a corrective user message
//! demanding JSON only.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use caseforge_types::Stage;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::backend::{
    BackendConfig, ChatMessage, CompletionRequest, CompletionResponse, LlmBackend,
    ScriptedBackend, create_backend,
};
use crate::cost::{CostRates, CostSummary, CostTracker};
use crate::error::LlmError;
use crate::extract::extract_json;
use crate::prompt::RenderedPrompt;

/// Default per-call deadline.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Default local JSON parse attempts per model call.
const DEFAULT_PARSE_ATTEMPTS: u32 = 2;

/// Default transient-error retries per HTTP call.
const DEFAULT_TRANSIENT_RETRIES: u32 = 2;

/// Default initial backoff before a transient retry.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Client configuration: backend aliases plus retry knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Named backends; stage routing selects among these by alias.
    pub backends: BTreeMap<String, BackendConfig>,
    /// Alias used when a stage has no explicit routing.
    pub default_alias: String,
    /// Deadline applied to each individual backend call.
    pub call_timeout: Duration,
    /// JSON parse attempts per [`ModelClient::complete_json`] call.
    pub max_parse_attempts: u32,
    /// Transient-error retries per backend call.
    pub max_transient_retries: u32,
    /// Initial backoff delay, doubled per transient retry.
    pub initial_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_alias: String::from("default"),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_parse_attempts: DEFAULT_PARSE_ATTEMPTS,
            max_transient_retries: DEFAULT_TRANSIENT_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

/// One generative request to the model.
#[derive(Debug, Clone)]
pub struct ModelCall {
    /// The pipeline stage making the call (routing and cost accounting).
    pub stage: Stage,
    /// Explicit backend alias; `None` uses the client default.
    pub alias: Option<String>,
    /// System message.
    pub system: String,
    /// User message.
    pub user: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token budget.
    pub max_tokens: u32,
}

impl ModelCall {
    /// Build a call from a rendered prompt with default sampling.
    pub fn from_prompt(stage: Stage, prompt: &RenderedPrompt) -> Self {
        Self {
            stage,
            alias: None,
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }

    /// Route this call to a specific backend alias.
    #[must_use]
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    /// Override the output token budget.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A parsed model completion.
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    /// The extracted JSON payload.
    pub value: serde_json::Value,
    /// The raw response text (for logging and error reports).
    pub raw: String,
    /// Reasoning text the model emitted before the JSON, if any.
    pub preamble: Option<String>,
}

/// The model client shared by all generative stages.
pub struct ModelClient {
    backends: BTreeMap<String, LlmBackend>,
    default_alias: String,
    call_timeout: Duration,
    max_parse_attempts: u32,
    max_transient_retries: u32,
    initial_backoff: Duration,
    cost: Arc<CostTracker>,
}

impl ModelClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Config`] when the default alias has no
    /// backend.
    pub fn new(config: ClientConfig) -> Result<Self, LlmError> {
        if !config.backends.contains_key(&config.default_alias) {
            return Err(LlmError::Config(format!(
                "default model alias '{}' is not configured",
                config.default_alias
            )));
        }

        let mut rates = BTreeMap::new();
        let mut backends = BTreeMap::new();
        for (alias, backend_config) in &config.backends {
            rates.insert(
                alias.clone(),
                CostRates {
                    input: backend_config.cost_per_m_input.unwrap_or_default(),
                    output: backend_config.cost_per_m_output.unwrap_or_default(),
                },
            );
            backends.insert(alias.clone(), create_backend(backend_config));
        }

        Ok(Self {
            backends,
            default_alias: config.default_alias,
            call_timeout: config.call_timeout,
            max_parse_attempts: config.max_parse_attempts.max(1),
            max_transient_retries: config.max_transient_retries,
            initial_backoff: config.initial_backoff,
            cost: Arc::new(CostTracker::new(rates)),
        })
    }

    /// Build a client backed by a single scripted backend under the
    /// default alias. Transient retries are disabled so exhausted
    /// scripts fail fast in tests and dry runs.
    pub fn scripted(backend: ScriptedBackend) -> Self {
        let mut backends = BTreeMap::new();
        backends.insert(String::from("default"), LlmBackend::Scripted(backend));
        Self {
            backends,
            default_alias: String::from("default"),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_parse_attempts: DEFAULT_PARSE_ATTEMPTS,
            max_transient_retries: 0,
            initial_backoff: Duration::ZERO,
            cost: Arc::new(CostTracker::default()),
        }
    }

    /// Snapshot of token usage and estimated cost so far.
    pub fn cost_summary(&self) -> CostSummary {
        self.cost.summary()
    }

    /// Run a generative call and return its JSON payload.
    ///
    /// Applies backend routing, the per-call deadline, transient
    /// backoff, and the local parse-retry protocol: a response that
    /// fails JSON extraction is pushed back as an assistant message
    /// followed by a corrective user message, up to the parse budget.
    ///
    /// # Errors
    ///
    /// - [`LlmError::Config`] for an unknown alias
    /// - [`LlmError::Timeout`] when a call exceeds the deadline
    /// - [`LlmError::Backend`] when transient retries are exhausted
    /// - [`LlmError::Parse`] when every parse attempt failed
    pub async fn complete_json(&self, call: &ModelCall) -> Result<JsonCompletion, LlmError> {
        let alias = call.alias.as_deref().unwrap_or(&self.default_alias);
        let backend = self.backends.get(alias).ok_or_else(|| {
            LlmError::Config(format!("unknown model alias: {alias}"))
        })?;

        let mut messages = vec![ChatMessage::user(call.user.clone())];
        let mut last_error: Option<LlmError> = None;

        for attempt in 1..=self.max_parse_attempts {
            let request = CompletionRequest {
                system: call.system.clone(),
                messages: messages.clone(),
                temperature: call.temperature,
                max_tokens: call.max_tokens,
            };

            let response = self.call_with_backoff(alias, backend, &request).await?;
            self.cost.record_call(
                alias,
                call.stage,
                response.input_tokens.unwrap_or(0),
                response.output_tokens.unwrap_or(0),
            );

            match extract_json(&response.text) {
                Ok(extraction) => {
                    debug!(
                        stage = %call.stage,
                        alias = alias,
                        attempt = attempt,
                        response_len = response.text.len(),
                        had_preamble = extraction.preamble.is_some(),
                        "model response parsed"
                    );
                    return Ok(JsonCompletion {
                        value: extraction.value,
                        raw: response.text,
                        preamble: extraction.preamble,
                    });
                }
                Err(error) => {
                    warn!(
                        stage = %call.stage,
                        alias = alias,
                        attempt = attempt,
                        error = %error,
                        "model output failed JSON extraction"
                    );
                    let failed_text = if response.text.trim().is_empty() {
                        String::from("(empty response)")
                    } else {
                        response.text
                    };
                    messages.push(ChatMessage::assistant(failed_text));
                    messages.push(ChatMessage::user(format!(
                        "That reply could not be parsed as JSON ({error}). \
                         Respond again with the JSON payload only -- no prose, \
                         no code fences."
                    )));
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Parse {
            message: String::from("parse retry budget exhausted"),
            raw: String::new(),
        }))
    }

    /// One backend call under the deadline, with exponential backoff on
    /// transient failures. Timeouts are not retried here: the deadline
    /// is the stage's attempt budget, so a timeout surfaces immediately.
    async fn call_with_backoff(
        &self,
        alias: &str,
        backend: &LlmBackend,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        let mut delay = self.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            match timeout(self.call_timeout, backend.complete(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(error)) => {
                    if attempt >= self.max_transient_retries {
                        return Err(error);
                    }
                    warn!(
                        alias = alias,
                        backend = backend.name(),
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "transient backend failure, backing off"
                    );
                    sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt = attempt.saturating_add(1);
                }
                Err(_) => return Err(LlmError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_call() -> ModelCall {
        ModelCall {
            stage: Stage::GenerateTemplate,
            alias: None,
            system: String::from("You generate mystery cases."),
            user: String::from("Generate a template."),
            temperature: 0.7,
            max_tokens: 512,
        }
    }

    #[tokio::test]
    async fn clean_json_parses_first_attempt() {
        let scripted = ScriptedBackend::with_responses([r#"{"title": "The Sealed Room"}"#]);
        let client = ModelClient::scripted(scripted.clone());

        let completion = client.complete_json(&test_call()).await.ok();
        assert_eq!(
            completion.and_then(|c| {
                c.value
                    .get("title")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            }),
            Some(String::from("The Sealed Room"))
        );
        assert_eq!(scripted.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn parse_retry_injects_failed_text_and_correction() {
        let scripted = ScriptedBackend::with_responses([
            "I am not JSON, sorry.",
            r#"{"fixed": true}"#,
        ]);
        let client = ModelClient::scripted(scripted.clone());

        let completion = client.complete_json(&test_call()).await.ok();
        assert_eq!(
            completion.and_then(|c| c.value.get("fixed").and_then(serde_json::Value::as_bool)),
            Some(true)
        );

        let requests = scripted.recorded_requests();
        assert_eq!(requests.len(), 2);
        // Second request carries the original prompt, the failed reply as
        // an assistant message, and the corrective user message.
        let second = requests.get(1);
        assert_eq!(second.map(|r| r.messages.len()), Some(3));
        assert!(
            second.is_some_and(|r| {
                r.messages
                    .get(1)
                    .is_some_and(|m| m.content.contains("I am not JSON"))
            })
        );
        assert!(
            second.is_some_and(|r| {
                r.messages
                    .get(2)
                    .is_some_and(|m| m.content.contains("JSON payload only"))
            })
        );
    }

    #[tokio::test]
    async fn parse_budget_exhaustion_surfaces_parse_error() {
        let scripted =
            ScriptedBackend::with_responses(["still not json", "again not json"]);
        let client = ModelClient::scripted(scripted);

        let result = client.complete_json(&test_call()).await;
        assert!(matches!(result, Err(LlmError::Parse { .. })));
    }

    #[tokio::test]
    async fn exhausted_script_is_a_backend_error() {
        let client = ModelClient::scripted(ScriptedBackend::default());
        let result = client.complete_json(&test_call()).await;
        assert!(matches!(result, Err(LlmError::Backend(_))));
    }

    #[tokio::test]
    async fn calls_are_cost_tracked() {
        let scripted = ScriptedBackend::with_responses([r#"{"ok": true}"#]);
        let client = ModelClient::scripted(scripted);
        let _ = client.complete_json(&test_call()).await;

        let summary = client.cost_summary();
        assert_eq!(summary.total_calls, 1);
        assert!(summary.stages.contains_key(&Stage::GenerateTemplate));
    }

    #[test]
    fn new_rejects_missing_default_alias() {
        let config = ClientConfig::default();
        assert!(matches!(ModelClient::new(config), Err(LlmError::Config(_))));
    }
}
