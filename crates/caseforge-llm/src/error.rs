//! Error types for the model client.
//!
//! Uses `thiserror` for typed errors that surface through the whole
//! generative path: backend HTTP calls, prompt rendering, JSON
//! extraction, and configuration.

/// Errors that can occur while talking to a generative model.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// A model backend returned an error or was unreachable.
    #[error("model backend error: {0}")]
    Backend(String),

    /// The per-call deadline was exceeded.
    #[error("timeout: model call exceeded deadline")]
    Timeout,

    /// No JSON could be extracted from the model's response text.
    ///
    /// Carries the raw text so callers can log it and feed it back into
    /// the next attempt.
    #[error("response parse error: {message}")]
    Parse {
        /// What went wrong during extraction.
        message: String,
        /// The raw response text that failed to parse.
        raw: String,
    },

    /// Failed to render a prompt template.
    #[error("template render error: {0}")]
    Template(String),

    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
