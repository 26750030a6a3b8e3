//! Model access layer for the Caseforge generation pipeline.
//!
//! The pipeline treats the generative model as an external collaborator
//! that consumes a system prompt plus user prompt and must return JSON.
//! This crate owns everything between a stage and that collaborator:
//!
//! ```text
//! Stage context --> Prompt Engine --> Model Backend --> JSON Extraction
//!                                        |                   |
//!                                     backoff           parse retries
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- enum-dispatch model backends (OpenAI-compatible,
//!   Anthropic, scripted)
//! - [`client`] -- routing, deadlines, backoff, and parse retries
//! - [`cost`] -- per-stage token and dollar accounting
//! - [`extract`] -- JSON recovery parsing of raw model output
//! - [`prompt`] -- `minijinja` prompt templates with repair sections
//! - [`error`] -- shared error type

pub mod backend;
pub mod client;
pub mod cost;
pub mod error;
pub mod extract;
pub mod prompt;

// Re-export primary types for convenience.
pub use backend::{
    BackendConfig, BackendType, ChatMessage, CompletionRequest, CompletionResponse, LlmBackend,
    MessageRole, ScriptedBackend, create_backend,
};
pub use client::{ClientConfig, JsonCompletion, ModelCall, ModelClient};
pub use cost::{CostRates, CostSummary, CostTracker, StageUsage};
pub use error::LlmError;
pub use extract::{Extraction, extract_json};
pub use prompt::{PromptEngine, RenderedPrompt};
