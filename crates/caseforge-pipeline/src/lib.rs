//! The staged generation pipeline for Caseforge mystery cases.
//!
//! A case is produced by a linear sequence of stages over one
//! progressive accumulator: generative stages call the model and are
//! each guarded by a deterministic validator with a bounded retry
//! budget (rejections feed back into the next attempt as repair
//! context); deterministic stages derive knowledge, build the fact
//! graph, assemble the casebook, and compute the optimal path. State is
//! checkpointed after every stage so a failed run can resume from any
//! stage past the template.
//!
//! ```text
//! S1 template -> S2 events -> S2k knowledge -> S3 characters
//!   -> S4 locations -> S5 fact graph -> S6 fact descriptions
//!   -> S7 introduction -> S8 casebook -> S9 prose -> S10 questions
//!   -> S11 optimal path -> S12 store
//! ```
//!
//! # Modules
//!
//! - [`orchestrator`] -- stage order, retry protocol, checkpoints,
//!   resume
//! - [`stages`] -- generative stage implementations and validators
//! - [`knowledge`] -- S2k perception-channel derivation and cleanup
//!   detection
//! - [`factgraph`] -- S5 skeletons, reachability, bridge synthesis,
//!   red herrings
//! - [`casebook`] -- S8 skeleton, polish merge, and reachability
//!   validation
//! - [`optimal_path`] -- S11 gate-aware greedy set cover
//! - [`context`] -- shared generative-stage plumbing
//! - [`dag`] -- Kahn topological ordering with cycle witness
//! - [`error`] -- pipeline error taxonomy

pub mod casebook;
pub mod context;
pub mod dag;
pub mod error;
pub mod factgraph;
pub mod knowledge;
pub mod optimal_path;
pub mod orchestrator;
pub mod stages;

// Re-export primary types for convenience.
pub use context::StageContext;
pub use error::PipelineError;
pub use orchestrator::Orchestrator;
