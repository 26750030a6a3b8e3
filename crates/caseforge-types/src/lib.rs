//! Shared type definitions for the Caseforge mystery generator.
//!
//! This crate is the single source of truth for all types used across
//! the Caseforge workspace: identifiers, closed vocabularies, the case
//! domain model, and the progressive accumulator threaded through the
//! generation pipeline.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers for prefixed string identifiers
//! - [`enums`] -- Enumeration types (difficulty, involvement, statuses,
//!   categories, stages)
//! - [`structs`] -- Core entity structs (template, events, characters,
//!   locations, facts, casebook, questions, the final case)
//! - [`state`] -- Run input, validation results, and the accumulator

pub mod enums;
pub mod ids;
pub mod state;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    Difficulty, FactCategory, Involvement, KnowledgeStatus, MysteryStyle, NarrativeTone,
    Necessity, Stage,
};
pub use ids::{
    BRIDGE_FACT_PREFIX, CharacterId, DraftId, EntryId, EventId, FactId, LocationId, QuestionId,
    RED_HERRING_FACT_PREFIX, RoleId, SubjectId,
};
pub use state::{GenerationInput, GenerationState, ResumeRequest, ValidationResult};
pub use structs::{
    Answer, Case, CaseEvent, CasebookEntry, Character, ComputedKnowledge, EventReveal, EventSlot,
    Fact, FactGraph, FactSkeleton, FactSource, Location, Question, RoleSpec, Template,
    ToneProfile, sort_events_chronologically,
};
