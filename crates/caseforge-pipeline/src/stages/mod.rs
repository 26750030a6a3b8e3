//! Stage implementations.
//!
//! Each generative stage module exposes `generate` (build the stage
//! context, call the model, parse, write the accumulator) and, where
//! the stage has one, `validate`. The deterministic hard cores live
//! one level up ([`crate::knowledge`], [`crate::factgraph`],
//! [`crate::casebook`], [`crate::optimal_path`]).

pub mod characters;
pub mod events;
pub mod facts;
pub mod introduction;
pub mod locations;
pub mod prose;
pub mod questions;
pub mod store;
pub mod template;
