//! # Composition Engine
//!
//! Runs one stacking job end to end: silent encode, audio extraction and
//! remux, with temporary artifacts cleaned up on every exit path.

pub mod engine;

pub use engine::{CompositionEngine, FillRequest, JobRecord, PipelineState, StackRequest, WorkPaths};
