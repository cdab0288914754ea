//! # Audio Remux
//!
//! Moves the primary source's audio track onto the silent composite, or
//! falls back to the silent video when there is no usable audio.

pub mod remux;

pub use remux::{promote, remove_if_present, AudioRemuxStage};
