//! # Split-Stacker
//!
//! Stack two videos into one vertical composite: the primary plays once on
//! top, the secondary loops underneath to fill the primary's duration, and
//! the primary's audio is carried onto the result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use split_stacker::{
//!     composition::{CompositionEngine, StackRequest},
//!     config::Config,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = CompositionEngine::with_ffmpeg(Config::default());
//! let request = StackRequest::new("gameplay.mp4", "background.mp4", "stacked.mp4")
//!     .with_progress("stacked.progress");
//!
//! let record = engine.compose(&request)?;
//! println!("{} frames, audio: {}", record.frames_written, record.has_audio);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - Frame sources, resizing, stacking and the silent encode
//! - [`audio`] - Audio extraction and remux onto the composite
//! - [`composition`] - The per-job pipeline and its state machine
//! - [`jobs`] - Admission gate bounding concurrent jobs
//! - [`retention`] - Background age-based cleanup of working directories
//! - [`toolkit`] - The seam to the external media toolkit (ffmpeg)
//! - [`progress`] - Integer percent progress reporting
//! - [`config`] - Configuration management

pub mod audio;
pub mod composition;
pub mod config;
pub mod error;
pub mod jobs;
pub mod progress;
pub mod retention;
pub mod toolkit;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{CompositionEngine, FillRequest, JobRecord, StackRequest},
    config::Config,
    error::{CompositorError, Result},
    jobs::JobGate,
    retention::{RetentionPolicy, RetentionScheduler},
    toolkit::{FfmpegToolkit, MediaToolkit},
};
