use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the split-stacker library
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Video processing error: {0}")]
    Video(#[from] VideoError),

    #[error("Audio processing error: {0}")]
    Audio(#[from] AudioError),

    #[error("Retention error: {0}")]
    Retention(#[from] RetentionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Video-specific errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Failed to load video file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to probe video stream in {path}: {reason}")]
    ProbeFailed { path: String, reason: String },

    #[error("Secondary stream has no frames: {path}")]
    EmptySecondary { path: String },

    #[error("Video decoding failed: {reason}")]
    DecodingFailed { reason: String },

    #[error("Video encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("Frame processing failed: {reason}")]
    FrameProcessingFailed { reason: String },

    #[error("Invalid video parameters: {details}")]
    InvalidParameters { details: String },
}

/// Audio-specific errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Media toolkit not available: {program}")]
    ToolkitUnavailable { program: String },

    #[error("Audio extraction failed: {reason}")]
    ExtractionFailed { reason: String },

    #[error("Audio remux failed: {reason}")]
    RemuxFailed { reason: String },
}

/// Retention-specific errors
#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Retention scheduler is already {state}")]
    InvalidTransition { state: String },

    #[error("Retention loop terminated abnormally: {reason}")]
    LoopFailed { reason: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Decode,
    Encode,
    AudioExtract,
    AudioRemux,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decode => "decode",
            Self::Encode => "encode",
            Self::AudioExtract => "audio-extract",
            Self::AudioRemux => "audio-remux",
        };
        f.write_str(name)
    }
}

impl CompositorError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// The pipeline stage this error belongs to, if it came from the pipeline
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Video(VideoError::EncodingFailed { .. }) => Some(PipelineStage::Encode),
            Self::Video(VideoError::FrameProcessingFailed { .. }) => Some(PipelineStage::Encode),
            Self::Video(_) => Some(PipelineStage::Decode),
            Self::Audio(AudioError::RemuxFailed { .. }) => Some(PipelineStage::AudioRemux),
            Self::Audio(_) => Some(PipelineStage::AudioExtract),
            _ => None,
        }
    }

    /// Whether the pipeline can degrade gracefully instead of failing
    ///
    /// Only audio extraction is recoverable: the job falls back to the
    /// silent composite.
    pub fn is_recoverable(&self) -> bool {
        self.stage() == Some(PipelineStage::AudioExtract)
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Video(VideoError::LoadFailed { path }) => {
                format!("Could not open video '{}'. Please check the file exists and is readable.", path)
            }
            Self::Video(VideoError::EmptySecondary { path }) => {
                format!("The secondary video '{}' contains no frames and cannot be looped.", path)
            }
            Self::Audio(AudioError::ToolkitUnavailable { program }) => {
                format!("'{}' was not found. Install FFmpeg or set toolkit.ffmpeg in the config.", program)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
