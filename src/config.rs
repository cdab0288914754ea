use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for split-stacker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output geometry and encoder settings
    pub video: VideoConfig,

    /// External media toolkit binaries
    pub toolkit: ToolkitConfig,

    /// Audio extraction and remux settings
    pub audio: AudioConfig,

    /// Working-directory retention
    pub retention: RetentionConfig,

    /// Concurrent job admission
    pub jobs: JobsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.video.validate()?;
        self.toolkit.validate()?;
        self.retention.validate()?;
        self.jobs.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Output video configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Width of the composite
    pub output_width: u32,

    /// Height of the composite; split evenly between the two streams
    pub output_height: u32,

    /// Encoder passed to `-c:v`
    pub codec: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    /// Pixel format of the encoded output
    pub pixel_format: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_width: 1080,
            output_height: 1920,
            codec: "libx264".to_string(),
            quality: 85,
            pixel_format: "yuv420p".to_string(),
        }
    }
}

impl VideoConfig {
    fn validate(&self) -> Result<()> {
        if self.output_width == 0 {
            return Err(invalid("video.output_width", self.output_width).into());
        }

        if self.output_height == 0 || self.output_height % 2 != 0 {
            return Err(invalid("video.output_height", self.output_height).into());
        }

        if self.quality > 100 {
            return Err(invalid("video.quality", self.quality).into());
        }

        if self.codec.trim().is_empty() {
            return Err(invalid("video.codec", &self.codec).into());
        }

        Ok(())
    }

    /// Map the 0-100 quality onto an x264-style CRF (51 worst, 0 lossless)
    ///
    /// Quality above 100 is treated as 100.
    pub fn crf(&self) -> u8 {
        let quality = self.quality.min(100);
        51 - ((quality as f32 / 100.0) * 51.0) as u8
    }
}

/// Locations of the external media toolkit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl ToolkitConfig {
    fn validate(&self) -> Result<()> {
        if self.ffmpeg.as_os_str().is_empty() {
            return Err(invalid("toolkit.ffmpeg", "").into());
        }
        if self.ffprobe.as_os_str().is_empty() {
            return Err(invalid("toolkit.ffprobe", "").into());
        }
        Ok(())
    }
}

/// Audio remux configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Codec the remuxed audio track is encoded with
    pub codec: String,

    /// Container extension for the extracted intermediate track
    pub intermediate_extension: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            intermediate_extension: "mp3".to_string(),
        }
    }
}

/// Retention scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Directories swept on every pass
    pub roots: Vec<PathBuf>,

    /// Entries older than this are removed
    pub max_age_secs: u64,

    /// Time between passes
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("data")],
            max_age_secs: 2 * 24 * 60 * 60,
            interval_secs: 2 * 60 * 60,
        }
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(invalid("retention.interval_secs", self.interval_secs).into());
        }
        Ok(())
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Job admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Pipelines allowed to run at once
    pub max_concurrent: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

impl JobsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(invalid("jobs.max_concurrent", self.max_concurrent).into());
        }
        Ok(())
    }

    /// Encoder threads per job so concurrent jobs share the host's cores
    pub fn encoder_threads(&self) -> usize {
        (num_cpus::get().max(1) / self.max_concurrent.max(1)).max(1)
    }
}
