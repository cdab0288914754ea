use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::{promote, remove_if_present, AudioRemuxStage},
    config::Config,
    error::{Result, VideoError},
    progress::{FileProgressSink, ProgressTracker},
    toolkit::{FfmpegToolkit, MediaToolkit},
    video::{DualStreamReader, EncodeParams, EncodeSummary, VideoEncodeStage},
};

/// One compositing job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRequest {
    /// Plays once on top; its length, frame rate and audio drive the output
    pub primary: PathBuf,

    /// Loops underneath to fill the primary's duration
    pub secondary: PathBuf,

    /// Final output file
    pub output: PathBuf,

    /// Optional file receiving the current percentage
    #[serde(default)]
    pub progress: Option<PathBuf>,
}

impl StackRequest {
    pub fn new<P: Into<PathBuf>>(primary: P, secondary: P, output: P) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
            output: output.into(),
            progress: None,
        }
    }

    pub fn with_progress<P: Into<PathBuf>>(mut self, progress: P) -> Self {
        self.progress = Some(progress.into());
        self
    }
}

/// One video to crop-and-fill to a fixed size, without stacking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub progress: Option<PathBuf>,
}

impl FillRequest {
    pub fn new<P: Into<PathBuf>>(input: P, output: P, width: u32, height: u32) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            width,
            height,
            progress: None,
        }
    }

    pub fn with_progress<P: Into<PathBuf>>(mut self, progress: P) -> Self {
        self.progress = Some(progress.into());
        self
    }
}

/// What a finished job produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub primary: PathBuf,
    pub secondary: PathBuf,
    pub output: PathBuf,
    pub frames_written: u64,
    pub fps: f64,
    pub secondary_loops: u32,
    pub has_audio: bool,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Where a job is in the two-phase encode
///
/// `Composing -> AudioExtracting -> Remuxing -> Done`. A failed extraction
/// goes straight to `Done` with the silent composite as the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Composing,
    AudioExtracting,
    Remuxing,
    Done { has_audio: bool },
}

fn file_tracker(path: Option<&Path>) -> ProgressTracker {
    match path {
        Some(path) => ProgressTracker::new(Some(Box::new(FileProgressSink::new(path)))),
        None => ProgressTracker::disabled(),
    }
}

/// Intermediate files of one job, kept next to the output
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPaths {
    pub silent: PathBuf,
    pub audio: PathBuf,
    pub remux_staging: PathBuf,
}

impl WorkPaths {
    pub fn for_output(output: &Path, audio_extension: &str) -> Self {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let extension = output
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());

        let sibling = |name: String| output.with_file_name(name);
        Self {
            silent: sibling(format!("{}.silent.{}", stem, extension)),
            audio: sibling(format!("{}.audio.{}", stem, audio_extension)),
            remux_staging: sibling(format!("{}.part.{}", stem, extension)),
        }
    }
}

/// Runs the compositing pipeline for one job at a time
///
/// Each call to [`compose`](Self::compose) is an independent, blocking
/// pipeline; the engine itself holds no per-job state and can be shared.
pub struct CompositionEngine {
    config: Config,
    toolkit: Arc<dyn MediaToolkit>,
}

impl CompositionEngine {
    pub fn new(config: Config, toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self { config, toolkit }
    }

    /// Engine using the ffmpeg binaries named in `config`
    pub fn with_ffmpeg(config: Config) -> Self {
        let toolkit = Arc::new(FfmpegToolkit::from_config(&config));
        Self::new(config, toolkit)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one job, reporting progress to `request.progress` if set
    pub fn compose(&self, request: &StackRequest) -> Result<JobRecord> {
        self.compose_with_progress(request, file_tracker(request.progress.as_deref()))
    }

    /// Crop-and-fill a single video to `request.width x request.height`
    ///
    /// The result has no audio. Frames are encoded to a staging file next to
    /// the output, which is moved into place only once the encode succeeds.
    pub fn resize_to_fill(&self, request: &FillRequest) -> Result<EncodeSummary> {
        if request.width == 0 || request.height == 0 || request.width % 2 != 0 || request.height % 2 != 0 {
            return Err(VideoError::InvalidParameters {
                details: format!("fill size must be even and non-zero, got {}x{}", request.width, request.height),
            }.into());
        }

        info!(
            input = %request.input.display(),
            output = %request.output.display(),
            "Resizing to fill {}x{}",
            request.width,
            request.height
        );

        let mut progress = file_tracker(request.progress.as_deref());
        let staging = WorkPaths::for_output(&request.output, &self.config.audio.intermediate_extension).remux_staging;
        self.prepare_output(&request.output)?;

        let mut source = self.toolkit.open_source(&request.input)?;
        let fps = source.info().fps;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(VideoError::InvalidParameters {
                details: format!("{} reports frame rate {}", request.input.display(), fps),
            }.into());
        }

        let mut params = EncodeParams::from_config(&self.config.video, &self.config.jobs, fps);
        params.width = request.width;
        params.height = request.height;

        let summary = VideoEncodeStage::new(self.toolkit.as_ref(), params).run_fill(source.as_mut(), &staging, &mut progress)?;
        if let Err(e) = promote(&staging, &request.output) {
            remove_if_present(&staging);
            return Err(e.into());
        }
        Ok(summary)
    }

    /// Run one job with a caller-supplied progress tracker
    pub fn compose_with_progress(&self, request: &StackRequest, mut progress: ProgressTracker) -> Result<JobRecord> {
        let started = Instant::now();
        info!(
            primary = %request.primary.display(),
            secondary = %request.secondary.display(),
            output = %request.output.display(),
            "Starting stack job"
        );

        let paths = WorkPaths::for_output(&request.output, &self.config.audio.intermediate_extension);
        self.prepare_output(&request.output)?;

        let audio = AudioRemuxStage::new(self.toolkit.as_ref());
        let mut summary = None;
        let mut state = PipelineState::Composing;

        let has_audio = loop {
            debug!(?state, output = %request.output.display(), "Pipeline state");
            state = match state {
                PipelineState::Composing => {
                    summary = Some(self.compose_silent(request, &paths.silent, &mut progress)?);
                    PipelineState::AudioExtracting
                }
                PipelineState::AudioExtracting => match audio.extract(&request.primary, &paths.audio) {
                    Ok(()) => PipelineState::Remuxing,
                    Err(e) if e.is_recoverable() => {
                        warn!("Audio extraction failed for {}, keeping silent video: {}", request.primary.display(), e);
                        if let Err(e) = audio.keep_silent(&paths.silent, &request.output) {
                            remove_if_present(&paths.silent);
                            return Err(e);
                        }
                        PipelineState::Done { has_audio: false }
                    }
                    Err(e) => {
                        remove_if_present(&paths.silent);
                        return Err(e);
                    }
                },
                PipelineState::Remuxing => {
                    audio.remux(&paths.silent, &paths.audio, &paths.remux_staging, &request.output)?;
                    PipelineState::Done { has_audio: true }
                }
                PipelineState::Done { has_audio } => break has_audio,
            };
        };

        let summary = summary.unwrap_or(EncodeSummary {
            frames_written: progress.completed(),
            fps: 0.0,
            secondary_loops: 0,
        });

        let record = JobRecord {
            primary: request.primary.clone(),
            secondary: request.secondary.clone(),
            output: request.output.clone(),
            frames_written: summary.frames_written,
            fps: summary.fps,
            secondary_loops: summary.secondary_loops,
            has_audio,
            elapsed_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        info!(
            "Stack job complete: {} ({} frames, audio: {}, {:.1}s)",
            record.output.display(),
            record.frames_written,
            record.has_audio,
            record.elapsed_ms as f64 / 1000.0
        );
        Ok(record)
    }

    /// Make room for the output: replace any previous file, create its directory
    fn prepare_output(&self, output: &Path) -> Result<()> {
        if output.exists() {
            debug!("Removing existing output {}", output.display());
            std::fs::remove_file(output)?;
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Decode, resize, stack and encode into the silent intermediate
    fn compose_silent(&self, request: &StackRequest, silent: &Path, progress: &mut ProgressTracker) -> Result<EncodeSummary> {
        let video = &self.config.video;

        let primary = self.toolkit.open_source(&request.primary)?;
        let secondary = self.toolkit.open_source(&request.secondary)?;
        let mut reader = DualStreamReader::new(primary, secondary, video.output_width, video.output_height)?;

        let fps = reader.target_fps();
        info!(
            "Reconciled frame rate {:.3}fps (primary {:.3}, secondary {:.3}); {} primary frames",
            fps,
            reader.primary_info().fps,
            reader.secondary_info().fps,
            reader.primary_frame_count()
        );

        let params = EncodeParams::from_config(video, &self.config.jobs, fps);
        VideoEncodeStage::new(self.toolkit.as_ref(), params).run(&mut reader, silent, progress)
    }
}
