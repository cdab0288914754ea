use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::{JobsConfig, VideoConfig};
use crate::error::{Result, VideoError};
use crate::progress::ProgressTracker;
use crate::toolkit::MediaToolkit;
use crate::video::compositor::StackCompositor;
use crate::video::decoder::spawn_stderr_collector;
use crate::video::reader::{DualStreamReader, FrameSource};
use crate::video::resize::resize;
use crate::video::types::Frame;

/// Parameters of the silent composite
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub pixel_format: String,
    pub crf: u8,
    pub threads: usize,
}

impl EncodeParams {
    pub fn from_config(video: &VideoConfig, jobs: &JobsConfig, fps: f64) -> Self {
        Self {
            width: video.output_width,
            height: video.output_height,
            fps,
            codec: video.codec.clone(),
            pixel_format: video.pixel_format.clone(),
            crf: video.crf(),
            threads: jobs.encoder_threads(),
        }
    }
}

/// Accepts composited frames in order and writes them to a container
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the container, returning the number of frames written
    fn finish(self: Box<Self>) -> Result<u64>;
}

/// Encodes RGB24 frames piped into an ffmpeg subprocess
pub struct FfmpegSink {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr: Option<JoinHandle<Vec<String>>>,
    frames_written: u64,
}

impl FfmpegSink {
    pub fn open(ffmpeg: &Path, path: &Path, params: &EncodeParams) -> Result<Self> {
        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-loglevel").arg("error")
            .arg("-y")
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgb24")
            .arg("-s").arg(format!("{}x{}", params.width, params.height))
            .arg("-r").arg(params.fps.to_string())
            .arg("-i").arg("pipe:0")
            .arg("-an")
            .arg("-c:v").arg(&params.codec)
            .arg("-pix_fmt").arg(&params.pixel_format)
            .arg("-crf").arg(params.crf.to_string())
            .arg("-threads").arg(params.threads.to_string())
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| VideoError::EncodingFailed {
            reason: format!("could not spawn {}: {}", ffmpeg.display(), e),
        })?;

        let stderr = child.stderr.take().map(spawn_stderr_collector);
        let stdin = child.stdin.take().ok_or_else(|| VideoError::EncodingFailed {
            reason: "ffmpeg stdin missing".to_string(),
        })?;

        debug!("Encoder started for {} ({}x{} @ {}fps, {})", path.display(), params.width, params.height, params.fps, params.codec);

        Ok(Self {
            path: path.to_path_buf(),
            width: params.width,
            height: params.height,
            child: Some(child),
            stdin: Some(BufWriter::with_capacity(8 * 1024 * 1024, stdin)),
            stderr,
            frames_written: 0,
        })
    }

    fn stderr_tail(&mut self) -> String {
        let lines = self.stderr.take().and_then(|h| h.join().ok()).unwrap_or_default();
        if lines.is_empty() {
            "<no ffmpeg stderr>".to_string()
        } else {
            lines.join(" | ")
        }
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(VideoError::FrameProcessingFailed {
                reason: format!(
                    "frame is {}x{}, encoder expects {}x{}",
                    frame.width(), frame.height(), self.width, self.height
                ),
            }.into());
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(VideoError::EncodingFailed { reason: "encoder already closed".to_string() }.into());
        };

        if let Err(e) = stdin.write_all(frame.as_rgb_bytes()) {
            let tail = self.stderr_tail();
            return Err(VideoError::EncodingFailed {
                reason: format!("writing frame {} to {}: {} stderr_tail={}", self.frames_written, self.path.display(), e, tail),
            }.into());
        }

        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<u64> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().map_err(|e| VideoError::EncodingFailed {
                reason: format!("flushing encoder input: {}", e),
            })?;
        }

        let Some(mut child) = self.child.take() else {
            return Ok(self.frames_written);
        };

        let status = child.wait()?;
        if !status.success() {
            let tail = self.stderr_tail();
            return Err(VideoError::EncodingFailed {
                reason: format!("ffmpeg encode failed for {} status={} stderr_tail={}", self.path.display(), status, tail),
            }.into());
        }

        Ok(self.frames_written)
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.stdin.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Outcome of the silent encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSummary {
    pub frames_written: u64,
    pub fps: f64,
    pub secondary_loops: u32,
}

/// Composites every frame pair and encodes the result without audio
pub struct VideoEncodeStage<'a> {
    toolkit: &'a dyn MediaToolkit,
    params: EncodeParams,
}

impl<'a> VideoEncodeStage<'a> {
    pub fn new(toolkit: &'a dyn MediaToolkit, params: EncodeParams) -> Self {
        Self { toolkit, params }
    }

    /// Encode the whole primary stream to `output`
    ///
    /// An existing file at `output` is replaced. On failure the partial
    /// output is removed.
    pub fn run(
        &self,
        reader: &mut DualStreamReader,
        output: &Path,
        progress: &mut ProgressTracker,
    ) -> Result<EncodeSummary> {
        self.with_output(output, |output| self.encode(reader, output, progress))
    }

    /// Crop-and-fill every frame of a single `source` into `output`
    ///
    /// Same overwrite and cleanup rules as [`run`](Self::run).
    pub fn run_fill(
        &self,
        source: &mut dyn FrameSource,
        output: &Path,
        progress: &mut ProgressTracker,
    ) -> Result<EncodeSummary> {
        self.with_output(output, |output| self.encode_fill(source, output, progress))
    }

    fn with_output<F>(&self, output: &Path, encode: F) -> Result<EncodeSummary>
    where
        F: FnOnce(&Path) -> Result<EncodeSummary>,
    {
        if output.exists() {
            debug!("Removing existing output {}", output.display());
            std::fs::remove_file(output)?;
        }

        let result = encode(output);
        if result.is_err() && output.exists() {
            if let Err(e) = std::fs::remove_file(output) {
                warn!("Failed to remove partial output {}: {}", output.display(), e);
            }
        }
        result
    }

    fn encode_fill(
        &self,
        source: &mut dyn FrameSource,
        output: &Path,
        progress: &mut ProgressTracker,
    ) -> Result<EncodeSummary> {
        let (width, height) = (self.params.width, self.params.height);
        let needs_resize = source.info().needs_resize(width, height);
        let mut sink = self.toolkit.open_sink(output, &self.params)?;

        progress.set_total(source.info().frame_count.unwrap_or(0));
        progress.start();

        while let Some(frame) = source.next_frame()? {
            let frame = if needs_resize { resize(&frame, width, height) } else { frame };
            sink.write_frame(&frame)?;
            progress.advance();
        }

        progress.complete();
        let frames_written = sink.finish()?;
        info!("Resized {} frames to {}x{} into {}", frames_written, width, height, output.display());

        Ok(EncodeSummary {
            frames_written,
            fps: self.params.fps,
            secondary_loops: 0,
        })
    }

    fn encode(
        &self,
        reader: &mut DualStreamReader,
        output: &Path,
        progress: &mut ProgressTracker,
    ) -> Result<EncodeSummary> {
        let compositor = StackCompositor::new(self.params.width, self.params.height);
        let mut sink = self.toolkit.open_sink(output, &self.params)?;

        progress.set_total(reader.primary_frame_count());
        progress.start();

        while let Some(pair) = reader.next_pair()? {
            let frame = compositor.compose(&pair.primary, &pair.secondary)?;
            sink.write_frame(&frame)?;
            progress.advance();
        }

        progress.complete();
        let frames_written = sink.finish()?;

        info!(
            "Encoded {} frames at {:.3}fps to {} ({} secondary loops)",
            frames_written, self.params.fps, output.display(), reader.secondary_loops()
        );

        Ok(EncodeSummary {
            frames_written,
            fps: self.params.fps,
            secondary_loops: reader.secondary_loops(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CallbackProgressSink;
    use crate::toolkit::testing::FakeToolkit;
    use crate::video::reader::MemorySource;
    use crate::video::types::StreamInfo;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn source(name: &str, count: usize, fps: f64) -> Box<dyn FrameSource> {
        let frames = (0..count).map(|i| Frame::new_filled(4, 2, [i as u8, 1, 2])).collect();
        Box::new(MemorySource::new(StreamInfo::new(name, 4, 2, fps), frames))
    }

    fn params(fps: f64) -> EncodeParams {
        EncodeParams {
            width: 4,
            height: 4,
            fps,
            codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            crf: 23,
            threads: 1,
        }
    }

    #[test]
    fn test_encodes_one_frame_per_primary_frame() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("silent.mp4");
        let toolkit = FakeToolkit::default();
        let mut reader = DualStreamReader::new(source("a", 7, 30.0), source("b", 2, 25.0), 4, 4).unwrap();

        let values = Arc::new(Mutex::new(Vec::new()));
        let sink_values = Arc::clone(&values);
        let mut progress = ProgressTracker::new(Some(Box::new(CallbackProgressSink::new(move |p| {
            sink_values.lock().unwrap().push(p)
        }))));

        let stage = VideoEncodeStage::new(&toolkit, params(reader.target_fps()));
        let summary = stage.run(&mut reader, &output, &mut progress).unwrap();

        assert_eq!(summary.frames_written, 7);
        assert_eq!(summary.fps, 25.0);
        assert_eq!(summary.secondary_loops, 3);
        assert_eq!(FakeToolkit::frames_in(&output), 7);

        let values = values.lock().unwrap();
        assert_eq!(values.last(), Some(&100));
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_existing_output_is_replaced() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("silent.mp4");
        std::fs::write(&output, "stale contents from an earlier run").unwrap();

        let toolkit = FakeToolkit::default();
        let mut reader = DualStreamReader::new(source("a", 2, 30.0), source("b", 2, 30.0), 4, 4).unwrap();
        let stage = VideoEncodeStage::new(&toolkit, params(30.0));
        stage.run(&mut reader, &output, &mut ProgressTracker::disabled()).unwrap();

        assert_eq!(FakeToolkit::frames_in(&output), 2);
    }

    #[test]
    fn test_failure_removes_partial_output_and_keeps_progress_below_100() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("silent.mp4");
        let toolkit = FakeToolkit::default();
        let mut reader = DualStreamReader::new(source("a", 3, 30.0), source("b", 0, 30.0), 4, 4).unwrap();
        let mut progress = ProgressTracker::disabled();

        let stage = VideoEncodeStage::new(&toolkit, params(30.0));
        assert!(stage.run(&mut reader, &output, &mut progress).is_err());
        assert!(!output.exists());
        assert_eq!(progress.last_reported(), Some(0));
    }

    #[test]
    fn test_fill_resizes_every_frame() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("filled.mp4");
        let toolkit = FakeToolkit::default();
        let frames = (0..5).map(|_| Frame::new_filled(16, 9, [9, 9, 9])).collect();
        let mut source = MemorySource::new(StreamInfo::new("wide.mp4", 16, 9, 30.0), frames);
        let mut progress = ProgressTracker::disabled();

        let stage = VideoEncodeStage::new(&toolkit, params(30.0));
        let summary = stage.run_fill(&mut source, &output, &mut progress).unwrap();

        assert_eq!(summary.frames_written, 5);
        assert_eq!(summary.secondary_loops, 0);
        assert_eq!(FakeToolkit::frames_in(&output), 5);
        assert_eq!(progress.last_reported(), Some(100));
    }

    #[test]
    fn test_sink_rejects_wrong_geometry() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("silent.mp4");
        let toolkit = FakeToolkit::default();
        let mut sink = toolkit.open_sink(&output, &params(30.0)).unwrap();
        assert!(sink.write_frame(&Frame::new_black(4, 3)).is_err());
    }

    #[test]
    fn test_missing_encoder_binary() {
        let dir = tempdir().unwrap();
        let result = FfmpegSink::open(Path::new("/nonexistent/ffmpeg"), &dir.path().join("o.mp4"), &params(30.0));
        assert!(result.is_err());
    }
}
