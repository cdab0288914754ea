//! The external media toolkit.
//!
//! Everything that touches codecs goes through [`MediaToolkit`]: opening
//! decoded frame sources, opening the silent-video encoder, and the two
//! audio invocations. [`FfmpegToolkit`] drives the `ffmpeg`/`ffprobe` CLIs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::Config;
use crate::error::{AudioError, Result};
use crate::video::decoder::FfmpegSource;
use crate::video::encoder::{EncodeParams, FfmpegSink, FrameSink};
use crate::video::probe::probe_stream;
use crate::video::reader::FrameSource;

/// Codec operations the pipeline needs from the outside world
pub trait MediaToolkit: Send + Sync {
    /// Open a video file as a sequential frame source
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    /// Open an encoder writing a silent video to `path`
    fn open_sink(&self, path: &Path, params: &EncodeParams) -> Result<Box<dyn FrameSink>>;

    /// Copy the audio track of `source` into `dest`
    fn extract_audio(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Combine the video track of `video` with the audio track of `audio` into `output`
    fn remux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

/// [`MediaToolkit`] backed by the ffmpeg command-line tools
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    audio_codec: String,
}

impl FfmpegToolkit {
    pub fn new<P: Into<PathBuf>>(ffmpeg: P, ffprobe: P, audio_codec: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            audio_codec: audio_codec.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.toolkit.ffmpeg.clone(),
            config.toolkit.ffprobe.clone(),
            config.audio.codec.clone(),
        )
    }

    /// Whether `ffmpeg -version` runs successfully
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Arguments for pulling the audio track out of `source`
    pub fn extract_args(source: &Path, dest: &Path) -> Vec<OsString> {
        let mut args = os_args(&["-y", "-i"]);
        args.push(source.as_os_str().to_os_string());
        args.extend(os_args(&["-q:a", "0", "-map", "a"]));
        args.push(dest.as_os_str().to_os_string());
        args
    }

    /// Arguments for copying the video track and re-encoding the audio track into `output`
    pub fn remux_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args = os_args(&["-y", "-i"]);
        args.push(video.as_os_str().to_os_string());
        args.push("-i".into());
        args.push(audio.as_os_str().to_os_string());
        args.extend(os_args(&["-c:v", "copy", "-c:a"]));
        args.push(self.audio_codec.clone().into());
        args.extend(os_args(&["-map", "0:v:0", "-map", "1:a:0"]));
        args.push(output.as_os_str().to_os_string());
        args
    }

    /// Run ffmpeg to completion; the exit code is the only success signal
    fn run(&self, args: &[OsString]) -> std::result::Result<(), ToolkitFailure> {
        debug!("Running {} {:?}", self.ffmpeg.display(), args);

        let output = Command::new(&self.ffmpeg)
            .arg("-hide_banner")
            .arg("-loglevel").arg("error")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ToolkitFailure::Unavailable
                } else {
                    ToolkitFailure::Failed(format!("could not run {}: {}", self.ffmpeg.display(), e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolkitFailure::Failed(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

enum ToolkitFailure {
    Unavailable,
    Failed(String),
}

impl MediaToolkit for FfmpegToolkit {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        let info = probe_stream(&self.ffprobe, path)?;
        Ok(Box::new(FfmpegSource::open(&self.ffmpeg, info)?))
    }

    fn open_sink(&self, path: &Path, params: &EncodeParams) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::open(&self.ffmpeg, path, params)?))
    }

    fn extract_audio(&self, source: &Path, dest: &Path) -> Result<()> {
        self.run(&Self::extract_args(source, dest)).map_err(|failure| match failure {
            ToolkitFailure::Unavailable => AudioError::ToolkitUnavailable {
                program: self.ffmpeg.display().to_string(),
            },
            ToolkitFailure::Failed(reason) => AudioError::ExtractionFailed { reason },
        })?;
        Ok(())
    }

    fn remux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.run(&self.remux_args(video, audio, output)).map_err(|failure| match failure {
            ToolkitFailure::Unavailable => AudioError::RemuxFailed {
                reason: format!("{} not found", self.ffmpeg.display()),
            },
            ToolkitFailure::Failed(reason) => AudioError::RemuxFailed { reason },
        })?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory toolkit for pipeline tests.

    use std::collections::HashMap;
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::MediaToolkit;
    use crate::error::{AudioError, Result, VideoError};
    use crate::video::encoder::{EncodeParams, FrameSink};
    use crate::video::reader::{FrameSource, MemorySource};
    use crate::video::types::{Frame, StreamInfo};

    /// What the fake does when asked for audio
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum AudioBehavior {
        #[default]
        Succeeds,
        ToolkitMissing,
        ExtractFails,
        RemuxFails,
    }

    #[derive(Debug, Clone)]
    struct SourceSpec {
        width: u32,
        height: u32,
        fps: f64,
        frames: usize,
    }

    #[derive(Default)]
    pub struct FakeToolkit {
        sources: HashMap<PathBuf, SourceSpec>,
        pub audio: AudioBehavior,
        pub frame_delay: Option<Duration>,
        pub active_encoders: Arc<AtomicUsize>,
        pub peak_encoders: Arc<AtomicUsize>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeToolkit {
        pub fn with_source(mut self, path: &Path, frames: usize, width: u32, height: u32, fps: f64) -> Self {
            self.sources.insert(path.to_path_buf(), SourceSpec { width, height, fps, frames });
            self
        }

        pub fn with_audio(mut self, audio: AudioBehavior) -> Self {
            self.audio = audio;
            self
        }

        pub fn with_frame_delay(mut self, delay: Duration) -> Self {
            self.frame_delay = Some(delay);
            self
        }

        /// Frames the fake encoder wrote to `path`
        pub fn frames_in(path: &Path) -> u64 {
            fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl MediaToolkit for FakeToolkit {
        fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            let fake = self
                .sources
                .get(path)
                .ok_or_else(|| VideoError::LoadFailed { path: path.display().to_string() })?;

            let frames = (0..fake.frames)
                .map(|i| Frame::new_filled(fake.width, fake.height, [i as u8, 0, 0]))
                .collect();
            let info = StreamInfo::new(path, fake.width, fake.height, fake.fps);
            Ok(Box::new(SlowSource {
                inner: MemorySource::new(info, frames),
                delay: self.frame_delay,
            }))
        }

        fn open_sink(&self, path: &Path, params: &EncodeParams) -> Result<Box<dyn FrameSink>> {
            self.record(format!("encode {}", path.display()));
            let file = fs::File::create(path)?;
            let active = self.active_encoders.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_encoders.fetch_max(active, Ordering::SeqCst);

            Ok(Box::new(FakeSink {
                file,
                width: params.width,
                height: params.height,
                written: 0,
                active: Arc::clone(&self.active_encoders),
            }))
        }

        fn extract_audio(&self, source: &Path, dest: &Path) -> Result<()> {
            self.record(format!("extract {}", source.display()));
            match self.audio {
                AudioBehavior::ToolkitMissing => Err(AudioError::ToolkitUnavailable { program: "ffmpeg".into() }.into()),
                AudioBehavior::ExtractFails => {
                    fs::write(dest, b"partial")?;
                    Err(AudioError::ExtractionFailed { reason: "no audio stream".into() }.into())
                }
                _ => {
                    fs::write(dest, b"audio")?;
                    Ok(())
                }
            }
        }

        fn remux(&self, video: &Path, _audio: &Path, output: &Path) -> Result<()> {
            self.record(format!("remux {}", output.display()));
            if self.audio == AudioBehavior::RemuxFails {
                fs::write(output, b"half")?;
                return Err(AudioError::RemuxFailed { reason: "muxer error".into() }.into());
            }
            fs::copy(video, output)?;
            Ok(())
        }
    }

    struct SlowSource {
        inner: MemorySource,
        delay: Option<Duration>,
    }

    impl FrameSource for SlowSource {
        fn info(&self) -> &StreamInfo {
            self.inner.info()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.inner.next_frame()
        }

        fn rewind(&mut self) -> Result<()> {
            self.inner.rewind()
        }
    }

    /// Writes one byte per frame
    struct FakeSink {
        file: fs::File,
        width: u32,
        height: u32,
        written: u64,
        active: Arc<AtomicUsize>,
    }

    impl FrameSink for FakeSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            if frame.width() != self.width || frame.height() != self.height {
                return Err(VideoError::FrameProcessingFailed { reason: "geometry".into() }.into());
            }
            self.file.write_all(b"F")?;
            self.written += 1;
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<u64> {
            self.file.sync_all()?;
            Ok(self.written)
        }
    }

    impl Drop for FakeSink {
        fn drop(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
