use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::error::{Result, VideoError};
use crate::video::reader::FrameSource;
use crate::video::types::{Frame, StreamInfo};

const STDERR_TAIL_LINES: usize = 20;

/// Decodes a video file into RGB24 frames through an ffmpeg subprocess
///
/// Frames come out at the stream's native size. Rewinding restarts the
/// subprocess; dropping the source kills and reaps it.
pub struct FfmpegSource {
    ffmpeg: PathBuf,
    info: StreamInfo,
    decoder: Option<RunningDecoder>,
    frames_decoded: u64,
}

struct RunningDecoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl FfmpegSource {
    pub fn open(ffmpeg: &Path, info: StreamInfo) -> Result<Self> {
        let decoder = spawn_decoder(ffmpeg, &info)?;
        Ok(Self {
            ffmpeg: ffmpeg.to_path_buf(),
            info,
            decoder: Some(decoder),
            frames_decoded: 0,
        })
    }

    /// Wait for a finished decoder and turn a failed exit into an error
    fn reap(&mut self) -> Result<()> {
        let Some(mut decoder) = self.decoder.take() else {
            return Ok(());
        };

        let status = decoder.child.wait()?;
        let stderr_lines = decoder
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let tail = if stderr_lines.is_empty() {
                "<no ffmpeg stderr>".to_string()
            } else {
                stderr_lines.join(" | ")
            };
            return Err(VideoError::DecodingFailed {
                reason: format!(
                    "ffmpeg decode failed for {} status={} frames={} stderr_tail={}",
                    self.info.path.display(), status, self.frames_decoded, tail
                ),
            }.into());
        }
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        let frame_bytes = Frame::byte_len(self.info.width, self.info.height);
        let mut buf = vec![0u8; frame_bytes];
        let n = read_exact_or_eof(&mut decoder.stdout, &mut buf)?;

        if n < frame_bytes {
            if n > 0 {
                warn!("Discarding truncated trailing frame ({} of {} bytes) from {}", n, frame_bytes, self.info.path.display());
            }
            self.reap()?;
            return Ok(None);
        }

        self.frames_decoded += 1;
        Frame::from_rgb_bytes(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| VideoError::DecodingFailed {
                reason: format!("frame buffer size mismatch for {}", self.info.path.display()),
            }.into())
    }

    fn rewind(&mut self) -> Result<()> {
        if let Some(mut decoder) = self.decoder.take() {
            let _ = decoder.child.kill();
            let _ = decoder.child.wait();
        }
        debug!("Restarting decoder for {}", self.info.path.display());
        self.decoder = Some(spawn_decoder(&self.ffmpeg, &self.info)?);
        self.frames_decoded = 0;
        Ok(())
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let _ = decoder.child.kill();
            let _ = decoder.child.wait();
        }
    }
}

/// Arguments decoding the first video stream of `info.path` to RGB24 on stdout
///
/// Frames are scaled to the probed geometry so every chunk on the pipe has
/// the layout `Frame::from_rgb_bytes` expects, and passed through without
/// frame-rate conversion so the count matches the source.
pub(crate) fn decode_args(info: &StreamInfo) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(info.path.clone().into_os_string());
    for arg in ["-map", "0:v:0", "-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"] {
        args.push(arg.into());
    }
    args.push(format!("{}x{}", info.width, info.height).into());
    args.push("pipe:1".into());
    args
}

fn spawn_decoder(ffmpeg: &Path, info: &StreamInfo) -> Result<RunningDecoder> {
    let path = &info.path;
    let mut child = Command::new(ffmpeg)
        .args(decode_args(info))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| VideoError::DecodingFailed {
            reason: format!("could not spawn {} for {}: {}", ffmpeg.display(), path.display(), e),
        })?;

    let stderr = child.stderr.take().map(spawn_stderr_collector);
    let stdout = child.stdout.take().ok_or_else(|| VideoError::DecodingFailed {
        reason: "ffmpeg stdout missing".to_string(),
    })?;

    Ok(RunningDecoder {
        child,
        stdout: BufReader::with_capacity(4 * 1024 * 1024, stdout),
        stderr,
    })
}

/// Fill `buf` completely unless EOF comes first; returns bytes read
pub(crate) fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Keep the last few lines of a child's stderr for error reports
pub(crate) fn spawn_stderr_collector(stderr: impl Read + Send + 'static) -> JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        let mut lines = VecDeque::new();
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line).unwrap_or(0);
            if read == 0 {
                break;
            }
            let cleaned = line.trim().to_string();
            if cleaned.is_empty() {
                continue;
            }
            lines.push_back(cleaned);
            if lines.len() > STDERR_TAIL_LINES {
                lines.pop_front();
            }
        }

        lines.into_iter().collect()
    })
}
