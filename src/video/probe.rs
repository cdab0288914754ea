//! ffprobe stream metadata.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, VideoError};
use crate::video::types::StreamInfo;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    side_data_list: Vec<FfprobeSideData>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeSideData {
    rotation: Option<f64>,
}

impl FfprobeStream {
    /// Display rotation in degrees, from the display matrix or the legacy `rotate` tag
    fn rotation(&self) -> i64 {
        self.side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| self.tags.get("rotate").and_then(|r| r.trim().parse::<f64>().ok()))
            .map(|degrees| degrees.round() as i64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Probe the first video stream of `path`
pub fn probe_stream(ffprobe: &Path, path: &Path) -> Result<StreamInfo> {
    if !path.is_file() {
        return Err(VideoError::LoadFailed { path: path.display().to_string() }.into());
    }

    let output = Command::new(ffprobe)
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_streams",
            "-show_format",
            "-select_streams", "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| VideoError::ProbeFailed {
            path: path.display().to_string(),
            reason: format!("could not run {}: {}", ffprobe.display(), e),
        })?;

    if !output.status.success() {
        return Err(VideoError::ProbeFailed {
            path: path.display().to_string(),
            reason: format!("ffprobe exited with {}", output.status),
        }.into());
    }

    let info = parse_probe_output(path, &output.stdout)?;
    info!(
        "Probed {}: {}x{} @ {:.3}fps, {} frames",
        path.display(), info.width, info.height, info.fps,
        info.frame_count.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string())
    );
    Ok(info)
}

/// Turn ffprobe's JSON into a `StreamInfo`
pub fn parse_probe_output(path: &Path, json: &[u8]) -> Result<StreamInfo> {
    let probe_failed = |reason: String| VideoError::ProbeFailed {
        path: path.display().to_string(),
        reason,
    };

    let probe: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| probe_failed(format!("invalid ffprobe output: {}", e)))?;

    let stream = probe
        .streams
        .first()
        .ok_or_else(|| probe_failed("no video stream".to_string()))?;

    let (coded_width, coded_height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(probe_failed("missing frame dimensions".to_string()).into()),
    };

    // ffmpeg autorotates on decode, so quarter turns swap the frame axes.
    let rotation = stream.rotation();
    let (width, height) = if rotation.rem_euclid(180) == 90 {
        debug!("{} is rotated {} degrees, decoding as {}x{}", path.display(), rotation, coded_height, coded_width);
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| probe_failed("missing frame rate".to_string()))?;

    let mut info = StreamInfo::new(path, width, height, fps);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0)
        .or_else(|| {
            let duration = stream
                .duration
                .as_deref()
                .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|d| d.parse::<f64>().ok())?;
            debug!("nb_frames missing for {}, estimating from {:.3}s", path.display(), duration);
            Some((duration * fps).round() as u64)
        });

    if let Some(count) = frame_count {
        info = info.with_frame_count(count);
    }
    Ok(info)
}

/// Parse "30000/1001" or "25" into frames per second
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };

    (fps.is_finite() && fps > 0.0).then_some(fps)
}
