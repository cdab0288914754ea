use tracing::{debug, info};

use crate::error::{Result, VideoError};
use crate::video::resize;
use crate::video::types::{Frame, StreamInfo};

/// A sequential source of decoded frames
pub trait FrameSource {
    /// Geometry and timing reported when the source was opened
    fn info(&self) -> &StreamInfo;

    /// Decode the next frame, or `None` once the stream is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Reposition the stream at its first frame
    fn rewind(&mut self) -> Result<()>;
}

/// Frame source backed by frames held in memory
///
/// Useful for still images and synthetic inputs.
#[derive(Debug, Clone)]
pub struct MemorySource {
    info: StreamInfo,
    frames: Vec<Frame>,
    position: usize,
}

impl MemorySource {
    pub fn new(info: StreamInfo, frames: Vec<Frame>) -> Self {
        let info = info.with_frame_count(frames.len() as u64);
        Self { info, frames, position: 0 }
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// One stream as seen by the reader
struct StreamSlot {
    source: Box<dyn FrameSource>,
    needs_resize: bool,
    position: u64,
}

impl StreamSlot {
    fn new(source: Box<dyn FrameSource>, width: u32, height: u32) -> Self {
        let needs_resize = source.info().needs_resize(width, height);
        Self { source, needs_resize, position: 0 }
    }

    fn read(&mut self, width: u32, height: u32) -> Result<Option<Frame>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        self.position += 1;

        if self.needs_resize {
            Ok(Some(resize::resize(&frame, width, height)))
        } else {
            Ok(Some(frame))
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.source.rewind()?;
        self.position = 0;
        Ok(())
    }
}

/// A primary frame and the secondary frame shown beneath it
#[derive(Debug, Clone)]
pub struct FramePair {
    /// Zero-based index in the primary stream
    pub index: u64,
    /// Index of `secondary` within its own stream
    pub secondary_index: u64,
    pub primary: Frame,
    pub secondary: Frame,
}

/// Reads two streams in lockstep, looping the secondary
///
/// The primary stream's length is authoritative: the sequence ends when it
/// runs out. The secondary restarts from its first frame whenever it is
/// exhausted. Once finished the reader yields nothing further.
pub struct DualStreamReader {
    primary: StreamSlot,
    secondary: StreamSlot,
    half_width: u32,
    half_height: u32,
    pairs_read: u64,
    secondary_loops: u32,
    finished: bool,
}

impl DualStreamReader {
    /// Pair `primary` over `secondary` for an output of `output_width x output_height`
    pub fn new(
        primary: Box<dyn FrameSource>,
        secondary: Box<dyn FrameSource>,
        output_width: u32,
        output_height: u32,
    ) -> Result<Self> {
        if output_width == 0 || output_height == 0 || output_height % 2 != 0 {
            return Err(VideoError::InvalidParameters {
                details: format!("output must be non-empty with even height, got {}x{}", output_width, output_height),
            }.into());
        }

        for info in [primary.info(), secondary.info()] {
            if !(info.fps.is_finite() && info.fps > 0.0) {
                return Err(VideoError::InvalidParameters {
                    details: format!("{} reports frame rate {}", info.path.display(), info.fps),
                }.into());
            }
        }

        let half_height = output_height / 2;
        let primary = StreamSlot::new(primary, output_width, half_height);
        let secondary = StreamSlot::new(secondary, output_width, half_height);

        debug!(
            "Stream geometry: primary {}x{} (resize: {}), secondary {}x{} (resize: {})",
            primary.source.info().width, primary.source.info().height, primary.needs_resize,
            secondary.source.info().width, secondary.source.info().height, secondary.needs_resize,
        );

        Ok(Self {
            primary,
            secondary,
            half_width: output_width,
            half_height,
            pairs_read: 0,
            secondary_loops: 0,
            finished: false,
        })
    }

    pub fn primary_info(&self) -> &StreamInfo {
        self.primary.source.info()
    }

    pub fn secondary_info(&self) -> &StreamInfo {
        self.secondary.source.info()
    }

    /// Output frame rate: the slower of the two inputs
    ///
    /// Neither stream is resampled to this rate.
    pub fn target_fps(&self) -> f64 {
        self.primary_info().fps.min(self.secondary_info().fps)
    }

    /// Frames the primary stream is expected to yield, 0 when unknown
    pub fn primary_frame_count(&self) -> u64 {
        self.primary_info().frame_count.unwrap_or(0)
    }

    pub fn pairs_read(&self) -> u64 {
        self.pairs_read
    }

    /// How many times the secondary stream has been restarted
    pub fn secondary_loops(&self) -> u32 {
        self.secondary_loops
    }

    /// Read the next synchronized pair
    pub fn next_pair(&mut self) -> Result<Option<FramePair>> {
        if self.finished {
            return Ok(None);
        }

        let Some(primary) = self.primary.read(self.half_width, self.half_height)? else {
            self.finished = true;
            info!(
                "Primary stream finished after {} frames ({} secondary loops)",
                self.pairs_read, self.secondary_loops
            );
            return Ok(None);
        };

        let secondary = match self.secondary.read(self.half_width, self.half_height)? {
            Some(frame) => frame,
            None => {
                self.secondary.rewind()?;
                self.secondary_loops += 1;
                debug!("Secondary stream looped (loop {})", self.secondary_loops);

                match self.secondary.read(self.half_width, self.half_height)? {
                    Some(frame) => frame,
                    None => {
                        self.finished = true;
                        return Err(VideoError::EmptySecondary {
                            path: self.secondary_info().path.display().to_string(),
                        }.into());
                    }
                }
            }
        };

        let pair = FramePair {
            index: self.pairs_read,
            secondary_index: self.secondary.position - 1,
            primary,
            secondary,
        };
        self.pairs_read += 1;
        Ok(Some(pair))
    }
}

impl Iterator for DualStreamReader {
    type Item = Result<FramePair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_pair().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frames whose color encodes their index
    fn numbered_source(name: &str, count: usize, width: u32, height: u32, fps: f64) -> Box<dyn FrameSource> {
        let frames = (0..count)
            .map(|i| Frame::new_filled(width, height, [i as u8, 0, 0]))
            .collect();
        Box::new(MemorySource::new(StreamInfo::new(name, width, height, fps), frames))
    }

    fn secondary_indices(reader: DualStreamReader) -> Vec<u8> {
        reader
            .map(|pair| pair.unwrap().secondary.get_pixel(0, 0)[0])
            .collect()
    }

    #[test]
    fn test_secondary_loops_with_period_m() {
        let reader = DualStreamReader::new(
            numbered_source("a", 10, 4, 2, 30.0),
            numbered_source("b", 3, 4, 2, 30.0),
            4,
            4,
        ).unwrap();

        let indices = secondary_indices(reader);
        assert_eq!(indices.len(), 10);
        for (k, value) in indices.iter().enumerate() {
            assert_eq!(*value as usize, k % 3);
        }
    }

    #[test]
    fn test_longer_secondary_is_not_looped() {
        let mut reader = DualStreamReader::new(
            numbered_source("a", 4, 4, 2, 30.0),
            numbered_source("b", 9, 4, 2, 30.0),
            4,
            4,
        ).unwrap();

        let mut seen = Vec::new();
        while let Some(pair) = reader.next_pair().unwrap() {
            seen.push(pair.secondary.get_pixel(0, 0)[0]);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(reader.secondary_loops(), 0);
        assert_eq!(reader.pairs_read(), 4);
    }

    #[test]
    fn test_reader_is_not_restartable() {
        let mut reader = DualStreamReader::new(
            numbered_source("a", 1, 4, 2, 30.0),
            numbered_source("b", 1, 4, 2, 30.0),
            4,
            4,
        ).unwrap();

        assert!(reader.next_pair().unwrap().is_some());
        assert!(reader.next_pair().unwrap().is_none());
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_empty_secondary_is_fatal() {
        let mut reader = DualStreamReader::new(
            numbered_source("a", 5, 4, 2, 30.0),
            numbered_source("empty.mp4", 0, 4, 2, 30.0),
            4,
            4,
        ).unwrap();

        let err = reader.next_pair().unwrap_err();
        assert!(matches!(
            err,
            crate::error::CompositorError::Video(VideoError::EmptySecondary { .. })
        ));
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_mismatched_streams_are_resized_to_half_height() {
        let mut reader = DualStreamReader::new(
            numbered_source("a", 2, 16, 9, 30.0),
            numbered_source("b", 2, 9, 16, 24.0),
            8,
            8,
        ).unwrap();

        let pair = reader.next_pair().unwrap().unwrap();
        assert_eq!((pair.primary.width(), pair.primary.height()), (8, 4));
        assert_eq!((pair.secondary.width(), pair.secondary.height()), (8, 4));
    }

    #[test]
    fn test_target_fps_is_minimum() {
        let reader = DualStreamReader::new(
            numbered_source("a", 1, 4, 2, 60.0),
            numbered_source("b", 1, 4, 2, 29.97),
            4,
            4,
        ).unwrap();
        assert_eq!(reader.target_fps(), 29.97);
        assert_eq!(reader.primary_frame_count(), 1);
    }

    #[test]
    fn test_odd_output_height_rejected() {
        let result = DualStreamReader::new(
            numbered_source("a", 1, 4, 2, 30.0),
            numbered_source("b", 1, 4, 2, 30.0),
            4,
            5,
        );
        assert!(result.is_err());
    }
}
