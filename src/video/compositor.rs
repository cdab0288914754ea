use crate::error::{Result, VideoError};
use crate::video::types::Frame;

/// Stacks two half-height frames into one output frame, primary on top
#[derive(Debug, Clone, Copy)]
pub struct StackCompositor {
    width: u32,
    height: u32,
}

impl StackCompositor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn compose(&self, top: &Frame, bottom: &Frame) -> Result<Frame> {
        let half = self.height / 2;
        for (name, frame) in [("primary", top), ("secondary", bottom)] {
            if frame.width() != self.width || frame.height() != half {
                return Err(VideoError::FrameProcessingFailed {
                    reason: format!(
                        "{} frame is {}x{}, expected {}x{}",
                        name, frame.width(), frame.height(), self.width, half
                    ),
                }.into());
            }
        }

        // RGB rows are contiguous, so vertical concatenation is a plain append.
        let mut data = Vec::with_capacity(Frame::byte_len(self.width, self.height));
        data.extend_from_slice(top.as_rgb_bytes());
        data.extend_from_slice(bottom.as_rgb_bytes());

        Frame::from_rgb_bytes(self.width, self.height, data).ok_or_else(|| {
            VideoError::FrameProcessingFailed {
                reason: "stacked buffer size mismatch".to_string(),
            }.into()
        })
    }
}
