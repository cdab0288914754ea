use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Represents a single decoded video frame
///
/// A thin wrapper around an RGB image buffer. Frames are handed from stage
/// to stage by value and dropped at the end of each pipeline iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self { buffer: ImageBuffer::new(width, height) }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb(color));
        Self { buffer }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, Rgb(color));
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Packed RGB24 bytes, row-major, as fed to a rawvideo encoder
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    /// Create a frame from raw RGB bytes
    ///
    /// Returns `None` when `data` does not hold exactly `width * height * 3` bytes.
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    /// Number of bytes one RGB24 frame of the given size occupies
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// Geometry and timing of one decoded video stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Source file the stream was opened from
    pub path: PathBuf,

    pub width: u32,

    pub height: u32,

    /// Native frame rate
    pub fps: f64,

    /// Total frames, when the container reports it or it can be estimated
    pub frame_count: Option<u64>,
}

impl StreamInfo {
    pub fn new<P: Into<PathBuf>>(path: P, width: u32, height: u32, fps: f64) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            fps,
            frame_count: None,
        }
    }

    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = Some(frame_count);
        self
    }

    /// Whether frames of this stream must be resized to reach `(width, height)`
    pub fn needs_resize(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_bytes_roundtrip_preserves_pixels() {
        let mut frame = Frame::new_black(4, 2);
        frame.set_pixel(3, 1, [1, 2, 3]);

        let rebuilt = Frame::from_rgb_bytes(4, 2, frame.as_rgb_bytes().to_vec()).unwrap();
        assert_eq!(rebuilt.get_pixel(3, 1), [1, 2, 3]);
        assert_eq!(rebuilt, frame);
    }

    #[test]
    fn test_from_rgb_bytes_rejects_short_buffer() {
        assert!(Frame::from_rgb_bytes(4, 2, vec![0; 10]).is_none());
        assert_eq!(Frame::byte_len(4, 2), 24);
    }

    #[test]
    fn test_needs_resize() {
        let info = StreamInfo::new("a.mp4", 1080, 960, 30.0);
        assert!(!info.needs_resize(1080, 960));
        assert!(info.needs_resize(1080, 1920));
    }
}
