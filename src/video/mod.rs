//! # Video Pipeline
//!
//! Decoding, resizing, stacking and encoding of the two input streams.
//!
//! Frames flow `FrameSource -> DualStreamReader -> StackCompositor ->
//! FrameSink`; the ffmpeg-backed source and sink live in [`decoder`] and
//! [`encoder`].

pub mod compositor;
pub mod decoder;
pub mod encoder;
pub mod probe;
pub mod reader;
pub mod resize;
pub mod types;

pub use compositor::StackCompositor;
pub use decoder::FfmpegSource;
pub use encoder::{EncodeParams, EncodeSummary, FfmpegSink, FrameSink, VideoEncodeStage};
pub use probe::probe_stream;
pub use reader::{DualStreamReader, FramePair, FrameSource, MemorySource};
pub use resize::{crop_region, resize, CropRegion};
pub use types::{Frame, StreamInfo};
