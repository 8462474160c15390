//! Frame type and the injected capture / face-model seams.

use rollcall_core::{Descriptor, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("frame source failed: {0}")]
    Source(String),
    #[error("frame source exhausted")]
    SourceExhausted,
    #[error("face model failed: {0}")]
    Encoder(String),
    #[error("captured {captured} of {required} samples within {frames} frames")]
    NotEnoughSamples {
        captured: usize,
        required: usize,
        frames: usize,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("check-in task failed: {0}")]
    Task(String),
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed pixel data; layout is whatever the encoder expects.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Camera (or any frame producer) owned by a kiosk session.
pub trait FrameSource: Send + 'static {
    /// Next frame, or `None` when the source has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, KioskError>;

    /// Stop the underlying device. Called exactly once when the session ends.
    fn release(&mut self);
}

/// External face model: every face found in a frame, as a descriptor.
pub trait FaceEncoder: Send + Sync + 'static {
    fn encode(&self, frame: &Frame) -> Result<Vec<Descriptor>, KioskError>;
}
