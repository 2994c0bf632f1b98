//! Pending outbound frames of a session with no bound exchange.

use crossbeam::queue::SegQueue;

/// Unbounded FIFO of raw frames waiting for the next poll.
///
/// Frames are stored unformatted; encoding happens when a frame is handed to
/// an exchange.
#[derive(Debug, Default)]
pub struct FrameCache {
    frames: SegQueue<String>,
}

impl FrameCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame at the back.
    pub fn offer(&self, frame: String) {
        self.frames.push(frame);
    }

    /// Removes the oldest frame.
    pub fn poll(&self) -> Option<String> {
        self.frames.pop()
    }

    /// Number of pending frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
