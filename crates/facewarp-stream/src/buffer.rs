//! Shared state between the caller and the worker thread.

use crate::mailbox::Mailbox;
use facewarp_core::{CompositeResult, Frame};
use std::sync::Arc;

/// Latest input frame and latest published result.
///
/// Frames are stored behind `Arc`: a write replaces the pointer, it never
/// mutates a frame the worker may already be processing.
#[derive(Default)]
pub struct FrameBuffer {
    input: Mailbox<Arc<Frame>>,
    result: Mailbox<Arc<CompositeResult>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending input frame. Returns its generation.
    pub fn write(&self, frame: Frame) -> u64 {
        self.input.write(Arc::new(frame))
    }

    /// Most recent input frame with its generation.
    pub fn read_latest_input(&self) -> Option<(u64, Arc<Frame>)> {
        self.input.latest()
    }

    /// Most recent input frame, if written after generation `seen`.
    pub fn take_newer_input(&self, seen: u64) -> Option<(u64, Arc<Frame>)> {
        self.input.take_newer(seen)
    }

    pub fn input_generation(&self) -> u64 {
        self.input.generation()
    }

    /// Replace the published result.
    pub fn publish_result(&self, result: CompositeResult) {
        self.result.write(Arc::new(result));
    }

    /// The last published result; `None` until the first cycle completes.
    pub fn read_result(&self) -> Option<Arc<CompositeResult>> {
        self.result.latest().map(|(_, r)| r)
    }

    /// Number of results published so far.
    pub fn published_count(&self) -> u64 {
        self.result.generation()
    }
}
