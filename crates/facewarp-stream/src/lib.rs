//! facewarp-stream — Background face-swap pipeline runner.
//!
//! A latest-wins [`FrameBuffer`] decouples the caller's frame rate from the
//! pipeline's; a single worker thread always processes the newest frame.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod mailbox;
pub mod worker;

#[cfg(test)]
mod testing;

pub use buffer::FrameBuffer;
pub use config::WorkerConfig;
pub use controller::{Controller, ControllerError, StreamHandle};
pub use mailbox::Mailbox;
pub use worker::{CycleOutcome, WorkerStats};
