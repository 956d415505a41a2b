//! Capture sources and the block pool they deliver through.
//!
//! A capture source stands in for the microphone driver. It owns a
//! [`BlockDriver`] and, once per capture period, takes a free buffer, fills it
//! and submits it. The capture context on the other side of the
//! [`BlockPool`] encodes the block and hands the buffer straight back.

mod mock;
mod pool;

pub use mock::MockSource;
pub use pool::{BlockDriver, BlockPool, BlockReceiver, DEFAULT_POOL_BUFFERS};

use crate::PipelineError;

/// A driver that delivers fixed-size PCM blocks at a steady cadence.
///
/// # Implementation Notes
///
/// - `start` must return promptly; deliver blocks from your own thread or
///   interrupt context
/// - Never block waiting for a free buffer: when
///   [`BlockDriver::acquire`] returns `None` skip the period
/// - Dropping the driver signals end of stream to the capture context
pub trait CaptureSource: Send {
    /// Human-readable name for logs and errors.
    fn name(&self) -> &str;

    /// Begins delivering blocks through `driver`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SourceStartFailed`] if capture cannot begin.
    fn start(&mut self, driver: BlockDriver) -> Result<(), PipelineError>;

    /// Stops delivery and drops the driver. Must be idempotent.
    fn stop(&mut self);
}
