//! Runtime events for monitoring pipeline health.
//!
//! Events are non-fatal notifications. The pipeline keeps running after any
//! event is emitted; they exist for logging and metrics, not error handling.

use std::sync::Arc;

use crate::pipeline::DiscardReason;
use crate::{CodecError, LinkState, PipelineState};

/// Runtime events emitted by the capture and transport contexts.
///
/// # Example
///
/// ```
/// use pendant_audio::PipelineEvent;
///
/// fn handle_event(event: PipelineEvent) {
///     match event {
///         PipelineEvent::QueueOverflow { evicted, dropped } => {
///             eprintln!("queue overflow: evicted {evicted}, dropped newest: {dropped}");
///         }
///         PipelineEvent::StorageFull { write_offset } => {
///             eprintln!("storage full at offset {write_offset}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The link moved between disconnected, connected and subscribed.
    LinkStateChanged {
        /// State before the transition.
        from: LinkState,
        /// State after the transition.
        to: LinkState,
    },

    /// The orchestrator changed lifecycle state.
    PipelineStateChanged {
        /// State before the transition.
        from: PipelineState,
        /// State after the transition.
        to: PipelineState,
    },

    /// The frame queue was full when the capture context pushed a frame.
    QueueOverflow {
        /// Oldest entries evicted to make room.
        evicted: usize,
        /// `true` if the new frame was dropped anyway.
        dropped: bool,
    },

    /// Queued frames were drained without being delivered anywhere.
    QueueDiscarded {
        /// Number of frames dropped.
        frames: usize,
        /// Why the frames could not be delivered.
        reason: DiscardReason,
    },

    /// The codec failed on one block; the block was dropped.
    EncodeFailed {
        /// The codec error.
        error: CodecError,
    },

    /// The capture driver had no free buffer and skipped a capture period.
    CaptureOverrun {
        /// Total blocks skipped so far in this session.
        dropped_blocks: u64,
    },

    /// A packet was abandoned after the link stayed busy for every attempt.
    PacketDropped {
        /// Id of the abandoned packet.
        packet_id: u16,
        /// Fragment index within its frame.
        sub_index: u8,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The link reported a hard failure; the rest of the frame was abandoned.
    NotifyFailed {
        /// Id of the packet that failed.
        packet_id: u16,
    },

    /// A storage block was written to the backing store.
    BlockFlushed {
        /// Write offset after the flush.
        write_offset: u32,
    },

    /// The storage sink gave up for this session.
    StorageUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// The storage sink reached its ceiling or the device ran out of space.
    StorageFull {
        /// Write offset at which storage filled up.
        write_offset: u32,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`PipelineBuilder::on_event()`](crate::PipelineBuilder::on_event).
/// It is invoked from the capture thread and the transport task, so it must
/// return quickly.
pub type EventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use pendant_audio::{event_callback, PipelineEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(PipelineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invokes the callback if one is registered.
pub(crate) fn emit(callback: Option<&EventCallback>, event: PipelineEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}
