//! Per-frame routing decision between live streaming and storage.

use crate::link::{MAX_FRAGMENTS, PACKET_HEADER_BYTES};
use crate::{LinkState, UnsubscribedPolicy};

/// Why queued frames were drained instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscardReason {
    /// Connected, but the peer has not enabled notifications.
    NotSubscribed,
    /// Subscribed, but the negotiated payload size is below the minimum or
    /// too small to carry a full frame in [`MAX_FRAGMENTS`] packets.
    PayloadTooSmall,
    /// Disconnected and storage is full, unmounted or failed.
    StorageUnavailable,
    /// Dropped when a subscribed session began or ended.
    SessionReset,
}

/// Where the next frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Packetize and notify, fragments of at most `payload_size` bytes.
    Stream {
        /// Payload bytes per packet, header excluded.
        payload_size: usize,
    },
    /// Append to the storage sink.
    Store,
    /// Drain the whole queue and drop it.
    Discard(DiscardReason),
}

/// Stateless routing policy.
#[derive(Debug, Clone, Copy)]
pub struct SinkSelector {
    minimal_packet_size: u16,
    max_frame_bytes: usize,
    unsubscribed_policy: UnsubscribedPolicy,
}

impl SinkSelector {
    /// Creates a selector for frames of at most `max_frame_bytes`.
    pub fn new(
        minimal_packet_size: u16,
        max_frame_bytes: usize,
        unsubscribed_policy: UnsubscribedPolicy,
    ) -> Self {
        Self {
            minimal_packet_size,
            max_frame_bytes,
            unsubscribed_policy,
        }
    }

    /// Picks the route for the next frame.
    ///
    /// `negotiated_payload_size` includes the packet header.
    pub fn evaluate(
        &self,
        link: LinkState,
        negotiated_payload_size: u16,
        storage_has_space: bool,
    ) -> Route {
        match link {
            LinkState::ConnectedSubscribed => {
                let payload_size =
                    usize::from(negotiated_payload_size).saturating_sub(PACKET_HEADER_BYTES);
                if negotiated_payload_size < self.minimal_packet_size
                    || payload_size == 0
                    || self.max_frame_bytes.div_ceil(payload_size) > MAX_FRAGMENTS
                {
                    Route::Discard(DiscardReason::PayloadTooSmall)
                } else {
                    Route::Stream { payload_size }
                }
            }
            LinkState::ConnectedNotSubscribed => match self.unsubscribed_policy {
                UnsubscribedPolicy::Store if storage_has_space => Route::Store,
                UnsubscribedPolicy::Store => Route::Discard(DiscardReason::StorageUnavailable),
                UnsubscribedPolicy::Discard => Route::Discard(DiscardReason::NotSubscribed),
            },
            LinkState::Disconnected if storage_has_space => Route::Store,
            LinkState::Disconnected => Route::Discard(DiscardReason::StorageUnavailable),
        }
    }
}
