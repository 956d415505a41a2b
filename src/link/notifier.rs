//! Bounded-retry wrapper around the notification primitive.

use std::sync::Arc;
use std::time::Duration;

use super::{NotifyChannel, NotifyResult, Packet};

/// What happened to one packet handed to the [`Notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered to the stack.
    Sent {
        /// Attempts it took, including the successful one.
        attempts: u32,
    },
    /// The link stayed busy for every attempt; the packet was abandoned.
    Dropped {
        /// Attempts made.
        attempts: u32,
    },
    /// The stack reported a hard failure. Not retried.
    Fatal,
}

/// Sends packets with bounded retry on transient backpressure.
///
/// Retries are bounded by attempt count, with a sleep between attempts, so a
/// persistently busy link degrades to per-packet drops instead of stalling
/// the transport.
pub struct Notifier {
    channel: Arc<dyn NotifyChannel>,
    max_attempts: u32,
    backoff: Duration,
    wire: Vec<u8>,
}

impl Notifier {
    /// Creates a notifier over `channel`. `max_attempts` is clamped to at least 1.
    pub fn new(channel: Arc<dyn NotifyChannel>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            channel,
            max_attempts: max_attempts.max(1),
            backoff,
            wire: Vec::new(),
        }
    }

    /// The wrapped channel.
    pub fn channel(&self) -> &Arc<dyn NotifyChannel> {
        &self.channel
    }

    /// Sends one packet.
    pub async fn send(&mut self, packet: &Packet<'_>) -> SendOutcome {
        packet.encode_into(&mut self.wire);

        for attempt in 1..=self.max_attempts {
            match self.channel.notify(&self.wire).await {
                NotifyResult::Ok => return SendOutcome::Sent { attempts: attempt },
                NotifyResult::Fatal => {
                    tracing::debug!(
                        packet_id = packet.packet_id,
                        sub_index = packet.sub_index,
                        "notify failed"
                    );
                    return SendOutcome::Fatal;
                }
                NotifyResult::Busy => {
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        tracing::debug!(
            packet_id = packet.packet_id,
            sub_index = packet.sub_index,
            attempts = self.max_attempts,
            "link busy, packet dropped"
        );
        SendOutcome::Dropped {
            attempts: self.max_attempts,
        }
    }
}
