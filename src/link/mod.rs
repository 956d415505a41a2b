//! Wireless link state and the notification channel seam.
//!
//! The wireless stack is an external collaborator. The pipeline only needs to
//! know whether a peer is connected and subscribed, how large one
//! notification may be, and a way to send one. Connection and subscription
//! callbacks land on [`LinkMonitor`] from whatever thread the stack runs on.

mod notifier;
mod packet;

pub use notifier::{Notifier, SendOutcome};
pub use packet::{
    FrameAssembler, Fragments, Packet, PacketError, Packetizer, MAX_FRAGMENTS,
    PACKET_HEADER_BYTES,
};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::event::emit;
use crate::{EventCallback, PipelineEvent};

/// Result of one notification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyResult {
    /// The stack accepted the notification.
    Ok,
    /// Transient backpressure ("no buffers", "would block"); retry later.
    Busy,
    /// Any other failure; assumed link-fatal.
    Fatal,
}

/// The wireless stack's notification primitive.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use pendant_audio::{NotifyChannel, NotifyResult};
///
/// struct Loopback;
///
/// #[async_trait]
/// impl NotifyChannel for Loopback {
///     fn is_link_ready(&self) -> bool {
///         true
///     }
///
///     fn negotiated_payload_size(&self) -> u16 {
///         244
///     }
///
///     async fn notify(&self, data: &[u8]) -> NotifyResult {
///         println!("notify {} bytes", data.len());
///         NotifyResult::Ok
///     }
/// }
/// ```
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// `true` when connected, subscribed and the payload size is known.
    fn is_link_ready(&self) -> bool;

    /// Bytes deliverable in one notification, packet header included.
    fn negotiated_payload_size(&self) -> u16;

    /// Sends one notification.
    async fn notify(&self, data: &[u8]) -> NotifyResult;
}

/// Connection state of the wireless link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No peer connected.
    Disconnected,
    /// A peer is connected but has not enabled notifications.
    ConnectedNotSubscribed,
    /// A peer is connected and receiving notifications.
    ConnectedSubscribed,
}

impl LinkState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::ConnectedNotSubscribed => 1,
            Self::ConnectedSubscribed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            2 => Self::ConnectedSubscribed,
            1 => Self::ConnectedNotSubscribed,
            _ => Self::Disconnected,
        }
    }

    /// Returns `true` for [`LinkState::ConnectedSubscribed`].
    pub fn is_subscribed(self) -> bool {
        self == Self::ConnectedSubscribed
    }

    /// Returns `true` unless [`LinkState::Disconnected`].
    pub fn is_connected(self) -> bool {
        self != Self::Disconnected
    }
}

struct Transitions {
    subscribers: u32,
}

/// Link state shared between the control callbacks and the transport.
///
/// Writers serialize on a short-held lock; readers only touch atomics. Every
/// transition into or out of [`LinkState::ConnectedSubscribed`] bumps the
/// session epoch, which the transport uses to reset the frame queue and the
/// packet id counter.
///
/// Subscriptions are reference counted: only the first subscriber and the
/// last unsubscriber change state.
///
/// ```
/// use pendant_audio::{LinkMonitor, LinkState};
///
/// let link = LinkMonitor::new();
/// link.on_connected();
/// link.on_subscribed();
/// link.on_subscribed();
/// link.on_unsubscribed();
/// assert_eq!(link.state(), LinkState::ConnectedSubscribed);
///
/// link.on_unsubscribed();
/// assert_eq!(link.state(), LinkState::ConnectedNotSubscribed);
/// assert_eq!(link.epoch(), 2);
/// ```
pub struct LinkMonitor {
    state: AtomicU8,
    epoch: AtomicU64,
    transitions: Mutex<Transitions>,
    event_callback: Option<EventCallback>,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LinkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkMonitor")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

impl LinkMonitor {
    /// Creates a monitor in [`LinkState::Disconnected`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LinkState::Disconnected.to_u8()),
            epoch: AtomicU64::new(0),
            transitions: Mutex::new(Transitions { subscribers: 0 }),
            event_callback: None,
        }
    }

    /// Creates a monitor that reports transitions to `callback`.
    pub fn with_event_callback(callback: Option<EventCallback>) -> Self {
        Self {
            event_callback: callback,
            ..Self::new()
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of subscribed-session boundaries crossed so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// A peer connected.
    pub fn on_connected(&self) {
        let transition = {
            let mut guard = self.transitions.lock();
            if self.state() == LinkState::Disconnected {
                self.set_state(&mut guard, LinkState::ConnectedNotSubscribed)
            } else {
                None
            }
        };
        self.report(transition);
    }

    /// The peer went away. Any subscriptions end with it.
    pub fn on_disconnected(&self) {
        let transition = {
            let mut guard = self.transitions.lock();
            guard.subscribers = 0;
            self.set_state(&mut guard, LinkState::Disconnected)
        };
        self.report(transition);
    }

    /// The peer enabled notifications.
    ///
    /// A subscription implies a connection, so this also works if the stack
    /// never reported [`on_connected`](Self::on_connected).
    pub fn on_subscribed(&self) {
        let transition = {
            let mut guard = self.transitions.lock();
            guard.subscribers = guard.subscribers.saturating_add(1);
            if guard.subscribers == 1 {
                self.set_state(&mut guard, LinkState::ConnectedSubscribed)
            } else {
                None
            }
        };
        self.report(transition);
    }

    /// The peer disabled notifications.
    pub fn on_unsubscribed(&self) {
        let transition = {
            let mut guard = self.transitions.lock();
            if guard.subscribers == 0 {
                return;
            }
            guard.subscribers -= 1;
            if guard.subscribers == 0 && self.state() == LinkState::ConnectedSubscribed {
                self.set_state(&mut guard, LinkState::ConnectedNotSubscribed)
            } else {
                None
            }
        };
        self.report(transition);
    }

    // Requires the transitions lock so state and epoch move together.
    fn set_state(
        &self,
        _guard: &mut Transitions,
        to: LinkState,
    ) -> Option<(LinkState, LinkState)> {
        let from = self.state();
        if from == to {
            return None;
        }
        self.state.store(to.to_u8(), Ordering::Release);
        if from.is_subscribed() != to.is_subscribed() {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        Some((from, to))
    }

    // Runs after the transitions lock is released.
    fn report(&self, transition: Option<(LinkState, LinkState)>) {
        if let Some((from, to)) = transition {
            tracing::info!(?from, ?to, "link state changed");
            emit(
                self.event_callback.as_ref(),
                PipelineEvent::LinkStateChanged { from, to },
            );
        }
    }
}
