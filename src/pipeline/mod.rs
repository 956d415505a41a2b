//! Pipeline contexts and the structures between them.
//!
//! ```text
//! Capture thread                      Transport task
//! BlockReceiver → AudioEncoder ─push→ FrameQueue ─pop→ SinkSelector ─┬→ Packetizer → Notifier
//!                                                                   └→ StorageSink
//! ```
//!
//! - **Frame Queue**: The only structure both contexts touch
//! - **Sink Selector**: Routes each frame to exactly one sink, or drains
//! - **Transport**: Resets the queue and packet ids when the subscribed
//!   session changes, then routes a bounded burst per cycle

mod capture;
mod frame_queue;
mod selector;
mod transport;

pub(crate) use capture::CaptureWorker;
pub use frame_queue::{FrameQueue, OverflowPolicy, PushOutcome, QUEUE_HEADER_BYTES};
pub use selector::{DiscardReason, Route, SinkSelector};
pub(crate) use transport::{TransportCommand, TransportWorker};
