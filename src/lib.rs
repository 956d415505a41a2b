//! # pendant-audio
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Capture, encode, queue and dual-sink transport for a wearable audio recorder.
//!
//! `pendant-audio` takes fixed-size PCM blocks from a microphone driver,
//! compresses each into one frame, queues the frames in a bounded buffer and
//! routes each one either to a live wireless link (fragmented into
//! notification packets) or to local storage (packed into fixed-size blocks).
//! A frame goes to exactly one of the two, never both.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pendant_audio::{MemoryBlockStore, MockSource, NotifyChannel, Pipeline};
//!
//! # async fn run(channel: impl NotifyChannel + 'static) -> Result<(), pendant_audio::PipelineError> {
//! let mut source = MockSource::wearable();
//! source.generate_sine(440.0, 2000);
//!
//! let session = Pipeline::builder()
//!     .source(source)
//!     .notify_channel(channel)
//!     .storage(MemoryBlockStore::new())
//!     .on_event(|e| tracing::warn!(?e, "pipeline event"))
//!     .start()
//!     .await?;
//!
//! // Wire these to the wireless stack's connection callbacks
//! session.link().on_connected();
//! session.link().on_subscribed();
//!
//! let stats = session.stop().await?;
//! println!("sent {} packets", stats.packets_sent);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Three execution contexts share a small amount of state:
//!
//! - **Capture thread**: Receives PCM blocks from the driver's buffer pool,
//!   encodes them and pushes frames into the queue. Never waits on the link
//!   or on storage.
//! - **Frame queue**: Bounded, length-prefixed slots behind a short lock.
//!   When full, the oldest half is evicted so the newest audio survives.
//! - **Transport task**: Picks a route per frame from the link state, sends
//!   packets with bounded retries or appends to the storage accumulator.
//!
//! Link callbacks run on the wireless stack's own context and only flip
//! atomic state in [`LinkMonitor`].

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
pub mod codec;
mod config;
mod error;
mod event;
mod frame;
pub mod link;
pub mod pipeline;
mod session;
pub mod source;
pub mod storage;

pub use builder::{Pipeline, PipelineBuilder};
pub use codec::{build_encoder, AudioEncoder};
pub use config::{
    CodecSelection, PipelineConfig, UnsubscribedPolicy, CODEC_ID_MULAW16, CODEC_ID_MULAW8,
    CODEC_ID_OPUS, CODEC_ID_PCM16,
};
pub use error::{CodecError, PipelineError, StorageError};
pub use event::{event_callback, EventCallback, PipelineEvent};
pub use frame::{EncodedFrame, PcmBlock};
pub use link::{
    FrameAssembler, LinkMonitor, LinkState, NotifyChannel, NotifyResult, Packet, Packetizer,
    MAX_FRAGMENTS, PACKET_HEADER_BYTES,
};
pub use pipeline::{DiscardReason, FrameQueue, OverflowPolicy};
pub use session::{PipelineState, Session, SessionStats};
pub use source::{BlockDriver, BlockPool, BlockReceiver, CaptureSource, MockSource};
pub use storage::{
    unpack_block, BlockStore, FileBlockStore, MemoryBlockStore, StorageSink, STORAGE_HEADER_BYTES,
};
