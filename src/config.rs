//! Configuration types for the capture pipeline.
//!
//! Every limit the pipeline enforces lives in [`PipelineConfig`]; core logic
//! never hard-codes a buffer size, retry count or interval.

use std::time::Duration;

use crate::PipelineError;

/// Peer-visible identifier of 16-bit little-endian PCM.
pub const CODEC_ID_PCM16: u8 = 0;
/// Peer-visible identifier of µ-law at the capture rate.
pub const CODEC_ID_MULAW16: u8 = 10;
/// Peer-visible identifier of µ-law at a decimated rate.
pub const CODEC_ID_MULAW8: u8 = 11;
/// Peer-visible identifier of the perceptual (Opus) codec.
pub const CODEC_ID_OPUS: u8 = 20;

/// Which codec compresses PCM blocks before they are queued.
///
/// Exactly one codec is active per session. Its [`codec_id`](Self::codec_id)
/// is reported read-only to the peer so it can pick a matching decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecSelection {
    /// Raw samples as little-endian bytes, 2 bytes per sample.
    PassThrough16,

    /// G.711-style µ-law, 1 byte per encoded sample.
    Companding8 {
        /// Only every Nth sample is encoded. 1 keeps the capture rate.
        decimation: usize,
    },

    /// Speech-tuned lossy compression (Opus).
    ///
    /// Requires the `opus` cargo feature.
    Perceptual {
        /// Target bitrate in bits per second.
        bitrate: u32,
        /// Encoder complexity, 0-10.
        complexity: u8,
        /// Hint the encoder that the signal is voice.
        voice: bool,
    },
}

impl Default for CodecSelection {
    fn default() -> Self {
        Self::Companding8 { decimation: 1 }
    }
}

impl CodecSelection {
    /// Returns the numeric identifier reported to the peer.
    #[must_use]
    pub fn codec_id(&self) -> u8 {
        match self {
            Self::PassThrough16 => CODEC_ID_PCM16,
            Self::Companding8 { decimation } if *decimation <= 1 => CODEC_ID_MULAW16,
            Self::Companding8 { .. } => CODEC_ID_MULAW8,
            Self::Perceptual { .. } => CODEC_ID_OPUS,
        }
    }

    /// Short human-readable name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PassThrough16 => "pcm16",
            Self::Companding8 { .. } => "mulaw",
            Self::Perceptual { .. } => "opus",
        }
    }
}

/// What to do with queued frames while connected but not subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsubscribedPolicy {
    /// Drop frames so no stale audio piles up for the live stream.
    #[default]
    Discard,
    /// Treat the link as absent and keep recording to storage.
    Store,
}

/// Tunables for the whole pipeline.
///
/// Use [`PipelineConfig::default()`] for the values the device ships with,
/// or override individual fields:
///
/// ```
/// use pendant_audio::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig {
///     queue_slots: 64,
///     transport_interval: Duration::from_millis(5),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Codec used for every block.
    pub codec: CodecSelection,

    /// Capture sample rate in Hz (mono).
    pub sample_rate: u32,

    /// Samples in one PCM block. Default: 160 (10ms at 16kHz).
    pub samples_per_block: usize,

    /// Upper bound on one encoded frame (`MAX_FRAME_BYTES`).
    pub max_frame_bytes: usize,

    /// Frame queue capacity in whole slots (`Q`).
    pub queue_slots: usize,

    /// Smallest negotiated payload size worth streaming to (`MINIMAL_PACKET_SIZE`).
    pub minimal_packet_size: u16,

    /// Size of one storage block (`MAX_BLOCK_BYTES`).
    pub max_block_bytes: usize,

    /// Frames routed per transport cycle before yielding.
    pub burst_frames: usize,

    /// Notification attempts per packet while the link reports busy.
    pub notify_attempts: u32,

    /// Delay between notification attempts.
    pub notify_backoff: Duration,

    /// Transport sleep after a cycle that routed frames.
    pub transport_interval: Duration,

    /// Transport sleep after a cycle with nothing to route.
    pub idle_interval: Duration,

    /// Routing while connected but not subscribed.
    pub unsubscribed_policy: UnsubscribedPolicy,

    /// Storage stops accepting blocks once the write offset reaches this.
    pub storage_ceiling_bytes: u32,

    /// Persist the write offset after this many block flushes.
    pub offset_persist_every: u32,

    /// Period of the streaming statistics log line.
    pub stats_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            codec: CodecSelection::default(),
            sample_rate: 16_000,
            samples_per_block: 160,
            max_frame_bytes: 320,
            queue_slots: 32,
            minimal_packet_size: 100,
            max_block_bytes: 440,
            burst_frames: 2,
            notify_attempts: 3,
            notify_backoff: Duration::from_millis(1),
            transport_interval: Duration::from_millis(10),
            idle_interval: Duration::from_millis(20),
            unsubscribed_policy: UnsubscribedPolicy::Discard,
            storage_ceiling_bytes: 0xFFFF_0000,
            offset_persist_every: 1,
            stats_interval: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Checks that the limits are usable together.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.samples_per_block == 0 {
            return Err(PipelineError::invalid_config("samples_per_block must be > 0"));
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::invalid_config("sample_rate must be > 0"));
        }
        if self.max_frame_bytes == 0 || self.max_frame_bytes > usize::from(u16::MAX) {
            return Err(PipelineError::invalid_config(
                "max_frame_bytes must be in 1..=65535",
            ));
        }
        if self.queue_slots == 0 {
            return Err(PipelineError::invalid_config("queue_slots must be > 0"));
        }
        if usize::from(self.minimal_packet_size) <= crate::link::PACKET_HEADER_BYTES {
            return Err(PipelineError::invalid_config(format!(
                "minimal_packet_size must exceed the {}-byte packet header",
                crate::link::PACKET_HEADER_BYTES
            )));
        }
        let min_payload = usize::from(self.minimal_packet_size) - crate::link::PACKET_HEADER_BYTES;
        if self.max_frame_bytes.div_ceil(min_payload) > crate::link::MAX_FRAGMENTS {
            return Err(PipelineError::invalid_config(format!(
                "max_frame_bytes={} needs more than {} packets at minimal_packet_size={}",
                self.max_frame_bytes,
                crate::link::MAX_FRAGMENTS,
                self.minimal_packet_size
            )));
        }
        if self.max_block_bytes < 2 {
            return Err(PipelineError::invalid_config("max_block_bytes must be >= 2"));
        }
        if self.burst_frames == 0 {
            return Err(PipelineError::invalid_config("burst_frames must be > 0"));
        }
        if self.notify_attempts == 0 {
            return Err(PipelineError::invalid_config("notify_attempts must be > 0"));
        }
        if self.offset_persist_every == 0 {
            return Err(PipelineError::invalid_config(
                "offset_persist_every must be > 0",
            ));
        }
        if let CodecSelection::Companding8 { decimation } = self.codec {
            if decimation == 0 || decimation > self.samples_per_block {
                return Err(PipelineError::invalid_config(
                    "decimation must be in 1..=samples_per_block",
                ));
            }
        }
        if let CodecSelection::Perceptual { complexity, .. } = self.codec {
            if complexity > 10 {
                return Err(PipelineError::invalid_config("complexity must be 0-10"));
            }
        }
        Ok(())
    }

    /// Bytes one queue slot occupies (length header plus `max_frame_bytes`).
    #[must_use]
    pub fn queue_slot_bytes(&self) -> usize {
        self.max_frame_bytes + crate::pipeline::QUEUE_HEADER_BYTES
    }

    /// Duration of audio carried by one PCM block.
    #[must_use]
    pub fn block_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_per_block as f64 / f64::from(self.sample_rate))
    }
}
