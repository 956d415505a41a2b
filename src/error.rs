//! Error types for pendant-audio.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`PipelineError`]): Prevent the pipeline from starting
//! - **Recoverable errors** ([`CodecError`], [`StorageError`]): Affect a single
//!   unit of work and are surfaced via [`EventCallback`](crate::EventCallback)
//!   and log output, never to the caller of the pipeline

use std::path::PathBuf;

/// Fatal errors returned while starting or stopping the pipeline.
///
/// Runtime issues (queue overflow, busy link, full storage) never show up
/// here; they are handled by the documented drop policies and reported as
/// [`PipelineEvent`](crate::PipelineEvent)s.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The selected codec could not be initialized.
    #[error("codec '{codec}' failed to initialize: {reason}")]
    CodecInit {
        /// Name of the codec that failed.
        codec: String,
        /// Why initialization failed.
        reason: String,
    },

    /// No capture source was configured before starting.
    #[error("no capture source configured - call source() before start()")]
    NoCaptureSource,

    /// No wireless notification channel was configured before starting.
    #[error("no notify channel configured - call notify_channel() before start()")]
    NoNotifyChannel,

    /// The capture source failed to start delivering blocks.
    #[error("capture source '{source_name}' failed to start: {reason}")]
    SourceStartFailed {
        /// Name of the source that failed.
        source_name: String,
        /// Why the source failed to start.
        reason: String,
    },

    /// The storage backing could not be mounted.
    ///
    /// The orchestrator does not fail on this: it keeps the live path running
    /// and marks storage unavailable for the session.
    #[error("storage mount failed: {reason}")]
    StorageMount {
        /// Why the mount failed.
        reason: String,
    },

    /// A pipeline thread or task could not be spawned or joined.
    #[error("pipeline task error: {0}")]
    TaskJoin(String),
}

impl PipelineError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Errors produced while encoding one PCM block.
///
/// A codec error costs exactly one frame: the block is dropped and capture
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The underlying encoder rejected the block.
    #[error("encode failed: {reason}")]
    EncodeFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The block does not have the length the encoder was built for.
    #[error("block has {actual} samples, encoder expects {expected}")]
    BlockSizeMismatch {
        /// Samples per block the encoder was configured with.
        expected: usize,
        /// Samples actually delivered.
        actual: usize,
    },

    /// The encoded frame exceeds the static frame bound.
    #[error("encoded frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Length of the produced frame.
        len: usize,
        /// Configured maximum frame size.
        max: usize,
    },
}

impl CodecError {
    /// Creates an encode failure with the given reason.
    pub fn encode_failed(reason: impl Into<String>) -> Self {
        Self::EncodeFailed {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`BlockStore`](crate::BlockStore) implementation.
///
/// Any storage error marks the storage sink unavailable until the next
/// mount; the live path is unaffected.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A block write failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The device is not mounted or not powered.
    #[error("storage device not ready")]
    NotReady,

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    Io {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No room left for another block.
    #[error("storage full")]
    Full,

    /// Custom error for user-implemented stores.
    #[error("{0}")]
    Custom(String),
}

impl StorageError {
    /// Creates a custom storage error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
