//! Store-and-forward sink for frames recorded while no peer is listening.
//!
//! Frames are packed back to back into fixed-size blocks:
//!
//! ```text
//! [frame_len: u8][payload; frame_len][frame_len: u8][payload] ... [0 padding]
//! ```
//!
//! A block is written to the [`BlockStore`] whole, never partially, when the
//! next entry would overflow it or exactly fills it. A zero length byte marks
//! the end of the entries in a block. The running write offset is persisted
//! so a restart resumes appending without scanning the store.

mod file;
mod memory;

pub use file::FileBlockStore;
pub use memory::MemoryBlockStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::emit;
use crate::{EventCallback, PipelineError, PipelineEvent, StorageError};

/// Bytes of length prefix in front of every stored frame.
pub const STORAGE_HEADER_BYTES: usize = 1;

/// Backing device for storage blocks.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability
/// - Blocking I/O belongs in `spawn_blocking`
/// - Any error marks the sink unavailable for the rest of the session
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Brings the device up. Called once before any other method.
    ///
    /// Default implementation does nothing.
    async fn mount(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Appends one whole block at the current end of the store.
    async fn append_block(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Reads the persisted write offset.
    async fn read_offset(&self) -> Result<u32, StorageError>;

    /// Persists the write offset.
    async fn persist_offset(&self, offset: u32) -> Result<(), StorageError>;

    /// Bytes the device can still accept.
    fn capacity_remaining(&self) -> u32;
}

/// Block-packing storage sink.
pub struct StorageSink {
    store: Arc<dyn BlockStore>,
    block: Vec<u8>,
    max_block_bytes: usize,
    ceiling: u32,
    persist_every: u32,
    flushes_since_persist: u32,
    write_offset: u32,
    available: bool,
    full_warned: bool,
    event_callback: Option<EventCallback>,
}

impl StorageSink {
    /// Mounts `store` and reads its persisted write offset.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StorageMount`] if the device cannot be brought
    /// up, its offset cannot be read, or `max_block_bytes` cannot hold an
    /// entry.
    pub async fn mount(
        store: Arc<dyn BlockStore>,
        max_block_bytes: usize,
        ceiling: u32,
        persist_every: u32,
    ) -> Result<Self, PipelineError> {
        if max_block_bytes <= STORAGE_HEADER_BYTES {
            return Err(PipelineError::StorageMount {
                reason: format!("max_block_bytes={max_block_bytes} cannot hold an entry"),
            });
        }
        store
            .mount()
            .await
            .map_err(|e| PipelineError::StorageMount {
                reason: format!("{}: {e}", store.name()),
            })?;
        let write_offset = store
            .read_offset()
            .await
            .map_err(|e| PipelineError::StorageMount {
                reason: format!("{}: reading offset: {e}", store.name()),
            })?;

        tracing::info!(
            store = store.name(),
            write_offset,
            capacity_remaining = store.capacity_remaining(),
            "storage mounted"
        );

        Ok(Self {
            store,
            block: Vec::with_capacity(max_block_bytes),
            max_block_bytes,
            ceiling,
            persist_every: persist_every.max(1),
            flushes_since_persist: 0,
            write_offset,
            available: true,
            full_warned: false,
            event_callback: None,
        })
    }

    /// Largest frame one entry can hold in a block of `max_block_bytes`.
    ///
    /// Bounded by the one-byte length prefix and by the block itself.
    pub fn max_entry_bytes(max_block_bytes: usize) -> usize {
        usize::from(u8::MAX).min(max_block_bytes.saturating_sub(STORAGE_HEADER_BYTES))
    }

    /// Reports flushes and failures to `callback`.
    #[must_use]
    pub fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    /// Total bytes flushed to the store, including earlier sessions.
    pub fn write_offset(&self) -> u32 {
        self.write_offset
    }

    /// `false` once a backing failure has disabled the sink.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Bytes waiting in the current block.
    pub fn pending_bytes(&self) -> usize {
        self.block.len()
    }

    /// `true` if another whole block can be written.
    pub fn has_space(&self) -> bool {
        self.available
            && u64::from(self.write_offset) + self.max_block_bytes as u64 <= u64::from(self.ceiling)
            && self.store.capacity_remaining() as usize >= self.max_block_bytes
    }

    /// Like [`has_space`](Self::has_space), logging once each time storage
    /// fills up.
    pub fn refresh_space(&mut self) -> bool {
        let has_space = self.has_space();
        if has_space {
            self.full_warned = false;
        } else if self.available && !self.full_warned {
            self.full_warned = true;
            tracing::warn!(
                store = self.store.name(),
                write_offset = self.write_offset,
                "storage full, frames will be dropped"
            );
            emit(
                self.event_callback.as_ref(),
                PipelineEvent::StorageFull {
                    write_offset: self.write_offset,
                },
            );
        }
        has_space
    }

    /// Packs one frame, flushing whole blocks as they fill.
    ///
    /// Returns `false` if the frame was not stored. Zero-length frames carry
    /// nothing and are accepted without writing.
    pub async fn append(&mut self, frame: &[u8]) -> bool {
        if !self.available {
            return false;
        }
        let len = frame.len();
        if len == 0 {
            return true;
        }
        let Ok(len_byte) = u8::try_from(len) else {
            tracing::warn!(len, "frame too large for a storage entry");
            return false;
        };
        let entry_bytes = STORAGE_HEADER_BYTES + len;
        if entry_bytes > self.max_block_bytes {
            tracing::warn!(
                len,
                max_block_bytes = self.max_block_bytes,
                "frame does not fit a storage block"
            );
            return false;
        }

        if self.block.len() + entry_bytes > self.max_block_bytes && !self.flush().await {
            return false;
        }

        self.block.push(len_byte);
        self.block.extend_from_slice(frame);

        if self.block.len() == self.max_block_bytes {
            return self.flush().await;
        }
        true
    }

    /// Writes a partly filled block, zero padded, and persists the offset.
    ///
    /// Called when the pipeline stops so no buffered audio is lost.
    pub async fn flush_partial(&mut self) -> bool {
        let flushed = self.block.is_empty() || self.flush().await;
        if flushed && self.flushes_since_persist > 0 {
            return self.persist().await;
        }
        flushed
    }

    async fn flush(&mut self) -> bool {
        if !self.has_space() {
            self.refresh_space();
            self.block.clear();
            return false;
        }

        self.block.resize(self.max_block_bytes, 0);
        let result = self.store.append_block(&self.block).await;
        self.block.clear();

        if let Err(e) = result {
            self.disable(&e);
            return false;
        }

        self.write_offset = self.write_offset.saturating_add(self.max_block_bytes as u32);
        self.flushes_since_persist += 1;
        tracing::trace!(write_offset = self.write_offset, "storage block flushed");
        emit(
            self.event_callback.as_ref(),
            PipelineEvent::BlockFlushed {
                write_offset: self.write_offset,
            },
        );

        if self.flushes_since_persist >= self.persist_every {
            return self.persist().await;
        }
        true
    }

    async fn persist(&mut self) -> bool {
        match self.store.persist_offset(self.write_offset).await {
            Ok(()) => {
                self.flushes_since_persist = 0;
                true
            }
            Err(e) => {
                self.disable(&e);
                false
            }
        }
    }

    fn disable(&mut self, error: &StorageError) {
        if !self.available {
            return;
        }
        self.available = false;
        tracing::warn!(
            store = self.store.name(),
            error = %error,
            "storage failed, disabled for this session"
        );
        emit(
            self.event_callback.as_ref(),
            PipelineEvent::StorageUnavailable {
                reason: error.to_string(),
            },
        );
    }
}

impl std::fmt::Debug for StorageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSink")
            .field("store", &self.store.name())
            .field("write_offset", &self.write_offset)
            .field("pending_bytes", &self.block.len())
            .field("available", &self.available)
            .finish_non_exhaustive()
    }
}

/// Splits a stored block back into its frames.
pub fn unpack_block(block: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while let Some(&len) = block.get(offset) {
        if len == 0 {
            break;
        }
        let start = offset + STORAGE_HEADER_BYTES;
        let end = start + usize::from(len);
        let Some(frame) = block.get(start..end) else {
            break;
        };
        frames.push(frame);
        offset = end;
    }
    frames
}
