//! In-memory block store with fault injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::BlockStore;
use crate::StorageError;

#[derive(Default)]
struct Contents {
    blocks: Vec<Vec<u8>>,
    bytes: u64,
    persisted_offset: u32,
}

#[derive(Default)]
struct Shared {
    contents: Mutex<Contents>,
    capacity: Option<u64>,
    fail_writes: AtomicBool,
    fail_mount: AtomicBool,
    persist_calls: AtomicUsize,
}

/// A [`BlockStore`] that keeps every block in memory.
///
/// Clones share the same contents, so a test can hand one clone to the
/// pipeline and inspect another.
///
/// # Example
///
/// ```
/// use pendant_audio::MemoryBlockStore;
///
/// let store = MemoryBlockStore::with_capacity(4096);
/// let handle = store.clone();
/// // ... give `store` to the pipeline ...
/// assert_eq!(handle.block_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    shared: Arc<Shared>,
}

impl MemoryBlockStore {
    /// Creates an unbounded, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that accepts at most `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: Some(capacity),
                ..Shared::default()
            }),
        }
    }

    /// Creates a store whose persisted offset starts at `offset`, as if a
    /// previous session had written that much.
    pub fn with_offset(offset: u32) -> Self {
        let store = Self::new();
        store.shared.contents.lock().persisted_offset = offset;
        store
    }

    /// Makes subsequent writes and offset persists fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent mounts fail.
    pub fn set_fail_mount(&self, fail: bool) {
        self.shared.fail_mount.store(fail, Ordering::SeqCst);
    }

    /// Copies of every block written so far.
    pub fn blocks(&self) -> Vec<Vec<u8>> {
        self.shared.contents.lock().blocks.clone()
    }

    /// Number of blocks written.
    pub fn block_count(&self) -> usize {
        self.shared.contents.lock().blocks.len()
    }

    /// Last offset persisted.
    pub fn persisted_offset(&self) -> u32 {
        self.shared.contents.lock().persisted_offset
    }

    /// Number of successful offset persists.
    pub fn persist_calls(&self) -> usize {
        self.shared.persist_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn mount(&self) -> Result<(), StorageError> {
        if self.shared.fail_mount.load(Ordering::SeqCst) {
            return Err(StorageError::NotReady);
        }
        Ok(())
    }

    async fn append_block(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::write_failed("injected write failure"));
        }
        let mut contents = self.shared.contents.lock();
        let len = bytes.len() as u64;
        if let Some(capacity) = self.shared.capacity {
            if contents.bytes + len > capacity {
                return Err(StorageError::Full);
            }
        }
        contents.bytes += len;
        contents.blocks.push(bytes.to_vec());
        Ok(())
    }

    async fn read_offset(&self) -> Result<u32, StorageError> {
        Ok(self.shared.contents.lock().persisted_offset)
    }

    async fn persist_offset(&self, offset: u32) -> Result<(), StorageError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::write_failed("injected persist failure"));
        }
        self.shared.contents.lock().persisted_offset = offset;
        self.shared.persist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capacity_remaining(&self) -> u32 {
        match self.shared.capacity {
            Some(capacity) => {
                let used = self.shared.contents.lock().bytes;
                u32::try_from(capacity.saturating_sub(used)).unwrap_or(u32::MAX)
            }
            None => u32::MAX,
        }
    }
}
