//! Ping-pong buffer pool between a capture driver and the capture context.
//!
//! Buffers travel by value through two bounded channels, free and filled, so
//! a block is only ever writable by whichever side currently owns it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::PcmBlock;

/// Buffers in a double-buffered pool.
pub const DEFAULT_POOL_BUFFERS: usize = 2;

/// Constructor for the two ends of a block pool.
pub struct BlockPool;

impl BlockPool {
    /// Allocates `buffers` zeroed blocks of `samples_per_block` samples.
    ///
    /// `buffers` is clamped to at least 1.
    pub fn new(buffers: usize, samples_per_block: usize) -> (BlockDriver, BlockReceiver) {
        let buffers = buffers.max(1);
        let (free_tx, free_rx) = mpsc::channel(buffers);
        let (filled_tx, filled_rx) = mpsc::channel(buffers);
        for _ in 0..buffers {
            // Capacity equals the buffer count
            let _ = free_tx.try_send(PcmBlock::zeroed(samples_per_block));
        }
        let overruns = Arc::new(AtomicU64::new(0));

        (
            BlockDriver {
                free_rx,
                filled_tx,
                samples_per_block,
                overruns: Arc::clone(&overruns),
            },
            BlockReceiver {
                filled_rx,
                free_tx,
                overruns,
            },
        )
    }
}

/// Driver end: takes free buffers, submits filled ones.
pub struct BlockDriver {
    free_rx: mpsc::Receiver<PcmBlock>,
    filled_tx: mpsc::Sender<PcmBlock>,
    samples_per_block: usize,
    overruns: Arc<AtomicU64>,
}

impl BlockDriver {
    /// Samples every block in this pool holds.
    pub fn samples_per_block(&self) -> usize {
        self.samples_per_block
    }

    /// Takes a free buffer without waiting.
    ///
    /// Returns `None` when both buffers are still with the consumer; the
    /// period is counted as an overrun and should be skipped.
    pub fn acquire(&mut self) -> Option<PcmBlock> {
        if let Ok(block) = self.free_rx.try_recv() {
            return Some(block);
        }
        self.overruns.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Waits for a free buffer. For sources that are not tied to a hardware
    /// clock. Returns `None` once the consumer is gone.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime.
    pub fn acquire_blocking(&mut self) -> Option<PcmBlock> {
        self.free_rx.blocking_recv()
    }

    /// Hands a filled buffer to the consumer.
    ///
    /// Returns `false` if the consumer has shut down.
    pub fn submit(&self, block: PcmBlock) -> bool {
        match self.filled_tx.try_send(block) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // Only reachable if a foreign block was injected into the pool
                self.overruns.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// `true` once the consumer end has been dropped.
    pub fn is_closed(&self) -> bool {
        self.filled_tx.is_closed()
    }

    /// Periods skipped because no buffer was free.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Consumer end: receives filled buffers, releases them back.
pub struct BlockReceiver {
    filled_rx: mpsc::Receiver<PcmBlock>,
    free_tx: mpsc::Sender<PcmBlock>,
    overruns: Arc<AtomicU64>,
}

impl BlockReceiver {
    /// Blocks until the driver submits a buffer. Returns `None` once the
    /// driver is dropped and every submitted buffer has been received.
    ///
    /// # Panics
    ///
    /// Panics if called from inside an async runtime.
    pub fn recv_blocking(&mut self) -> Option<PcmBlock> {
        self.filled_rx.blocking_recv()
    }

    /// Takes a submitted buffer without waiting.
    pub fn try_recv(&mut self) -> Option<PcmBlock> {
        self.filled_rx.try_recv().ok()
    }

    /// Returns a buffer to the driver.
    pub fn release(&self, block: PcmBlock) {
        // Fails only if the driver is gone, in which case the buffer is freed
        let _ = self.free_tx.try_send(block);
    }

    /// Periods the driver skipped because no buffer was free.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}
