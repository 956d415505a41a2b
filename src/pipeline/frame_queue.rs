//! Bounded FIFO of length-prefixed frames between capture and transport.
//!
//! Every entry occupies one whole fixed-size slot:
//!
//! ```text
//! offset 0..1  length (u16 LE)
//! offset 2..   payload (length bytes), zero padding to max_frame_bytes
//! ```
//!
//! Slots are written and read under one short-held lock, so the reader only
//! ever sees entries that were fully committed and eviction is a count of
//! whole slots.

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::EncodedFrame;

/// Bytes of length prefix in front of every queued frame.
pub const QUEUE_HEADER_BYTES: usize = 2;

/// What to do when a push finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the frame being pushed.
    DropNewest,
    /// If the queue is more than 3/4 full, evict the oldest half of the
    /// slots and retry once.
    #[default]
    EvictOldestHalf,
}

/// Result of [`FrameQueue::push_with_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was queued without eviction.
    Queued,
    /// Old entries were evicted, then the frame was queued.
    QueuedAfterEviction {
        /// Entries evicted from the head.
        evicted: usize,
    },
    /// The frame was not queued.
    Dropped,
}

struct Slots {
    ring: HeapRb<u8>,
    scratch: Vec<u8>,
}

/// Single-producer single-consumer frame queue with a fixed slot count.
pub struct FrameQueue {
    inner: Mutex<Slots>,
    slot_bytes: usize,
    max_frame_bytes: usize,
    capacity_slots: usize,
}

impl FrameQueue {
    /// Creates a queue of `capacity_slots` slots, each holding up to
    /// `max_frame_bytes` of payload.
    pub fn new(capacity_slots: usize, max_frame_bytes: usize) -> Self {
        let capacity_slots = capacity_slots.max(1);
        let slot_bytes = max_frame_bytes + QUEUE_HEADER_BYTES;
        Self {
            inner: Mutex::new(Slots {
                ring: HeapRb::new(capacity_slots * slot_bytes),
                scratch: vec![0u8; slot_bytes],
            }),
            slot_bytes,
            max_frame_bytes,
            capacity_slots,
        }
    }

    /// Total slots.
    pub fn capacity_slots(&self) -> usize {
        self.capacity_slots
    }

    /// Largest payload a slot can hold.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Entries currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().ring.occupied_len() / self.slot_bytes
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues `frame` if a slot is free. Returns `false` if the queue is full
    /// or the frame exceeds `max_frame_bytes`.
    pub fn push(&self, frame: &[u8]) -> bool {
        if frame.len() > self.max_frame_bytes {
            return false;
        }
        let mut slots = self.inner.lock();
        self.push_locked(&mut slots, frame)
    }

    /// Queues `frame`, applying `policy` if the queue is full.
    pub fn push_with_policy(&self, frame: &[u8], policy: OverflowPolicy) -> PushOutcome {
        if frame.len() > self.max_frame_bytes {
            return PushOutcome::Dropped;
        }
        let mut slots = self.inner.lock();
        if self.push_locked(&mut slots, frame) {
            return PushOutcome::Queued;
        }

        match policy {
            OverflowPolicy::DropNewest => PushOutcome::Dropped,
            OverflowPolicy::EvictOldestHalf => {
                let filled = slots.ring.occupied_len() / self.slot_bytes;
                if filled * 4 <= self.capacity_slots * 3 {
                    return PushOutcome::Dropped;
                }
                let evicted = self.evict_locked(&mut slots, (self.capacity_slots / 2).max(1));
                if self.push_locked(&mut slots, frame) {
                    PushOutcome::QueuedAfterEviction { evicted }
                } else {
                    PushOutcome::Dropped
                }
            }
        }
    }

    /// Pops the oldest entry into `buf`, returning its length.
    ///
    /// `buf` must hold at least `max_frame_bytes`; a smaller buffer returns
    /// `None` and leaves the queue untouched.
    pub fn pop_into(&self, buf: &mut [u8]) -> Option<usize> {
        if buf.len() < self.max_frame_bytes {
            return None;
        }
        let mut slots = self.inner.lock();
        let len = self.pop_locked(&mut slots)?;
        buf[..len].copy_from_slice(&slots.scratch[QUEUE_HEADER_BYTES..QUEUE_HEADER_BYTES + len]);
        Some(len)
    }

    /// Pops the oldest entry as an owned frame.
    pub fn pop(&self) -> Option<EncodedFrame> {
        let mut slots = self.inner.lock();
        let len = self.pop_locked(&mut slots)?;
        Some(EncodedFrame::new(
            slots.scratch[QUEUE_HEADER_BYTES..QUEUE_HEADER_BYTES + len].to_vec(),
        ))
    }

    /// Drops up to `count` of the oldest entries, returning how many went.
    pub fn evict_oldest(&self, count: usize) -> usize {
        let mut slots = self.inner.lock();
        self.evict_locked(&mut slots, count)
    }

    /// Drops every entry, returning how many went.
    pub fn clear(&self) -> usize {
        let mut slots = self.inner.lock();
        self.evict_locked(&mut slots, self.capacity_slots)
    }

    fn push_locked(&self, slots: &mut Slots, frame: &[u8]) -> bool {
        if slots.ring.vacant_len() < self.slot_bytes {
            return false;
        }
        let len = frame.len();
        // Bounded by max_frame_bytes, which config validation keeps within u16
        let header = (len as u16).to_le_bytes();
        let Slots { ring, scratch } = slots;
        scratch[..QUEUE_HEADER_BYTES].copy_from_slice(&header);
        scratch[QUEUE_HEADER_BYTES..QUEUE_HEADER_BYTES + len].copy_from_slice(frame);
        scratch[QUEUE_HEADER_BYTES + len..].fill(0);
        ring.push_slice(scratch) == self.slot_bytes
    }

    fn pop_locked(&self, slots: &mut Slots) -> Option<usize> {
        if slots.ring.occupied_len() < self.slot_bytes {
            return None;
        }
        let Slots { ring, scratch } = slots;
        ring.pop_slice(scratch);
        let len = usize::from(u16::from_le_bytes([scratch[0], scratch[1]]));
        Some(len.min(self.max_frame_bytes))
    }

    fn evict_locked(&self, slots: &mut Slots, count: usize) -> usize {
        let filled = slots.ring.occupied_len() / self.slot_bytes;
        let count = count.min(filled);
        slots.ring.skip(count * self.slot_bytes);
        count
    }
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("len", &self.len())
            .field("capacity_slots", &self.capacity_slots)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}
