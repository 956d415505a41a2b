//! Capture context: PCM block in, encoded frame onto the queue.
//!
//! Runs on a dedicated OS thread. It blocks only on the block pool. Encoding
//! and enqueueing are bounded, and the buffer goes back to the driver as
//! soon as the codec is done with it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::codec::AudioEncoder;
use crate::event::{emit, EventCallback};
use crate::pipeline::{FrameQueue, OverflowPolicy, PushOutcome};
use crate::session::SessionState;
use crate::source::BlockReceiver;
use crate::{CodecError, PipelineError, PipelineEvent};

/// Owns the encoder for the lifetime of the capture context.
pub(crate) struct CaptureWorker {
    receiver: BlockReceiver,
    encoder: Box<dyn AudioEncoder>,
    queue: Arc<FrameQueue>,
    policy: OverflowPolicy,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
    reported_overruns: u64,
}

impl CaptureWorker {
    pub fn new(
        receiver: BlockReceiver,
        encoder: Box<dyn AudioEncoder>,
        queue: Arc<FrameQueue>,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            receiver,
            encoder,
            queue,
            policy: OverflowPolicy::EvictOldestHalf,
            state,
            event_callback,
            reported_overruns: 0,
        }
    }

    /// Starts the capture thread. The encoder is dropped when it exits.
    pub fn spawn(self) -> Result<JoinHandle<()>, PipelineError> {
        std::thread::Builder::new()
            .name("pendant-capture".to_string())
            .spawn(move || self.run())
            .map_err(|e| PipelineError::TaskJoin(format!("failed to spawn capture thread: {e}")))
    }

    fn run(mut self) {
        tracing::debug!(codec_id = self.encoder.codec_id(), "capture context started");
        while let Some(block) = self.receiver.recv_blocking() {
            self.state.blocks_captured.fetch_add(1, Ordering::Relaxed);
            let result = self.encoder.encode(&block);
            self.receiver.release(block);
            self.check_overruns();

            match result {
                Ok(frame) => self.enqueue(frame.as_bytes()),
                Err(error) => self.encode_failed(error),
            }
        }
        tracing::debug!("capture context finished");
    }

    fn enqueue(&mut self, frame: &[u8]) {
        if frame.len() > self.queue.max_frame_bytes() {
            self.encode_failed(CodecError::FrameTooLarge {
                len: frame.len(),
                max: self.queue.max_frame_bytes(),
            });
            return;
        }
        self.state.frames_encoded.fetch_add(1, Ordering::Relaxed);

        match self.queue.push_with_policy(frame, self.policy) {
            PushOutcome::Queued => {}
            PushOutcome::QueuedAfterEviction { evicted } => {
                self.state
                    .frames_evicted
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                tracing::warn!(evicted, "frame queue full, evicted oldest frames");
                emit(
                    self.event_callback.as_ref(),
                    PipelineEvent::QueueOverflow {
                        evicted,
                        dropped: false,
                    },
                );
            }
            PushOutcome::Dropped => {
                self.state
                    .frames_dropped_overflow
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(len = frame.len(), "frame queue full, frame dropped");
                emit(
                    self.event_callback.as_ref(),
                    PipelineEvent::QueueOverflow {
                        evicted: 0,
                        dropped: true,
                    },
                );
            }
        }
    }

    fn encode_failed(&mut self, error: CodecError) {
        self.state.encode_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = %error, "encode failed, block dropped");
        emit(
            self.event_callback.as_ref(),
            PipelineEvent::EncodeFailed { error },
        );
    }

    fn check_overruns(&mut self) {
        let overruns = self.receiver.overruns();
        if overruns > self.reported_overruns {
            self.reported_overruns = overruns;
            self.state
                .capture_overruns
                .store(overruns, Ordering::Relaxed);
            tracing::debug!(overruns, "capture driver skipped a period");
            emit(
                self.event_callback.as_ref(),
                PipelineEvent::CaptureOverrun {
                    dropped_blocks: overruns,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PassThrough16;
    use crate::source::BlockPool;
    use crate::{EncodedFrame, PcmBlock};
    use parking_lot::Mutex;

    struct FailingEncoder;

    impl AudioEncoder for FailingEncoder {
        fn codec_id(&self) -> u8 {
            99
        }

        fn max_frame_bytes(&self) -> usize {
            4
        }

        fn encode(&mut self, _pcm: &PcmBlock) -> Result<EncodedFrame, CodecError> {
            Err(CodecError::encode_failed("boom"))
        }
    }

    #[test]
    fn test_capture_encodes_and_releases() {
        let (mut driver, receiver) = BlockPool::new(2, 2);
        let queue = Arc::new(FrameQueue::new(8, 4));
        let state = Arc::new(SessionState::new());
        let worker = CaptureWorker::new(
            receiver,
            Box::new(PassThrough16::new(2)),
            Arc::clone(&queue),
            Arc::clone(&state),
            None,
        );
        let handle = worker.spawn().unwrap();

        for i in 0..5i16 {
            let mut block = driver.acquire_blocking().unwrap();
            block.fill_from(&[i, i]);
            driver.submit(block);
        }
        drop(driver);
        handle.join().unwrap();

        assert_eq!(queue.len(), 5);
        assert_eq!(state.snapshot().frames_encoded, 5);
        assert_eq!(queue.pop().unwrap().as_bytes(), &[0, 0, 0, 0]);
        assert_eq!(queue.pop().unwrap().as_bytes(), &[1, 0, 1, 0]);
    }

    #[test]
    fn test_encode_failure_drops_block_and_continues() {
        let (mut driver, receiver) = BlockPool::new(2, 2);
        let queue = Arc::new(FrameQueue::new(8, 4));
        let state = Arc::new(SessionState::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let worker = CaptureWorker::new(
            receiver,
            Box::new(FailingEncoder),
            Arc::clone(&queue),
            Arc::clone(&state),
            Some(crate::event_callback(move |e| events_clone.lock().push(e))),
        );
        let handle = worker.spawn().unwrap();

        for _ in 0..3 {
            let block = driver.acquire_blocking().unwrap();
            driver.submit(block);
        }
        drop(driver);
        handle.join().unwrap();

        assert!(queue.is_empty());
        assert_eq!(state.snapshot().encode_failures, 3);
        assert_eq!(events.lock().len(), 3);
    }

    #[test]
    fn test_overflow_evicts_without_tearing() {
        let (mut driver, receiver) = BlockPool::new(2, 2);
        let queue = Arc::new(FrameQueue::new(4, 4));
        let state = Arc::new(SessionState::new());
        let worker = CaptureWorker::new(
            receiver,
            Box::new(PassThrough16::new(2)),
            Arc::clone(&queue),
            Arc::clone(&state),
            None,
        );
        let handle = worker.spawn().unwrap();

        for i in 0..10i16 {
            let mut block = driver.acquire_blocking().unwrap();
            block.fill_from(&[i, i]);
            driver.submit(block);
        }
        drop(driver);
        handle.join().unwrap();

        let stats = state.snapshot();
        assert!(stats.frames_evicted > 0);
        let remaining: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert!(!remaining.is_empty());
        for frame in &remaining {
            let bytes = frame.as_bytes();
            assert_eq!(bytes.len(), 4);
            assert_eq!(bytes[0], bytes[2]);
        }
        assert_eq!(remaining.last().unwrap().as_bytes()[0], 9);
    }
}
