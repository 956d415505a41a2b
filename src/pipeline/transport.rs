//! Transport context: routes queued frames to the link or to storage.
//!
//! One tokio task. Each cycle it observes the link session epoch, then
//! routes up to `burst_frames` frames, re-evaluating the route before every
//! frame, and sleeps. It is the only context that waits on the wireless
//! stack or the storage device.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::event::{emit, EventCallback};
use crate::link::{LinkMonitor, Notifier, Packetizer, SendOutcome};
use crate::pipeline::{DiscardReason, FrameQueue, Route, SinkSelector};
use crate::session::SessionState;
use crate::storage::StorageSink;
use crate::{EncodedFrame, LinkState, PipelineConfig, PipelineEvent, SessionStats};

/// Command sent to the transport task.
#[derive(Debug)]
pub enum TransportCommand {
    /// Drain the queue, flush storage and exit.
    Stop,
}

/// Per-interval streaming counters for the stats log line.
struct StatsWindow {
    started: Instant,
    last: SessionStats,
}

/// Owns everything only the transport touches.
pub(crate) struct TransportWorker {
    queue: Arc<FrameQueue>,
    link: Arc<LinkMonitor>,
    notifier: Notifier,
    packetizer: Packetizer,
    selector: SinkSelector,
    storage: Option<StorageSink>,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
    burst_frames: usize,
    transport_interval: Duration,
    idle_interval: Duration,
    stats_interval: Duration,
    seen_epoch: u64,
    last_route: Option<Route>,
    stats: StatsWindow,
}

impl TransportWorker {
    pub fn new(
        config: &PipelineConfig,
        queue: Arc<FrameQueue>,
        link: Arc<LinkMonitor>,
        notifier: Notifier,
        storage: Option<StorageSink>,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        let seen_epoch = link.epoch();
        Self {
            queue,
            link,
            notifier,
            packetizer: Packetizer::new(),
            selector: SinkSelector::new(
                config.minimal_packet_size,
                config.max_frame_bytes,
                config.unsubscribed_policy,
            ),
            storage,
            state,
            event_callback,
            burst_frames: config.burst_frames.max(1),
            transport_interval: config.transport_interval,
            idle_interval: config.idle_interval,
            stats_interval: config.stats_interval,
            seen_epoch,
            last_route: None,
            stats: StatsWindow {
                started: Instant::now(),
                last: SessionStats::default(),
            },
        }
    }

    /// Runs until told to stop, then drains.
    pub async fn run(mut self, mut cmd_rx: mpsc::Receiver<TransportCommand>) {
        tracing::debug!("transport context started");
        loop {
            let routed = self.run_cycle().await;
            let pause = if routed > 0 {
                self.transport_interval
            } else {
                self.idle_interval
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                cmd = cmd_rx.recv() => match cmd {
                    Some(TransportCommand::Stop) | None => break,
                },
            }
            self.maybe_log_stats();
        }

        self.drain().await;
        tracing::debug!("transport context finished");
    }

    /// One pass: observe the epoch, then up to `burst_frames` frames.
    ///
    /// Returns the number of frames routed or discarded.
    pub async fn run_cycle(&mut self) -> usize {
        self.observe_epoch();

        let mut routed = 0;
        while routed < self.burst_frames && !self.queue.is_empty() {
            // A transition mid-cycle ends the cycle; the reset happens next cycle
            if self.link.epoch() != self.seen_epoch {
                break;
            }
            match self.current_route() {
                Route::Discard(reason) => {
                    routed += self.discard_all(reason);
                    break;
                }
                Route::Stream { payload_size } => {
                    let Some(frame) = self.queue.pop() else {
                        break;
                    };
                    self.stream_frame(&frame, payload_size).await;
                    routed += 1;
                }
                Route::Store => {
                    let Some(frame) = self.queue.pop() else {
                        break;
                    };
                    self.store_frame(&frame).await;
                    routed += 1;
                }
            }
        }
        routed
    }

    /// Routes what is left after capture has stopped, then flushes storage.
    async fn drain(&mut self) {
        let queued = self.queue.len();
        while !self.queue.is_empty() {
            self.run_cycle().await;
        }

        if let Some(storage) = self.storage.as_mut() {
            storage.flush_partial().await;
            self.state
                .storage_write_offset
                .store(storage.write_offset(), Ordering::Relaxed);
        }
        tracing::info!(queued, "transport drained");
        self.log_stats();
    }

    fn observe_epoch(&mut self) {
        let epoch = self.link.epoch();
        if epoch == self.seen_epoch {
            return;
        }
        self.seen_epoch = epoch;
        self.packetizer.reset();
        let cleared = self.queue.clear();
        tracing::info!(
            epoch,
            cleared,
            link = ?self.link.state(),
            "stream session reset"
        );
        if cleared > 0 {
            self.note_discarded(cleared, DiscardReason::SessionReset);
        }
    }

    fn current_route(&mut self) -> Route {
        let link = self.link.state();
        let channel = self.notifier.channel();
        let payload = if channel.is_link_ready() {
            channel.negotiated_payload_size()
        } else {
            0
        };
        let storage_has_space = match (link, self.storage.as_mut()) {
            (LinkState::ConnectedSubscribed, _) | (_, None) => false,
            (_, Some(storage)) => storage.refresh_space(),
        };

        let route = self.selector.evaluate(link, payload, storage_has_space);
        if self.last_route != Some(route) {
            tracing::info!(?link, ?route, "frame routing changed");
            self.last_route = Some(route);
        }
        route
    }

    async fn stream_frame(&mut self, frame: &EncodedFrame, payload_size: usize) {
        self.state.frames_streamed.fetch_add(1, Ordering::Relaxed);

        for packet in self.packetizer.fragments(frame.as_bytes(), payload_size) {
            if !self.link.state().is_subscribed() || self.link.epoch() != self.seen_epoch {
                tracing::debug!(
                    packet_id = packet.packet_id,
                    "link changed mid-frame, abandoning remaining fragments"
                );
                break;
            }

            match self.notifier.send(&packet).await {
                SendOutcome::Sent { .. } => {
                    self.state.packets_sent.fetch_add(1, Ordering::Relaxed);
                }
                SendOutcome::Dropped { attempts } => {
                    self.state.packets_dropped.fetch_add(1, Ordering::Relaxed);
                    emit(
                        self.event_callback.as_ref(),
                        PipelineEvent::PacketDropped {
                            packet_id: packet.packet_id,
                            sub_index: packet.sub_index,
                            attempts,
                        },
                    );
                }
                SendOutcome::Fatal => {
                    self.state.notify_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        packet_id = packet.packet_id,
                        sub_index = packet.sub_index,
                        "notify failed, abandoning frame"
                    );
                    emit(
                        self.event_callback.as_ref(),
                        PipelineEvent::NotifyFailed {
                            packet_id: packet.packet_id,
                        },
                    );
                    break;
                }
            }
        }
    }

    async fn store_frame(&mut self, frame: &EncodedFrame) {
        let Some(storage) = self.storage.as_mut() else {
            self.note_discarded(1, DiscardReason::StorageUnavailable);
            return;
        };
        if storage.append(frame.as_bytes()).await {
            self.state.frames_stored.fetch_add(1, Ordering::Relaxed);
            self.state
                .storage_write_offset
                .store(storage.write_offset(), Ordering::Relaxed);
            tracing::trace!(len = frame.len(), "frame stored");
        } else {
            self.note_discarded(1, DiscardReason::StorageUnavailable);
        }
    }

    fn discard_all(&mut self, reason: DiscardReason) -> usize {
        let frames = self.queue.clear();
        if frames > 0 {
            self.note_discarded(frames, reason);
        }
        frames
    }

    fn note_discarded(&self, frames: usize, reason: DiscardReason) {
        self.state
            .frames_discarded
            .fetch_add(frames as u64, Ordering::Relaxed);
        tracing::trace!(frames, ?reason, "frames discarded");
        emit(
            self.event_callback.as_ref(),
            PipelineEvent::QueueDiscarded { frames, reason },
        );
    }

    fn maybe_log_stats(&mut self) {
        if self.stats.started.elapsed() >= self.stats_interval {
            self.log_stats();
        }
    }

    fn log_stats(&mut self) {
        let now = self.state.snapshot();
        let last = &self.stats.last;
        tracing::debug!(
            frames_streamed = now.frames_streamed - last.frames_streamed,
            packets_sent = now.packets_sent - last.packets_sent,
            packets_dropped = now.packets_dropped - last.packets_dropped,
            frames_stored = now.frames_stored - last.frames_stored,
            frames_discarded = now.frames_discarded - last.frames_discarded,
            queued = self.queue.len(),
            elapsed_ms = self.stats.started.elapsed().as_millis() as u64,
            "audio streaming stats"
        );
        self.stats = StatsWindow {
            started: Instant::now(),
            last: now,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{NotifyChannel, NotifyResult, Packet};
    use crate::storage::{unpack_block, MemoryBlockStore};
    use crate::UnsubscribedPolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU16;

    struct RecordingChannel {
        payload_size: AtomicU16,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingChannel {
        fn new(payload_size: u16) -> Arc<Self> {
            Arc::new(Self {
                payload_size: AtomicU16::new(payload_size),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotifyChannel for RecordingChannel {
        fn is_link_ready(&self) -> bool {
            true
        }

        fn negotiated_payload_size(&self) -> u16 {
            self.payload_size.load(Ordering::SeqCst)
        }

        async fn notify(&self, data: &[u8]) -> NotifyResult {
            self.sent.lock().push(data.to_vec());
            NotifyResult::Ok
        }
    }

    struct Harness {
        worker: TransportWorker,
        queue: Arc<FrameQueue>,
        link: Arc<LinkMonitor>,
        channel: Arc<RecordingChannel>,
        store: MemoryBlockStore,
    }

    async fn harness(config: PipelineConfig, payload_size: u16) -> Harness {
        let queue = Arc::new(FrameQueue::new(config.queue_slots, config.max_frame_bytes));
        let link = Arc::new(LinkMonitor::new());
        let channel = RecordingChannel::new(payload_size);
        let store = MemoryBlockStore::new();
        let storage = StorageSink::mount(
            Arc::new(store.clone()),
            config.max_block_bytes,
            config.storage_ceiling_bytes,
            1,
        )
        .await
        .unwrap();
        let notifier = Notifier::new(channel.clone(), 2, Duration::from_millis(1));
        let worker = TransportWorker::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&link),
            notifier,
            Some(storage),
            Arc::new(SessionState::new()),
            None,
        );
        Harness {
            worker,
            queue,
            link,
            channel,
            store,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_frame_bytes: 40,
            max_block_bytes: 20,
            burst_frames: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_burst_limit_per_cycle() {
        let mut h = harness(config(), 247).await;
        h.link.on_subscribed();
        h.worker.run_cycle().await;
        for i in 0..5u8 {
            h.queue.push(&[i; 4]);
        }

        assert_eq!(h.worker.run_cycle().await, 2);
        assert_eq!(h.channel.sent.lock().len(), 2);
        assert_eq!(h.queue.len(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_resets_queue_and_ids() {
        let mut h = harness(config(), 247).await;
        h.link.on_subscribed();
        h.worker.run_cycle().await;
        h.queue.push(&[1; 4]);
        h.worker.run_cycle().await;

        h.link.on_unsubscribed();
        h.link.on_subscribed();
        h.queue.push(&[2; 4]);
        assert_eq!(h.worker.run_cycle().await, 0);
        assert!(h.queue.is_empty());

        h.queue.push(&[3; 4]);
        h.worker.run_cycle().await;
        let sent = h.channel.sent.lock();
        let last = Packet::decode(sent.last().unwrap()).unwrap();
        assert_eq!(last.packet_id, 0);
        assert_eq!(last.payload, &[3; 4]);
    }

    #[tokio::test]
    async fn test_small_payload_discards_without_notify() {
        let mut h = harness(config(), 50).await;
        h.link.on_subscribed();
        h.worker.run_cycle().await;
        for _ in 0..4 {
            h.queue.push(&[0; 4]);
        }

        assert_eq!(h.worker.run_cycle().await, 4);
        assert!(h.queue.is_empty());
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_stores_frames() {
        let mut h = harness(config(), 247).await;
        h.queue.push(&[5; 9]);
        h.queue.push(&[6; 9]);

        assert_eq!(h.worker.run_cycle().await, 2);
        assert_eq!(h.store.block_count(), 1);
        assert_eq!(
            unpack_block(&h.store.blocks()[0]),
            vec![&[5u8; 9][..], &[6u8; 9][..]]
        );
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribed_store_policy() {
        let config = PipelineConfig {
            unsubscribed_policy: UnsubscribedPolicy::Store,
            ..config()
        };
        let mut h = harness(config, 247).await;
        h.link.on_connected();
        h.queue.push(&[1; 3]);
        h.worker.run_cycle().await;
        h.worker.drain().await;

        assert_eq!(h.store.block_count(), 1);
        assert!(h.channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_drain_flushes_partial_block() {
        let mut h = harness(config(), 247).await;
        h.queue.push(&[7; 3]);
        h.queue.push(&[8; 3]);
        h.queue.push(&[9; 3]);

        h.worker.drain().await;
        assert!(h.queue.is_empty());
        let blocks = h.store.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(unpack_block(&blocks[0]).len(), 3);
        assert_eq!(h.store.persisted_offset(), 20);
    }

    struct DisconnectAfter {
        link: Arc<LinkMonitor>,
        after: usize,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl NotifyChannel for DisconnectAfter {
        fn is_link_ready(&self) -> bool {
            self.link.state().is_subscribed()
        }

        fn negotiated_payload_size(&self) -> u16 {
            11
        }

        async fn notify(&self, data: &[u8]) -> NotifyResult {
            let mut sent = self.sent.lock();
            sent.push(data.to_vec());
            if sent.len() == self.after {
                self.link.on_disconnected();
            }
            NotifyResult::Ok
        }
    }

    #[tokio::test]
    async fn test_link_drop_mid_frame_abandons_rest() {
        let config = PipelineConfig {
            minimal_packet_size: 10,
            burst_frames: 8,
            ..config()
        };
        let queue = Arc::new(FrameQueue::new(config.queue_slots, config.max_frame_bytes));
        let link = Arc::new(LinkMonitor::new());
        let channel = Arc::new(DisconnectAfter {
            link: Arc::clone(&link),
            after: 2,
            sent: Mutex::new(Vec::new()),
        });
        let state = Arc::new(SessionState::new());
        let notifier = Notifier::new(channel.clone(), 1, Duration::ZERO);
        let mut worker = TransportWorker::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&link),
            notifier,
            None,
            Arc::clone(&state),
            None,
        );

        link.on_subscribed();
        worker.run_cycle().await;
        for i in 0..5u8 {
            queue.push(&[i; 40]);
        }

        // 40 bytes at 8 per packet is 5 fragments; only 2 go out
        assert_eq!(worker.run_cycle().await, 1);
        assert_eq!(channel.sent.lock().len(), 2);
        assert_eq!(queue.len(), 4);

        worker.run_cycle().await;
        assert!(queue.is_empty());
        assert_eq!(channel.sent.lock().len(), 2);
        assert_eq!(state.frames_streamed.load(Ordering::Relaxed), 1);
        assert_eq!(state.frames_discarded.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_link_drop_mid_frame_moves_to_storage() {
        let config = PipelineConfig {
            minimal_packet_size: 10,
            burst_frames: 8,
            max_block_bytes: 41,
            ..config()
        };
        let queue = Arc::new(FrameQueue::new(config.queue_slots, config.max_frame_bytes));
        let link = Arc::new(LinkMonitor::new());
        let channel = Arc::new(DisconnectAfter {
            link: Arc::clone(&link),
            after: 2,
            sent: Mutex::new(Vec::new()),
        });
        let store = MemoryBlockStore::new();
        let storage = StorageSink::mount(Arc::new(store.clone()), 41, u32::MAX, 1)
            .await
            .unwrap();
        let state = Arc::new(SessionState::new());
        let mut worker = TransportWorker::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&link),
            Notifier::new(channel.clone(), 1, Duration::ZERO),
            Some(storage),
            Arc::clone(&state),
            None,
        );

        link.on_connected();
        link.on_subscribed();
        worker.run_cycle().await;
        for i in 0..5u8 {
            queue.push(&[i; 40]);
        }

        worker.run_cycle().await;
        assert_eq!(channel.sent.lock().len(), 2);
        assert_eq!(link.state(), LinkState::Disconnected);

        // Next cycle resets the session, later frames go to storage
        worker.run_cycle().await;
        assert!(queue.is_empty());
        queue.push(&[0xA0; 40]);
        queue.push(&[0xA1; 40]);
        worker.run_cycle().await;

        assert_eq!(channel.sent.lock().len(), 2);
        let blocks = store.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(unpack_block(&blocks[0]), vec![&[0xA0u8; 40][..]]);
        assert_eq!(unpack_block(&blocks[1]), vec![&[0xA1u8; 40][..]]);
        assert_eq!(state.frames_stored.load(Ordering::Relaxed), 2);
    }
}
