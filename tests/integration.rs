//! Integration tests for pendant-audio.
//!
//! Everything runs against [`MockSource`], [`MemoryBlockStore`] and a
//! recording [`NotifyChannel`], so no radio or microphone is needed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pendant_audio::link::{Notifier, SendOutcome};
use pendant_audio::{
    unpack_block, CodecSelection, DiscardReason, FrameAssembler, FrameQueue, MemoryBlockStore,
    MockSource, NotifyChannel, NotifyResult, OverflowPolicy, Packet, Packetizer, Pipeline,
    PipelineConfig, PipelineEvent, PipelineState, Session, SessionStats, StorageSink,
    STORAGE_HEADER_BYTES,
};

/// Records every notification; optionally answers from a script first.
struct RecordingChannel {
    ready: AtomicBool,
    payload_size: AtomicU16,
    script: Mutex<VecDeque<NotifyResult>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingChannel {
    fn new(payload_size: u16) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            payload_size: AtomicU16::new(payload_size),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn scripted(payload_size: u16, script: &[NotifyResult]) -> Arc<Self> {
        let channel = Self::new(payload_size);
        channel.script.lock().extend(script.iter().copied());
        channel
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn is_link_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn negotiated_payload_size(&self) -> u16 {
        self.payload_size.load(Ordering::SeqCst)
    }

    async fn notify(&self, data: &[u8]) -> NotifyResult {
        let result = self.script.lock().pop_front().unwrap_or(NotifyResult::Ok);
        if result == NotifyResult::Ok {
            self.sent.lock().push(data.to_vec());
        }
        result
    }
}

/// The builder takes the channel by value; this forwards to a shared one.
struct SharedChannel(Arc<RecordingChannel>);

#[async_trait]
impl NotifyChannel for SharedChannel {
    fn is_link_ready(&self) -> bool {
        self.0.is_link_ready()
    }

    fn negotiated_payload_size(&self) -> u16 {
        self.0.negotiated_payload_size()
    }

    async fn notify(&self, data: &[u8]) -> NotifyResult {
        self.0.notify(data).await
    }
}

fn reassemble(sent: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let mut assembler = FrameAssembler::new();
    let mut frames = Vec::new();
    for bytes in sent {
        let packet = Packet::decode(bytes).unwrap();
        frames.extend(assembler.push(&packet));
    }
    frames.extend(assembler.finish());
    assert_eq!(assembler.broken_frames(), 0);
    frames
}

fn sine_source(blocks: usize) -> MockSource {
    let mut source = MockSource::wearable();
    // 160 samples per block at 16kHz is 10ms
    source.generate_sine(440.0, blocks as u64 * 10);
    source
}

async fn wait_for_encoded(session: &Session, frames: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.stats().frames_encoded + session.stats().encode_failures < frames {
        assert!(
            tokio::time::Instant::now() < deadline,
            "capture stalled at {:?}",
            session.stats()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn accounted(stats: &SessionStats) -> u64 {
    stats.frames_streamed
        + stats.frames_stored
        + stats.frames_discarded
        + stats.frames_evicted
        + stats.frames_dropped_overflow
}

// ============================================================================
// Framing
// ============================================================================

#[test]
fn test_fragmentation_round_trip() {
    let frame: Vec<u8> = (0..500u16).map(|i| (i % 251) as u8).collect();
    let mut packetizer = Packetizer::new();

    let packets: Vec<Vec<u8>> = packetizer
        .fragments(&frame, 241)
        .map(|p| {
            let mut wire = Vec::new();
            p.encode_into(&mut wire);
            wire
        })
        .collect();

    assert_eq!(packets.len(), 3);
    assert_eq!(packets[0].len(), 244);
    assert_eq!(packets[2].len(), 3 + 500 - 2 * 241);
    assert_eq!(reassemble(&packets), vec![frame]);
}

#[test]
fn test_largest_frame_at_smallest_payload_round_trips() {
    // The smallest payload validate() accepts for the default frame bound
    let config = PipelineConfig {
        minimal_packet_size: 5,
        max_frame_bytes: 512,
        ..Default::default()
    };
    assert!(config.validate().is_ok());
    let payload = usize::from(config.minimal_packet_size) - pendant_audio::PACKET_HEADER_BYTES;

    let frame: Vec<u8> = (0..config.max_frame_bytes).map(|i| i as u8).collect();
    let mut packetizer = Packetizer::new();
    let packets: Vec<Vec<u8>> = packetizer
        .fragments(&frame, payload)
        .map(|p| {
            let mut wire = Vec::new();
            p.encode_into(&mut wire);
            wire
        })
        .collect();

    assert_eq!(packets.len(), pendant_audio::MAX_FRAGMENTS);
    assert_eq!(reassemble(&packets), vec![frame]);

    let too_small = PipelineConfig {
        minimal_packet_size: 4,
        ..config
    };
    assert!(too_small.validate().is_err());
}

#[test]
fn test_packet_ids_monotonic_across_frames_and_reset() {
    let mut packetizer = Packetizer::new();
    let mut ids = Vec::new();
    for len in [10usize, 25, 0, 7] {
        let frame = vec![0xAB; len];
        ids.extend(packetizer.fragments(&frame, 10).map(|p| p.packet_id));
    }
    // 1 + 3 + 1 + 1 packets
    assert_eq!(ids, (0..6).collect::<Vec<u16>>());

    packetizer.reset();
    let first = packetizer.fragments(&[1, 2, 3], 10).next().unwrap();
    assert_eq!(first.packet_id, 0);
    assert_eq!(first.sub_index, 0);
}

#[tokio::test]
async fn test_busy_retries_preserve_fragment_order() {
    let channel = RecordingChannel::scripted(
        64,
        &[
            NotifyResult::Busy,
            NotifyResult::Ok,
            NotifyResult::Busy,
            NotifyResult::Busy,
            NotifyResult::Ok,
        ],
    );
    let mut notifier = Notifier::new(channel.clone(), 3, Duration::from_millis(1));
    let mut packetizer = Packetizer::new();
    let frame: Vec<u8> = (0..30).collect();

    let mut outcomes = Vec::new();
    for packet in packetizer.fragments(&frame, 10) {
        outcomes.push(notifier.send(&packet).await);
    }

    assert_eq!(
        outcomes,
        vec![
            SendOutcome::Sent { attempts: 2 },
            SendOutcome::Sent { attempts: 3 },
            SendOutcome::Sent { attempts: 1 },
        ]
    );
    let sub_indices: Vec<u8> = channel.sent().iter().map(|b| b[2]).collect();
    assert_eq!(sub_indices, vec![0, 1, 2]);
    assert_eq!(reassemble(&channel.sent()), vec![frame]);
}

// ============================================================================
// Queue and storage
// ============================================================================

#[test]
fn test_queue_overflow_keeps_newest_whole_frames() {
    let queue = FrameQueue::new(8, 16);
    let mut dropped = 0;
    for i in 0..40u8 {
        let frame = vec![i; 1 + usize::from(i % 16)];
        if queue.push_with_policy(&frame, OverflowPolicy::EvictOldestHalf)
            == pendant_audio::pipeline::PushOutcome::Dropped
        {
            dropped += 1;
        }
        assert!(queue.len() <= 8);
    }
    assert_eq!(dropped, 0);

    let mut last = None;
    while let Some(frame) = queue.pop() {
        let first = frame.as_bytes()[0];
        assert_eq!(frame.len(), 1 + usize::from(first % 16));
        assert!(frame.as_bytes().iter().all(|&b| b == first));
        assert!(last.map_or(true, |l| first > l));
        last = Some(first);
    }
    assert_eq!(last, Some(39));
}

#[tokio::test]
async fn test_storage_packing_is_exact() {
    let store = MemoryBlockStore::new();
    let mut sink = StorageSink::mount(Arc::new(store.clone()), 440, u32::MAX, 1)
        .await
        .unwrap();

    let frames: Vec<Vec<u8>> = (0..25u8).map(|i| vec![i; 40 + usize::from(i)]).collect();
    for frame in &frames {
        assert!(sink.append(frame).await);
    }
    assert!(sink.flush_partial().await);

    let blocks = store.blocks();
    assert!(blocks.iter().all(|b| b.len() == 440));
    let unpacked: Vec<Vec<u8>> = blocks
        .iter()
        .flat_map(|b| unpack_block(b))
        .map(<[u8]>::to_vec)
        .collect();
    assert_eq!(unpacked, frames);

    // No block was flushed while the next entry would still have fitted
    for pair in blocks.windows(2) {
        let used: usize = unpack_block(&pair[0])
            .iter()
            .map(|f| f.len() + STORAGE_HEADER_BYTES)
            .sum();
        let next = unpack_block(&pair[1])[0].len() + STORAGE_HEADER_BYTES;
        assert!(used + next > 440);
    }
    assert_eq!(store.persisted_offset(), sink.write_offset());
    assert_eq!(sink.write_offset() as usize, blocks.len() * 440);
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_subscribed_session_streams_every_frame_once() {
    let channel = RecordingChannel::new(247);
    let session = Pipeline::builder()
        .config(PipelineConfig {
            burst_frames: 8,
            transport_interval: Duration::from_millis(1),
            idle_interval: Duration::from_millis(1),
            ..Default::default()
        })
        .source(sine_source(40).paced(Duration::from_millis(2)))
        .notify_channel(SharedChannel(Arc::clone(&channel)))
        .start()
        .await
        .unwrap();

    channel.ready.store(true, Ordering::SeqCst);
    session.link().on_connected();
    session.link().on_subscribed();

    wait_for_encoded(&session, 40).await;
    let stats = session.stop().await.unwrap();

    let sent = channel.sent();
    assert!(!sent.is_empty());
    assert_eq!(stats.packets_sent, sent.len() as u64);
    assert_eq!(stats.frames_stored, 0);

    let ids: Vec<u16> = sent
        .iter()
        .map(|b| Packet::decode(b).unwrap().packet_id)
        .collect();
    assert_eq!(ids, (0..ids.len() as u16).collect::<Vec<_>>());

    // mu-law at the capture rate: one byte per sample, one packet per frame
    let frames = reassemble(&sent);
    assert_eq!(frames.len() as u64, stats.frames_streamed);
    assert!(frames.iter().all(|f| f.len() == 160));
    assert_eq!(accounted(&stats), stats.frames_encoded);
}

#[tokio::test]
async fn test_disconnected_session_fills_storage() {
    let channel = RecordingChannel::new(247);
    let store = MemoryBlockStore::new();
    let session = Pipeline::builder()
        .config(PipelineConfig {
            codec: CodecSelection::Companding8 { decimation: 2 },
            ..Default::default()
        })
        .source(sine_source(20))
        .notify_channel(SharedChannel(Arc::clone(&channel)))
        .storage(store.clone())
        .start()
        .await
        .unwrap();

    wait_for_encoded(&session, 20).await;
    let stats = session.stop().await.unwrap();

    assert!(channel.sent().is_empty());
    assert_eq!(stats.blocks_captured, 20);
    assert_eq!(stats.frames_stored, 20);
    assert_eq!(accounted(&stats), 20);

    let blocks = store.blocks();
    let frames: Vec<&[u8]> = blocks.iter().flat_map(|b| unpack_block(b)).collect();
    assert_eq!(frames.len(), 20);
    assert!(frames.iter().all(|f| f.len() == 80));
    assert_eq!(stats.storage_write_offset, store.persisted_offset());
}

#[tokio::test]
async fn test_payload_below_minimum_never_notifies() {
    let channel = RecordingChannel::new(50);
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);

    let session = Pipeline::builder()
        .source(sine_source(40).paced(Duration::from_millis(1)))
        .notify_channel(SharedChannel(Arc::clone(&channel)))
        .on_event(move |e| events_clone.lock().push(e))
        .start()
        .await
        .unwrap();

    channel.ready.store(true, Ordering::SeqCst);
    session.link().on_subscribed();

    wait_for_encoded(&session, 40).await;
    let stats = session.stop().await.unwrap();

    assert!(channel.sent().is_empty());
    assert_eq!(stats.frames_streamed, 0);
    assert_eq!(accounted(&stats), stats.frames_encoded);
    assert!(events.lock().iter().any(|e| matches!(
        e,
        PipelineEvent::QueueDiscarded {
            reason: DiscardReason::PayloadTooSmall,
            ..
        }
    )));
}

#[tokio::test]
async fn test_stop_reports_lifecycle_events() {
    let channel = RecordingChannel::new(247);
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = Arc::clone(&events);

    let session = Pipeline::builder()
        .source(sine_source(5))
        .notify_channel(SharedChannel(channel))
        .on_event(move |e| events_clone.lock().push(e))
        .start()
        .await
        .unwrap();

    assert!(session.is_running());
    assert_eq!(session.state(), PipelineState::Capturing);
    assert_eq!(session.codec_id(), pendant_audio::CODEC_ID_MULAW16);
    wait_for_encoded(&session, 5).await;
    session.stop().await.unwrap();

    let states: Vec<PipelineState> = events
        .lock()
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::PipelineStateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PipelineState::Capturing,
            PipelineState::Draining,
            PipelineState::Stopped
        ]
    );
}
