//! Pipeline session management.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::emit;
use crate::link::LinkMonitor;
use crate::pipeline::{FrameQueue, TransportCommand};
use crate::source::CaptureSource;
use crate::{EventCallback, PipelineError, PipelineEvent};

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Not running. Both before start and after stop.
    Stopped,
    /// Capture and transport contexts are running.
    Capturing,
    /// Capture has stopped; transport is flushing what is left.
    Draining,
}

impl PipelineState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Capturing => 1,
            Self::Draining => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Capturing,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// PCM blocks received from the capture source.
    pub blocks_captured: u64,
    /// Blocks successfully encoded.
    pub frames_encoded: u64,
    /// Blocks dropped because the codec failed.
    pub encode_failures: u64,
    /// Capture periods the driver skipped for lack of a free buffer.
    pub capture_overruns: u64,
    /// Queued frames evicted to make room for newer ones.
    pub frames_evicted: u64,
    /// Frames dropped because the queue stayed full.
    pub frames_dropped_overflow: u64,
    /// Frames handed to the packetizer.
    pub frames_streamed: u64,
    /// Packets the wireless stack accepted.
    pub packets_sent: u64,
    /// Packets abandoned after the link stayed busy.
    pub packets_dropped: u64,
    /// Hard notification failures.
    pub notify_failures: u64,
    /// Frames appended to storage.
    pub frames_stored: u64,
    /// Frames drained without delivery.
    pub frames_discarded: u64,
    /// Storage write offset after the last flush.
    pub storage_write_offset: u32,
}

/// Counters and lifecycle shared between the session and its contexts.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pipeline_state: AtomicU8,
    pub blocks_captured: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub encode_failures: AtomicU64,
    pub capture_overruns: AtomicU64,
    pub frames_evicted: AtomicU64,
    pub frames_dropped_overflow: AtomicU64,
    pub frames_streamed: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub notify_failures: AtomicU64,
    pub frames_stored: AtomicU64,
    pub frames_discarded: AtomicU64,
    pub storage_write_offset: AtomicU32,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            pipeline_state: AtomicU8::new(PipelineState::Stopped.to_u8()),
            blocks_captured: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            capture_overruns: AtomicU64::new(0),
            frames_evicted: AtomicU64::new(0),
            frames_dropped_overflow: AtomicU64::new(0),
            frames_streamed: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            notify_failures: AtomicU64::new(0),
            frames_stored: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            storage_write_offset: AtomicU32::new(0),
        }
    }

    pub fn pipeline_state(&self) -> PipelineState {
        PipelineState::from_u8(self.pipeline_state.load(Ordering::SeqCst))
    }

    pub fn set_pipeline_state(&self, to: PipelineState, callback: Option<&EventCallback>) {
        let from = PipelineState::from_u8(self.pipeline_state.swap(to.to_u8(), Ordering::SeqCst));
        if from != to {
            tracing::info!(?from, ?to, "pipeline state changed");
            emit(callback, PipelineEvent::PipelineStateChanged { from, to });
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionStats {
            blocks_captured: load(&self.blocks_captured),
            frames_encoded: load(&self.frames_encoded),
            encode_failures: load(&self.encode_failures),
            capture_overruns: load(&self.capture_overruns),
            frames_evicted: load(&self.frames_evicted),
            frames_dropped_overflow: load(&self.frames_dropped_overflow),
            frames_streamed: load(&self.frames_streamed),
            packets_sent: load(&self.packets_sent),
            packets_dropped: load(&self.packets_dropped),
            notify_failures: load(&self.notify_failures),
            frames_stored: load(&self.frames_stored),
            frames_discarded: load(&self.frames_discarded),
            storage_write_offset: self.storage_write_offset.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running pipeline.
///
/// Returned by [`PipelineBuilder::start()`]. Capture and transport run in the
/// background until [`stop()`](Session::stop) is called or the `Session` is
/// dropped.
///
/// # Lifecycle
///
/// 1. Created by [`PipelineBuilder::start()`] in [`PipelineState::Capturing`]
/// 2. Wire the wireless stack's callbacks to [`link()`](Session::link)
/// 3. Call [`stop()`](Session::stop) for graceful shutdown: capture stops
///    first, the transport drains the queue and flushes storage
/// 4. Dropping the `Session` stops capture and signals the transport, but
///    does not wait for the drain. Inside a tokio runtime the source is
///    stopped on the blocking pool, since [`CaptureSource::stop`] may join a
///    driver thread; outside one it is stopped inline
///
/// # Example
///
/// ```no_run
/// # use pendant_audio::{MockSource, Pipeline, NotifyChannel};
/// # async fn run(channel: impl NotifyChannel + 'static) -> Result<(), pendant_audio::PipelineError> {
/// let session = Pipeline::builder()
///     .source(MockSource::wearable())
///     .notify_channel(channel)
///     .start()
///     .await?;
///
/// session.link().on_connected();
/// session.link().on_subscribed();
///
/// tokio::time::sleep(std::time::Duration::from_secs(10)).await;
/// session.stop().await?;
/// # Ok(())
/// # }
/// ```
///
/// [`PipelineBuilder::start()`]: crate::PipelineBuilder::start
pub struct Session {
    state: Arc<SessionState>,
    link: Arc<LinkMonitor>,
    queue: Arc<FrameQueue>,
    codec_id: u8,
    source: Option<Box<dyn CaptureSource>>,
    capture_handle: Option<std::thread::JoinHandle<()>>,
    transport_cmd_tx: mpsc::Sender<TransportCommand>,
    transport_handle: Option<JoinHandle<()>>,
    event_callback: Option<EventCallback>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        state: Arc<SessionState>,
        link: Arc<LinkMonitor>,
        queue: Arc<FrameQueue>,
        codec_id: u8,
        source: Box<dyn CaptureSource>,
        capture_handle: std::thread::JoinHandle<()>,
        transport_cmd_tx: mpsc::Sender<TransportCommand>,
        transport_handle: JoinHandle<()>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            state,
            link,
            queue,
            codec_id,
            source: Some(source),
            capture_handle: Some(capture_handle),
            transport_cmd_tx,
            transport_handle: Some(transport_handle),
            event_callback,
        }
    }

    /// Link state shared with the wireless stack's callbacks.
    pub fn link(&self) -> &Arc<LinkMonitor> {
        &self.link
    }

    /// Numeric identifier of the active codec, as reported to the peer.
    pub fn codec_id(&self) -> u8 {
        self.codec_id
    }

    /// Current orchestrator state.
    pub fn state(&self) -> PipelineState {
        self.state.pipeline_state()
    }

    /// Returns `true` until [`stop()`](Self::stop) begins.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Frames waiting in the queue.
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.state.snapshot()
    }

    /// Gracefully stops the pipeline.
    ///
    /// This will:
    /// 1. Stop the capture source
    /// 2. Wait for the capture context to encode its last block and release
    ///    the codec
    /// 3. Let the transport drain the queue and flush the partial storage block
    /// 4. Wait for the transport to finish
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TaskJoin`] if a context panicked.
    pub async fn stop(mut self) -> Result<SessionStats, PipelineError> {
        self.stop_internal().await?;
        Ok(self.stats())
    }

    async fn stop_internal(&mut self) -> Result<(), PipelineError> {
        if !self.state.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.state
            .set_pipeline_state(PipelineState::Draining, self.event_callback.as_ref());

        // Capture must be down before the transport tears anything down
        let source = self.source.take();
        let capture = self.capture_handle.take();
        let capture_result = tokio::task::spawn_blocking(move || {
            if let Some(mut source) = source {
                source.stop();
            }
            match capture {
                Some(handle) => handle.join().is_ok(),
                None => true,
            }
        })
        .await;

        let _ = self.transport_cmd_tx.send(TransportCommand::Stop).await;
        let transport_result = match self.transport_handle.take() {
            Some(handle) => handle.await.map_err(|e| e.to_string()),
            None => Ok(()),
        };

        self.state
            .set_pipeline_state(PipelineState::Stopped, self.event_callback.as_ref());
        tracing::info!("pipeline stopped");

        match capture_result {
            Ok(true) => {}
            Ok(false) => return Err(PipelineError::TaskJoin("capture thread panicked".into())),
            Err(e) => return Err(PipelineError::TaskJoin(e.to_string())),
        }
        transport_result.map_err(PipelineError::TaskJoin)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            // Dropped without stop(): halt capture, then let the transport drain on its own
            if let Some(mut source) = self.source.take() {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn_blocking(move || source.stop());
                    }
                    Err(_) => source.stop(),
                }
            }
            let _ = self.transport_cmd_tx.try_send(TransportCommand::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert!(!state.running.load(Ordering::SeqCst));
        assert_eq!(state.pipeline_state(), PipelineState::Stopped);
        assert_eq!(state.snapshot(), SessionStats::default());
    }

    #[test]
    fn test_pipeline_state_transitions_emit_once() {
        use parking_lot::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback = crate::event_callback(move |e| seen_clone.lock().push(e));

        let state = SessionState::new();
        state.set_pipeline_state(PipelineState::Capturing, Some(&callback));
        state.set_pipeline_state(PipelineState::Capturing, Some(&callback));
        state.set_pipeline_state(PipelineState::Draining, Some(&callback));

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(state.pipeline_state(), PipelineState::Draining);
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let state = SessionState::new();
        state.packets_sent.fetch_add(3, Ordering::Relaxed);
        state.storage_write_offset.store(880, Ordering::Relaxed);
        let stats = state.snapshot();
        assert_eq!(stats.packets_sent, 3);
        assert_eq!(stats.storage_write_offset, 880);
    }
}
