//! Builder pattern for `Pipeline`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::build_encoder;
use crate::event::emit;
use crate::link::{LinkMonitor, Notifier, NotifyChannel};
use crate::pipeline::{CaptureWorker, FrameQueue, TransportCommand, TransportWorker};
use crate::session::{PipelineState, Session, SessionState};
use crate::source::{BlockPool, CaptureSource, DEFAULT_POOL_BUFFERS};
use crate::storage::{BlockStore, StorageSink};
use crate::{event_callback, EventCallback, PipelineConfig, PipelineError, PipelineEvent};

/// Channel capacity for transport commands.
/// Only need 1 since commands are rare (just Stop).
const COMMAND_CHANNEL_CAPACITY: usize = 1;

/// Builder for configuring and starting the pipeline.
///
/// Use [`Pipeline::builder()`] to create a new builder.
///
/// # Example
///
/// ```no_run
/// use pendant_audio::{CodecSelection, MemoryBlockStore, MockSource, NotifyChannel, Pipeline, PipelineConfig};
///
/// # async fn run(channel: impl NotifyChannel + 'static) -> Result<(), pendant_audio::PipelineError> {
/// let mut source = MockSource::wearable();
/// source.generate_sine(440.0, 1000);
///
/// let session = Pipeline::builder()
///     .config(PipelineConfig {
///         codec: CodecSelection::Companding8 { decimation: 2 },
///         ..Default::default()
///     })
///     .source(source)
///     .notify_channel(channel)
///     .storage(MemoryBlockStore::new())
///     .on_event(|e| tracing::warn!(?e, "pipeline event"))
///     .start()
///     .await?;
///
/// session.stop().await?;
/// # Ok(())
/// # }
/// ```
///
/// [`Pipeline::builder()`]: crate::Pipeline::builder
#[must_use]
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Box<dyn CaptureSource>>,
    channel: Option<Arc<dyn NotifyChannel>>,
    store: Option<Arc<dyn BlockStore>>,
    event_callback: Option<EventCallback>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            source: None,
            channel: None,
            store: None,
            event_callback: None,
        }
    }

    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the capture source. Required.
    pub fn source<S: CaptureSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Set the wireless notification channel. Required.
    pub fn notify_channel<C: NotifyChannel + 'static>(mut self, channel: C) -> Self {
        self.channel = Some(Arc::new(channel));
        self
    }

    /// Set the storage backing for offline capture.
    ///
    /// Without one, frames that cannot be streamed are discarded.
    pub fn storage<S: BlockStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include queue overflow, dropped packets, link transitions and
    /// storage failures.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(PipelineEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Start capture and transport.
    ///
    /// Returns a [`Session`] handle to control the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - No source or notify channel is configured
    /// - The codec cannot be initialized
    /// - The source fails to start
    ///
    /// A storage mount failure is not an error: the session runs with
    /// storage disabled and a [`PipelineEvent::StorageUnavailable`] event.
    /// The same happens when the codec's largest frame cannot fit one
    /// storage entry.
    pub async fn start(self) -> Result<Session, PipelineError> {
        let Self {
            config,
            source,
            channel,
            store,
            event_callback,
        } = self;

        config.validate()?;
        let mut source = source.ok_or(PipelineError::NoCaptureSource)?;
        let channel = channel.ok_or(PipelineError::NoNotifyChannel)?;

        let encoder = build_encoder(&config)?;
        let codec_id = encoder.codec_id();

        let storage = match store {
            Some(store) => {
                Self::mount_storage(
                    &config,
                    encoder.max_frame_bytes(),
                    store,
                    event_callback.as_ref(),
                )
                .await
            }
            None => None,
        };

        let queue = Arc::new(FrameQueue::new(config.queue_slots, config.max_frame_bytes));
        let link = Arc::new(LinkMonitor::with_event_callback(event_callback.clone()));
        let state = Arc::new(SessionState::new());
        if let Some(storage) = storage.as_ref() {
            state
                .storage_write_offset
                .store(storage.write_offset(), Ordering::Relaxed);
        }

        let (driver, receiver) = BlockPool::new(DEFAULT_POOL_BUFFERS, config.samples_per_block);

        let capture_handle = CaptureWorker::new(
            receiver,
            encoder,
            Arc::clone(&queue),
            Arc::clone(&state),
            event_callback.clone(),
        )
        .spawn()?;

        let notifier = Notifier::new(channel, config.notify_attempts, config.notify_backoff);
        let transport = TransportWorker::new(
            &config,
            Arc::clone(&queue),
            Arc::clone(&link),
            notifier,
            storage,
            Arc::clone(&state),
            event_callback.clone(),
        );
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let transport_handle = tokio::spawn(transport.run(cmd_rx));

        state.running.store(true, Ordering::SeqCst);
        state.set_pipeline_state(PipelineState::Capturing, event_callback.as_ref());

        if let Err(e) = source.start(driver) {
            // The driver went down with the failed start, so capture is already ending
            state.running.store(false, Ordering::SeqCst);
            let _ = cmd_tx.send(TransportCommand::Stop).await;
            let _ = transport_handle.await;
            let _ = tokio::task::spawn_blocking(move || capture_handle.join()).await;
            state.set_pipeline_state(PipelineState::Stopped, event_callback.as_ref());
            return Err(e);
        }

        tracing::info!(
            source = source.name(),
            codec = config.codec.name(),
            codec_id,
            queue_slots = config.queue_slots,
            "pipeline started"
        );

        Ok(Session::new(
            state,
            link,
            queue,
            codec_id,
            source,
            capture_handle,
            cmd_tx,
            transport_handle,
            event_callback,
        ))
    }

    async fn mount_storage(
        config: &PipelineConfig,
        frame_bytes: usize,
        store: Arc<dyn BlockStore>,
        callback: Option<&EventCallback>,
    ) -> Option<StorageSink> {
        let max_entry = StorageSink::max_entry_bytes(config.max_block_bytes);
        if frame_bytes > max_entry {
            tracing::warn!(
                store = store.name(),
                codec = config.codec.name(),
                frame_bytes,
                max_entry,
                "codec frames do not fit storage entries, storage unavailable for this session"
            );
            emit(
                callback,
                PipelineEvent::StorageUnavailable {
                    reason: format!(
                        "{} frames of up to {frame_bytes} bytes exceed the {max_entry}-byte storage entry limit",
                        config.codec.name()
                    ),
                },
            );
            return None;
        }

        match StorageSink::mount(
            store,
            config.max_block_bytes,
            config.storage_ceiling_bytes,
            config.offset_persist_every,
        )
        .await
        {
            Ok(sink) => Some(sink.with_event_callback(callback.cloned())),
            Err(e) => {
                tracing::warn!(error = %e, "storage unavailable for this session");
                emit(
                    callback,
                    PipelineEvent::StorageUnavailable {
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }
}

/// Main entry point for pendant-audio.
///
/// Use [`Pipeline::builder()`] to start configuring the pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Creates a new builder for configuring the pipeline.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }
}
