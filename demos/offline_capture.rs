//! Offline capture demo: record to a file-backed store, then stream live.
//!
//! Run with: `RUST_LOG=pendant_audio=debug cargo run --example offline_capture`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pendant_audio::{
    unpack_block, FileBlockStore, MockSource, NotifyChannel, NotifyResult, Packet, Pipeline,
    PipelineConfig, PipelineEvent,
};
use tracing_subscriber::EnvFilter;

/// Stands in for the wireless stack: logs each notification.
struct PrintChannel {
    ready: Arc<AtomicBool>,
    sent: AtomicUsize,
}

#[async_trait]
impl NotifyChannel for PrintChannel {
    fn is_link_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn negotiated_payload_size(&self) -> u16 {
        247
    }

    async fn notify(&self, data: &[u8]) -> NotifyResult {
        if let Ok(packet) = Packet::decode(data) {
            let n = self.sent.fetch_add(1, Ordering::Relaxed);
            if n % 50 == 0 {
                println!(
                    "notify #{n}: id={} sub={} payload={}B",
                    packet.packet_id,
                    packet.sub_index,
                    packet.payload.len()
                );
            }
        }
        NotifyResult::Ok
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pendant.bin");

    let mut source = MockSource::wearable().paced(Duration::from_millis(10));
    source.generate_sine(440.0, 1500);
    source.generate_silence(500);
    source.generate_noise(1500, 0.3);

    let ready = Arc::new(AtomicBool::new(false));
    let session = Pipeline::builder()
        .config(PipelineConfig::default())
        .source(source)
        .notify_channel(PrintChannel {
            ready: Arc::clone(&ready),
            sent: AtomicUsize::new(0),
        })
        .storage(FileBlockStore::new(&path))
        .on_event(|e| match e {
            PipelineEvent::BlockFlushed { .. } => {}
            other => println!("event: {other:?}"),
        })
        .start()
        .await?;

    println!("recording offline for 1.5s");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    println!("peer connected and subscribed");
    ready.store(true, Ordering::SeqCst);
    session.link().on_connected();
    session.link().on_subscribed();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let stats = session.stop().await?;
    println!("{stats:#?}");

    let data = std::fs::read(&path)?;
    let block_bytes = PipelineConfig::default().max_block_bytes;
    let stored: usize = data
        .chunks(block_bytes)
        .map(|block| unpack_block(block).len())
        .sum();
    println!(
        "{} bytes on disk, {} blocks, {stored} frames",
        data.len(),
        data.len() / block_bytes
    );

    Ok(())
}
