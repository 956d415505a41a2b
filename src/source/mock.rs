//! Mock capture source for testing without a microphone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{BlockDriver, CaptureSource};
use crate::PipelineError;

/// A capture source that plays back synthetic audio.
///
/// Samples are generated up front, then delivered one block per capture
/// period from a dedicated thread, standing in for the microphone driver.
/// The last block is zero padded. When the samples run out the driver is
/// dropped, which ends the capture context.
///
/// By default blocks are delivered as fast as buffers come back. With
/// [`paced`](Self::paced) the source behaves like a hardware clock: one
/// block per period, skipping periods when no buffer is free.
///
/// # Example
///
/// ```
/// use pendant_audio::MockSource;
///
/// let mut mock = MockSource::new(16000);
///
/// // 100ms of silence, then 100ms of a 440Hz tone
/// mock.generate_silence(100);
/// mock.generate_sine(440.0, 100);
///
/// assert_eq!(mock.samples().len(), 3200);
/// ```
pub struct MockSource {
    name: String,
    sample_rate: u32,
    samples: Vec<i16>,
    period: Option<Duration>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MockSource {
    /// Creates an empty mock source at the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            name: "mock".to_string(),
            sample_rate,
            samples: Vec::new(),
            period: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Creates a mock source at the default 16kHz capture rate.
    pub fn wearable() -> Self {
        Self::new(16000)
    }

    /// Delivers one block every `period` instead of as fast as possible.
    #[must_use]
    pub fn paced(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Generates silence for the given duration in milliseconds.
    pub fn generate_silence(&mut self, duration_ms: u64) {
        let num_samples = self.samples_for_duration(duration_ms);
        self.samples.resize(self.samples.len() + num_samples, 0);
    }

    /// Generates a full-scale sine wave at the given frequency.
    pub fn generate_sine(&mut self, frequency: f64, duration_ms: u64) {
        let num_samples = self.samples_for_duration(duration_ms);
        let sample_rate = f64::from(self.sample_rate);

        self.samples.extend((0..num_samples).map(|i| {
            let t = i as f64 / sample_rate;
            ((2.0 * std::f64::consts::PI * frequency * t).sin() * 32767.0) as i16
        }));
    }

    /// Generates deterministic white noise at `amplitude` (0.0 to 1.0).
    pub fn generate_noise(&mut self, duration_ms: u64, amplitude: f64) {
        let num_samples = self.samples_for_duration(duration_ms);
        let amplitude = (amplitude.clamp(0.0, 1.0) * 32767.0) as i32;

        // LCG so runs are reproducible
        let mut seed: u32 = 12345;
        for _ in 0..num_samples {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let random = i32::from((seed >> 16) as u16 as i16);
            self.samples.push((random * amplitude / 32767) as i16);
        }
    }

    /// Adds raw samples directly.
    pub fn add_samples(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    /// The samples queued for playback.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Blocks this source will deliver for a given block size.
    pub fn block_count(&self, samples_per_block: usize) -> usize {
        self.samples.len().div_ceil(samples_per_block.max(1))
    }

    /// Returns the duration of the queued samples.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        (u64::from(self.sample_rate) * duration_ms / 1000) as usize
    }

    fn run(mut driver: BlockDriver, samples: &[i16], period: Option<Duration>, stop: &AtomicBool) {
        let spb = driver.samples_per_block().max(1);
        let mut chunks = samples.chunks(spb);

        while !stop.load(Ordering::Acquire) {
            let block = match period {
                Some(period) => {
                    std::thread::sleep(period);
                    match driver.acquire() {
                        Some(block) => block,
                        None => {
                            tracing::trace!(overruns = driver.overruns(), "mock source overrun");
                            continue;
                        }
                    }
                }
                None => match driver.acquire_blocking() {
                    Some(block) => block,
                    None => break,
                },
            };

            let Some(chunk) = chunks.next() else {
                break;
            };
            let mut block = block;
            block.fill_from(chunk);
            if !driver.submit(block) {
                break;
            }
        }
        tracing::debug!("mock source finished");
    }
}

impl CaptureSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, driver: BlockDriver) -> Result<(), PipelineError> {
        if self.thread.is_some() {
            return Err(PipelineError::SourceStartFailed {
                source_name: self.name.clone(),
                reason: "already started".to_string(),
            });
        }

        let samples = std::mem::take(&mut self.samples);
        let period = self.period;
        let stop = Arc::clone(&self.stop_flag);
        stop.store(false, Ordering::Release);

        let handle = std::thread::Builder::new()
            .name("mock-capture".to_string())
            .spawn(move || Self::run(driver, &samples, period, &stop))
            .map_err(|e| PipelineError::SourceStartFailed {
                source_name: self.name.clone(),
                reason: e.to_string(),
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::BlockPool;

    #[test]
    fn test_mock_source_silence() {
        let mut mock = MockSource::new(16000);
        mock.generate_silence(100);

        assert_eq!(mock.samples().len(), 1600);
        assert!(mock.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_mock_source_sine() {
        let mut mock = MockSource::new(16000);
        mock.generate_sine(440.0, 100);

        assert_eq!(mock.samples().len(), 1600);
        assert!(mock.samples().iter().any(|&s| s > 0));
        assert!(mock.samples().iter().any(|&s| s < 0));
    }

    #[test]
    fn test_mock_source_noise_is_deterministic() {
        let mut a = MockSource::wearable();
        let mut b = MockSource::wearable();
        a.generate_noise(10, 0.5);
        b.generate_noise(10, 0.5);
        assert_eq!(a.samples(), b.samples());
        assert!(a.samples().iter().all(|&s| s.unsigned_abs() <= 16384));
    }

    #[test]
    fn test_mock_source_duration() {
        let mut mock = MockSource::wearable();
        mock.generate_silence(500);
        assert_eq!(mock.duration(), Duration::from_millis(500));
        assert_eq!(mock.block_count(160), 50);
    }

    #[test]
    fn test_mock_source_delivers_padded_blocks() {
        let mut mock = MockSource::new(16000);
        mock.add_samples(&[1, 2, 3, 4, 5]);

        let (driver, mut receiver) = BlockPool::new(2, 4);
        mock.start(driver).unwrap();

        let mut blocks = Vec::new();
        while let Some(block) = receiver.recv_blocking() {
            blocks.push(block.as_slice().to_vec());
            receiver.release(block);
        }
        mock.stop();

        assert_eq!(blocks, vec![vec![1, 2, 3, 4], vec![5, 0, 0, 0]]);
    }

    #[test]
    fn test_mock_source_start_twice_fails() {
        let mut mock = MockSource::new(16000).paced(Duration::from_millis(1));
        mock.generate_silence(10);
        let (driver, _receiver) = BlockPool::new(2, 160);
        mock.start(driver).unwrap();

        let (driver, _receiver2) = BlockPool::new(2, 160);
        assert!(matches!(
            mock.start(driver),
            Err(PipelineError::SourceStartFailed { .. })
        ));
        mock.stop();
    }
}
