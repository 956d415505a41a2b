//! Speech-tuned lossy compression.
//!
//! [`PerceptualEncoder`] owns a stateful [`SpeechBackend`] initialized once
//! with bitrate, complexity and signal hint, and feeds it exactly one block
//! per call.

use super::{check_block_len, AudioEncoder};
use crate::config::CODEC_ID_OPUS;
use crate::{CodecError, EncodedFrame, PcmBlock};

/// The library-facing half of the perceptual codec.
pub trait SpeechBackend: Send {
    /// Encodes `pcm` into `out`.
    ///
    /// Returns the number of bytes written, or a negative library error code.
    fn encode_raw(&mut self, pcm: &[i16], out: &mut [u8]) -> i32;
}

/// Frame-at-a-time wrapper around a [`SpeechBackend`].
pub struct PerceptualEncoder<B> {
    backend: B,
    samples_per_block: usize,
    scratch: Vec<u8>,
}

impl<B: SpeechBackend> PerceptualEncoder<B> {
    /// Wraps `backend`, sizing the output scratch to `max_frame_bytes`.
    pub fn new(backend: B, samples_per_block: usize, max_frame_bytes: usize) -> Self {
        Self {
            backend,
            samples_per_block,
            scratch: vec![0u8; max_frame_bytes],
        }
    }
}

impl<B: SpeechBackend> AudioEncoder for PerceptualEncoder<B> {
    fn codec_id(&self) -> u8 {
        CODEC_ID_OPUS
    }

    fn max_frame_bytes(&self) -> usize {
        self.scratch.len()
    }

    fn encode(&mut self, pcm: &PcmBlock) -> Result<EncodedFrame, CodecError> {
        check_block_len(pcm, self.samples_per_block)?;
        let written = self.backend.encode_raw(pcm.as_slice(), &mut self.scratch);
        let Ok(len) = usize::try_from(written) else {
            return Err(CodecError::encode_failed(format!(
                "encoder returned {written}"
            )));
        };
        if len > self.scratch.len() {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.scratch.len(),
            });
        }
        Ok(EncodedFrame::new(self.scratch[..len].to_vec()))
    }
}

/// Opus backend using libopus.
#[cfg(feature = "opus")]
pub struct LibOpusBackend {
    encoder: ::opus::Encoder,
}

#[cfg(feature = "opus")]
impl LibOpusBackend {
    /// Creates a mono Opus encoder.
    ///
    /// The `voice` hint selects the VoIP application profile. The binding
    /// does not expose the complexity control, so `complexity` is only
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CodecInit`](crate::PipelineError::CodecInit)
    /// if libopus rejects the parameters or the block is not a legal Opus
    /// frame duration.
    pub fn new(
        sample_rate: u32,
        samples_per_block: usize,
        bitrate: u32,
        complexity: u8,
        voice: bool,
    ) -> Result<Self, crate::PipelineError> {
        let init_err = |reason: String| crate::PipelineError::CodecInit {
            codec: "opus".to_string(),
            reason,
        };

        // Legal frame durations are multiples of 2.5ms up to 60ms
        let quarter_units = samples_per_block as u64 * 400;
        if quarter_units % u64::from(sample_rate) != 0
            || !matches!(quarter_units / u64::from(sample_rate), 1 | 2 | 4 | 8 | 16 | 24)
        {
            return Err(init_err(format!(
                "{samples_per_block} samples at {sample_rate}Hz is not an Opus frame duration"
            )));
        }

        let application = if voice {
            ::opus::Application::Voip
        } else {
            ::opus::Application::Audio
        };
        let mut encoder = ::opus::Encoder::new(sample_rate, ::opus::Channels::Mono, application)
            .map_err(|e| init_err(e.to_string()))?;
        encoder
            .set_bitrate(::opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| init_err(e.to_string()))?;
        encoder.set_vbr(true).map_err(|e| init_err(e.to_string()))?;

        tracing::debug!(bitrate, complexity, voice, "opus encoder created");
        Ok(Self { encoder })
    }
}

#[cfg(feature = "opus")]
impl SpeechBackend for LibOpusBackend {
    fn encode_raw(&mut self, pcm: &[i16], out: &mut [u8]) -> i32 {
        match self.encoder.encode(pcm, out) {
            Ok(len) => i32::try_from(len).unwrap_or(-1),
            Err(e) => {
                tracing::debug!(error = %e, "opus encode failed");
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that emits a fixed-length frame or a scripted error code.
    struct ScriptedBackend {
        results: Vec<i32>,
        calls: usize,
    }

    impl SpeechBackend for ScriptedBackend {
        fn encode_raw(&mut self, pcm: &[i16], out: &mut [u8]) -> i32 {
            let result = self.results[self.calls % self.results.len()];
            self.calls += 1;
            if result > 0 {
                let n = result as usize;
                for (i, byte) in out.iter_mut().take(n).enumerate() {
                    *byte = pcm[i % pcm.len()] as u8;
                }
            }
            result
        }
    }

    #[test]
    fn test_encodes_variable_length_frames() {
        let backend = ScriptedBackend {
            results: vec![40, 12],
            calls: 0,
        };
        let mut encoder = PerceptualEncoder::new(backend, 160, 80);
        let block = PcmBlock::from_samples(vec![5; 160]);

        assert_eq!(encoder.encode(&block).unwrap().len(), 40);
        assert_eq!(encoder.encode(&block).unwrap().len(), 12);
        assert_eq!(encoder.codec_id(), CODEC_ID_OPUS);
    }

    #[test]
    fn test_negative_result_is_encode_failed() {
        let backend = ScriptedBackend {
            results: vec![-3],
            calls: 0,
        };
        let mut encoder = PerceptualEncoder::new(backend, 160, 80);
        let result = encoder.encode(&PcmBlock::zeroed(160));
        assert!(matches!(result, Err(CodecError::EncodeFailed { .. })));
    }

    #[test]
    fn test_oversized_result_is_rejected() {
        let backend = ScriptedBackend {
            results: vec![81],
            calls: 0,
        };
        let mut encoder = PerceptualEncoder::new(backend, 160, 80);
        let result = encoder.encode(&PcmBlock::zeroed(160));
        assert!(matches!(result, Err(CodecError::FrameTooLarge { len: 81, max: 80 })));
    }

    #[test]
    fn test_wrong_block_length() {
        let backend = ScriptedBackend {
            results: vec![10],
            calls: 0,
        };
        let mut encoder = PerceptualEncoder::new(backend, 160, 80);
        assert!(encoder.encode(&PcmBlock::zeroed(10)).is_err());
    }
}
