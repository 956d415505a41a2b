//! Codecs that turn one PCM block into one encoded frame.
//!
//! An [`AudioEncoder`] is a pure transform with its own internal state and
//! nothing shared with the rest of the pipeline. The crate provides three:
//!
//! - [`PassThrough16`]: Little-endian PCM, 2 bytes per sample
//! - [`Companding8`]: G.711-style µ-law with optional decimation
//! - [`PerceptualEncoder`]: Speech-tuned lossy compression over a
//!   [`SpeechBackend`] (Opus with the `opus` feature)
//!
//! Exactly one is active per session, chosen by
//! [`CodecSelection`](crate::CodecSelection) through [`build_encoder`].

mod mulaw;
mod pcm;
mod perceptual;

pub use mulaw::{linear_to_ulaw, ulaw_to_linear, Companding8};
#[cfg(feature = "opus")]
pub use perceptual::LibOpusBackend;
pub use perceptual::{PerceptualEncoder, SpeechBackend};
pub use pcm::PassThrough16;

use crate::{CodecError, CodecSelection, EncodedFrame, PcmBlock, PipelineConfig, PipelineError};

/// Compresses one fixed-size PCM block per call.
///
/// Implementations must respect [`max_frame_bytes`](Self::max_frame_bytes)
/// for every block so that downstream buffers can be sized up front.
pub trait AudioEncoder: Send {
    /// Identifier reported to the peer.
    fn codec_id(&self) -> u8;

    /// Upper bound on the length of any frame this encoder produces.
    fn max_frame_bytes(&self) -> usize;

    /// Encodes one block.
    ///
    /// Errors cost exactly this block; the caller logs and drops it.
    fn encode(&mut self, pcm: &PcmBlock) -> Result<EncodedFrame, CodecError>;
}

/// Checks a block against the length the encoder was built for.
pub(crate) fn check_block_len(pcm: &PcmBlock, expected: usize) -> Result<(), CodecError> {
    if pcm.len() == expected {
        Ok(())
    } else {
        Err(CodecError::BlockSizeMismatch {
            expected,
            actual: pcm.len(),
        })
    }
}

/// Builds the encoder selected by `config.codec`.
///
/// # Errors
///
/// Returns [`PipelineError::CodecInit`] if the codec cannot be created or if
/// its worst-case frame does not fit `config.max_frame_bytes`.
pub fn build_encoder(config: &PipelineConfig) -> Result<Box<dyn AudioEncoder>, PipelineError> {
    let samples = config.samples_per_block;
    let encoder: Box<dyn AudioEncoder> = match config.codec {
        CodecSelection::PassThrough16 => Box::new(PassThrough16::new(samples)),
        CodecSelection::Companding8 { decimation } => {
            Box::new(Companding8::new(samples, decimation).map_err(|reason| {
                PipelineError::CodecInit {
                    codec: config.codec.name().to_string(),
                    reason,
                }
            })?)
        }
        CodecSelection::Perceptual {
            bitrate,
            complexity,
            voice,
        } => build_perceptual(config, bitrate, complexity, voice)?,
    };

    if encoder.max_frame_bytes() > config.max_frame_bytes {
        return Err(PipelineError::CodecInit {
            codec: config.codec.name().to_string(),
            reason: format!(
                "worst-case frame of {} bytes exceeds max_frame_bytes={}",
                encoder.max_frame_bytes(),
                config.max_frame_bytes
            ),
        });
    }

    tracing::info!(
        codec = config.codec.name(),
        codec_id = encoder.codec_id(),
        samples_per_block = samples,
        max_frame_bytes = encoder.max_frame_bytes(),
        "encoder initialized"
    );
    Ok(encoder)
}

#[cfg(feature = "opus")]
fn build_perceptual(
    config: &PipelineConfig,
    bitrate: u32,
    complexity: u8,
    voice: bool,
) -> Result<Box<dyn AudioEncoder>, PipelineError> {
    let backend = LibOpusBackend::new(
        config.sample_rate,
        config.samples_per_block,
        bitrate,
        complexity,
        voice,
    )?;
    Ok(Box::new(PerceptualEncoder::new(
        backend,
        config.samples_per_block,
        config.max_frame_bytes,
    )))
}

#[cfg(not(feature = "opus"))]
fn build_perceptual(
    config: &PipelineConfig,
    _bitrate: u32,
    _complexity: u8,
    _voice: bool,
) -> Result<Box<dyn AudioEncoder>, PipelineError> {
    Err(PipelineError::CodecInit {
        codec: config.codec.name().to_string(),
        reason: "built without the `opus` feature".to_string(),
    })
}
