//! G.711-style µ-law companding.
//!
//! Uses the classic 16-bit segment table: bias `0x84`, eight ascending
//! segment ends, `(segment << 4 | quant) ^ mask` with mask `0xFF` for
//! non-negative samples and `0x7F` for negative ones.

use super::{check_block_len, AudioEncoder};
use crate::config::{CODEC_ID_MULAW16, CODEC_ID_MULAW8};
use crate::{CodecError, EncodedFrame, PcmBlock};

const BIAS: i32 = 0x84;

const SEG_END: [i32; 8] = [0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF, 0x3FFF, 0x7FFF];

const QUANT_MASK: u8 = 0x0F;
const SEG_MASK: u8 = 0x70;
const SEG_SHIFT: u8 = 4;
const SIGN_BIT: u8 = 0x80;

/// Encodes one linear sample to a µ-law byte.
///
/// Magnitudes past the top segment saturate to the maximum code.
///
/// ```
/// use pendant_audio::codec::linear_to_ulaw;
///
/// assert_eq!(linear_to_ulaw(0), 0xFF);
/// assert_eq!(linear_to_ulaw(0x1234), 0xAD);
/// ```
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let pcm = i32::from(sample);
    let (magnitude, mask) = if pcm < 0 {
        (BIAS - pcm, 0x7F)
    } else {
        (pcm + BIAS, 0xFF)
    };

    match SEG_END.iter().position(|&end| magnitude <= end) {
        Some(segment) => {
            let quant = (magnitude >> (segment + 3)) & i32::from(QUANT_MASK);
            (((segment as i32) << 4 | quant) as u8) ^ mask
        }
        None => 0x7F ^ mask,
    }
}

/// Decodes a µ-law byte back to a linear sample.
pub fn ulaw_to_linear(code: u8) -> i16 {
    let code = !code;
    let mut t = (i32::from(code & QUANT_MASK) << 3) + BIAS;
    t <<= (code & SEG_MASK) >> SEG_SHIFT;
    if code & SIGN_BIT != 0 {
        (BIAS - t) as i16
    } else {
        (t - BIAS) as i16
    }
}

/// µ-law encoder keeping every `decimation`-th sample.
#[derive(Debug, Clone)]
pub struct Companding8 {
    samples_per_block: usize,
    decimation: usize,
}

impl Companding8 {
    /// Creates a µ-law encoder.
    ///
    /// # Errors
    ///
    /// Returns a reason string if `decimation` is zero or longer than a block.
    pub fn new(samples_per_block: usize, decimation: usize) -> Result<Self, String> {
        if decimation == 0 || decimation > samples_per_block {
            return Err(format!(
                "decimation {decimation} out of range for {samples_per_block}-sample blocks"
            ));
        }
        Ok(Self {
            samples_per_block,
            decimation,
        })
    }

    /// Sample decimation factor.
    pub fn decimation(&self) -> usize {
        self.decimation
    }
}

impl AudioEncoder for Companding8 {
    fn codec_id(&self) -> u8 {
        if self.decimation == 1 {
            CODEC_ID_MULAW16
        } else {
            CODEC_ID_MULAW8
        }
    }

    fn max_frame_bytes(&self) -> usize {
        self.samples_per_block.div_ceil(self.decimation)
    }

    fn encode(&mut self, pcm: &PcmBlock) -> Result<EncodedFrame, CodecError> {
        check_block_len(pcm, self.samples_per_block)?;
        let bytes = pcm
            .as_slice()
            .iter()
            .step_by(self.decimation)
            .map(|&s| linear_to_ulaw(s))
            .collect();
        Ok(EncodedFrame::new(bytes))
    }
}
