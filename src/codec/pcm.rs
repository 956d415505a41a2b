//! Uncompressed 16-bit PCM.

use super::{check_block_len, AudioEncoder};
use crate::config::CODEC_ID_PCM16;
use crate::{CodecError, EncodedFrame, PcmBlock};

/// Copies samples out as little-endian bytes.
#[derive(Debug, Clone)]
pub struct PassThrough16 {
    samples_per_block: usize,
}

impl PassThrough16 {
    /// Creates a pass-through encoder for blocks of `samples_per_block`.
    pub fn new(samples_per_block: usize) -> Self {
        Self { samples_per_block }
    }
}

impl AudioEncoder for PassThrough16 {
    fn codec_id(&self) -> u8 {
        CODEC_ID_PCM16
    }

    fn max_frame_bytes(&self) -> usize {
        self.samples_per_block * 2
    }

    fn encode(&mut self, pcm: &PcmBlock) -> Result<EncodedFrame, CodecError> {
        check_block_len(pcm, self.samples_per_block)?;
        let mut bytes = Vec::with_capacity(self.max_frame_bytes());
        for sample in pcm.as_slice() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(EncodedFrame::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let mut encoder = PassThrough16::new(3);
        let block = PcmBlock::from_samples(vec![0x1234, -1, 0]);
        let frame = encoder.encode(&block).unwrap();
        assert_eq!(frame.as_bytes(), &[0x34, 0x12, 0xFF, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn test_rejects_wrong_block_size() {
        let mut encoder = PassThrough16::new(160);
        let result = encoder.encode(&PcmBlock::zeroed(80));
        assert!(matches!(
            result,
            Err(CodecError::BlockSizeMismatch {
                expected: 160,
                actual: 80
            })
        ));
    }
}
