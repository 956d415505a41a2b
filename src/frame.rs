//! PCM blocks and encoded frames.

/// A fixed-length buffer of mono 16-bit samples.
///
/// Blocks are allocated once per [`BlockPool`](crate::BlockPool) and then
/// travel by value between the capture driver and the capture context, so
/// only one side can ever write a given buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBlock {
    samples: Box<[i16]>,
}

impl PcmBlock {
    /// Creates a zeroed block of `samples_per_block` samples.
    pub fn zeroed(samples_per_block: usize) -> Self {
        Self {
            samples: vec![0i16; samples_per_block].into_boxed_slice(),
        }
    }

    /// Creates a block holding exactly the given samples.
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// Number of samples in the block.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Read access to the samples.
    pub fn as_slice(&self) -> &[i16] {
        &self.samples
    }

    /// Write access to the samples, used by capture drivers.
    pub fn as_mut_slice(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// Copies `src` into the front of the block and zeroes the rest.
    ///
    /// Extra samples beyond the block length are ignored. Returns the number
    /// of samples copied.
    pub fn fill_from(&mut self, src: &[i16]) -> usize {
        let n = src.len().min(self.samples.len());
        self.samples[..n].copy_from_slice(&src[..n]);
        self.samples[n..].fill(0);
        n
    }
}

/// The codec's compressed representation of one [`PcmBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedFrame {
    bytes: Vec<u8>,
}

impl EncodedFrame {
    /// Wraps already-encoded bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Length of the frame in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the codec produced no output.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the frame, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for EncodedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for EncodedFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
