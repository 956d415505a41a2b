//! Wire packets and frame fragmentation.
//!
//! One notification carries one [`Packet`]:
//!
//! ```text
//! offset 0..1  packet_id   u16 LE, +1 per packet sent
//! offset 2     sub_index   u8, 0-based fragment index within a frame
//! offset 3..   payload     0..P bytes, P = negotiated_payload_size - 3
//! ```

/// Bytes of header in front of every packet payload.
pub const PACKET_HEADER_BYTES: usize = 3;

/// Most fragments one frame may span; `sub_index` is a single byte.
pub const MAX_FRAGMENTS: usize = 256;

/// Errors decoding a packet received from the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Fewer bytes than the packet header.
    #[error("packet of {len} bytes is shorter than the {PACKET_HEADER_BYTES}-byte header")]
    TooShort {
        /// Bytes received.
        len: usize,
    },
}

/// One notification payload, borrowing its data from the frame it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Link-lifetime sequence number.
    pub packet_id: u16,
    /// Fragment index within the originating frame.
    pub sub_index: u8,
    /// Fragment bytes.
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Length on the wire.
    pub fn wire_len(&self) -> usize {
        PACKET_HEADER_BYTES + self.payload.len()
    }

    /// Replaces the contents of `buf` with the wire encoding.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.clear();
        buf.reserve(self.wire_len());
        buf.extend_from_slice(&self.packet_id.to_le_bytes());
        buf.push(self.sub_index);
        buf.extend_from_slice(self.payload);
    }

    /// Parses a packet from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::TooShort`] if `bytes` cannot hold a header.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, PacketError> {
        if bytes.len() < PACKET_HEADER_BYTES {
            return Err(PacketError::TooShort { len: bytes.len() });
        }
        Ok(Self {
            packet_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            sub_index: bytes[2],
            payload: &bytes[PACKET_HEADER_BYTES..],
        })
    }
}

/// Owner of the link-lifetime packet id counter.
///
/// Ids wrap at `u16::MAX`. The transport resets the counter to 0 at the start
/// of each subscribed session.
#[derive(Debug, Default)]
pub struct Packetizer {
    next_id: u16,
}

impl Packetizer {
    /// Creates a packetizer whose first packet id is 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next packet will carry.
    pub fn next_id(&self) -> u16 {
        self.next_id
    }

    /// Restarts the sequence at 0.
    pub fn reset(&mut self) {
        self.next_id = 0;
    }

    /// Splits `frame` into packets of at most `payload_size` payload bytes.
    ///
    /// An empty frame yields one header-only packet so the peer still sees
    /// it. Each yielded packet consumes one id, so abandoning the iterator
    /// part way leaves the remaining fragments' ids unused.
    pub fn fragments<'p, 'f>(
        &'p mut self,
        frame: &'f [u8],
        payload_size: usize,
    ) -> Fragments<'p, 'f> {
        Fragments {
            packetizer: self,
            frame,
            payload_size: payload_size.max(1),
            offset: 0,
            sub_index: 0,
            done: false,
        }
    }

    fn take_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}

/// Iterator over the packets of one frame, in order.
#[derive(Debug)]
pub struct Fragments<'p, 'f> {
    packetizer: &'p mut Packetizer,
    frame: &'f [u8],
    payload_size: usize,
    offset: usize,
    sub_index: u8,
    done: bool,
}

impl Fragments<'_, '_> {
    /// Packets this frame needs in total.
    pub fn total(&self) -> usize {
        self.frame.len().div_ceil(self.payload_size).max(1)
    }
}

impl<'f> Iterator for Fragments<'_, 'f> {
    type Item = Packet<'f>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let frame = self.frame;
        let end = (self.offset + self.payload_size).min(frame.len());
        let payload = &frame[self.offset..end];
        let packet = Packet {
            packet_id: self.packetizer.take_id(),
            sub_index: self.sub_index,
            payload,
        };
        self.offset = end;
        self.sub_index = self.sub_index.wrapping_add(1);
        self.done = self.offset >= self.frame.len();
        Some(packet)
    }
}

/// Peer-side reassembly of frames from received packets.
///
/// A frame is complete when the next frame starts (`sub_index` back at 0) or
/// when [`finish`](Self::finish) is called. Fragments that arrive out of
/// order invalidate the frame being assembled.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    current: Option<Vec<u8>>,
    expected_sub_index: u8,
    expected_id: Option<u16>,
    id_gaps: u64,
    broken_frames: u64,
}

impl FrameAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet, returning the previous frame if this packet starts a
    /// new one.
    pub fn push(&mut self, packet: &Packet<'_>) -> Option<Vec<u8>> {
        if let Some(expected) = self.expected_id {
            if packet.packet_id != expected {
                self.id_gaps += 1;
            }
        }
        self.expected_id = Some(packet.packet_id.wrapping_add(1));

        if packet.sub_index == 0 {
            let completed = self.current.take();
            self.current = Some(packet.payload.to_vec());
            self.expected_sub_index = 1;
            return completed;
        }

        match self.current.as_mut() {
            Some(frame) if packet.sub_index == self.expected_sub_index => {
                frame.extend_from_slice(packet.payload);
                self.expected_sub_index = self.expected_sub_index.wrapping_add(1);
            }
            _ => {
                if self.current.take().is_some() {
                    self.broken_frames += 1;
                }
            }
        }
        None
    }

    /// Returns the frame still being assembled, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.expected_sub_index = 0;
        self.current.take()
    }

    /// Times a packet id did not follow its predecessor.
    pub fn id_gaps(&self) -> u64 {
        self.id_gaps
    }

    /// Frames discarded because a fragment was missing or reordered.
    pub fn broken_frames(&self) -> u64 {
        self.broken_frames
    }
}
