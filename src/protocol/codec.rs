use std::fmt::Debug;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::registers::Register;


/// First byte of every frame on the link.
pub const FRAME_START: u8 = 0x02;

/// Frame family (bytes 1..=2) of register data frames.
const DATA_FAMILY: [u8; 2] = [0x00, 0x03];

/// Byte 3 of the indoor unit's reply to a handshake frame.
const HANDSHAKE_REPLY: u8 = 0x80;

/// Byte 3 of the indoor unit's reply to a post-handshake frame.
const POST_HANDSHAKE_REPLY: u8 = 0x82;

/// Offset of the payload length byte. Total frame length is `L + 8`.
const LENGTH_OFFSET: usize = 6;
const LENGTH_OVERHEAD: usize = 8;

/// Size of the receive accumulator.
pub const RX_BUFFER_CAPACITY: usize = 256;

/// Maximum number of bytes consumed per [`FrameReceiver::receive`] call.
pub const RX_BATCH: usize = 32;

/// A partial frame is discarded once the link has been quiet for longer than this.
pub const RX_TIMEOUT: Duration = Duration::from_millis(200);

/// Longest frame the indoor unit is known to send.
pub const MAX_FRAME_LEN: usize = 30;

/// Everything in a read request up to the command byte.
const READ_PREAMBLE: [u8; 12] = [0x02, 0x00, 0x03, 0x10, 0x00, 0x00, 0x06, 0x01, 0x30, 0x01, 0x00, 0x01];

/// Everything in a write request up to the command byte.
const WRITE_PREAMBLE: [u8; 12] = [0x02, 0x00, 0x03, 0x10, 0x00, 0x00, 0x07, 0x01, 0x30, 0x01, 0x00, 0x02];


pub trait Checksum {
    fn checksum(&mut self) -> u8;
}

/// Two's complement of the byte sum.
impl<'a> Checksum for std::slice::Iter<'a, u8> {
    fn checksum(&mut self) -> u8 {
        self.fold(0u8, |acc, byte| acc.wrapping_add(*byte)).wrapping_neg()
    }
}

/// Checksum a complete frame should end with: covers every byte between the
/// start marker and the checksum itself.
pub fn frame_checksum(frame: &[u8]) -> u8 {
    match frame {
        [_, covered @ .., _] => covered.iter().checksum(),
        _ => 0,
    }
}


/// A fully encoded frame to send to the indoor unit.
#[derive(Clone, PartialEq, Eq)]
pub struct TxFrame(Vec<u8>);

impl TxFrame {
    /// Request the current value of `register`.
    pub fn read(register: Register) -> Self {
        let mut bytes = READ_PREAMBLE.to_vec();
        bytes.push(register.into());

        Self::sealed(bytes)
    }

    /// Command a new `value` for `register`.
    pub fn write(register: Register, value: u8) -> Self {
        let mut bytes = WRITE_PREAMBLE.to_vec();
        bytes.push(register.into());
        bytes.push(value);

        Self::sealed(bytes)
    }

    /// Append the checksum to `bytes`.
    pub fn sealed(mut bytes: Vec<u8>) -> Self {
        let checksum = bytes[1..].iter().checksum();
        bytes.push(checksum);

        Self(bytes)
    }

    /// A literal frame that already carries its checksum.
    pub fn raw(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for TxFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x?}", self.0)
    }
}


/// A complete frame with a data header and a valid checksum.
#[derive(Clone, PartialEq, Eq)]
pub struct DataFrame(Vec<u8>);

impl DataFrame {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for DataFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x?}", self.0)
    }
}


/// A received frame from a port
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RxFrame {
    Data(DataFrame),
    HandshakeReply(Vec<u8>),
    PostHandshakeReply(Vec<u8>),
    Corrupted(FrameError),
}


#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("rx buffer overflow")]
    Overflow,
    #[error("discarded {discarded} rx bytes due to timeout")]
    Timeout {
        discarded: usize
    },
    #[error("message too long ({len} bytes)")]
    TooLong {
        len: usize
    },
    #[error("invalid message header for {frame:02x?}")]
    InvalidHeader {
        frame: Vec<u8>
    },
    #[error("invalid checksum (expected {expected:02x}, actual {actual:02x}) for {frame:02x?}")]
    InvalidChecksum {
        expected: u8,
        actual: u8,
        frame: Vec<u8>
    },
}


/// Sort a complete frame into data, handshake replies or garbage.
fn classify(frame: Vec<u8>) -> RxFrame {
    if frame.len() > MAX_FRAME_LEN {
        return RxFrame::Corrupted(FrameError::TooLong { len: frame.len() });
    }

    if frame.len() < LENGTH_OVERHEAD {
        return RxFrame::Corrupted(FrameError::InvalidHeader { frame });
    }

    if frame[0] != FRAME_START || frame[1..3] != DATA_FAMILY {
        return match frame[3] {
            HANDSHAKE_REPLY => RxFrame::HandshakeReply(frame),
            POST_HANDSHAKE_REPLY => RxFrame::PostHandshakeReply(frame),
            _ => RxFrame::Corrupted(FrameError::InvalidHeader { frame }),
        };
    }

    let expected = frame_checksum(&frame);
    let actual = frame[frame.len() - 1];
    if expected != actual {
        return RxFrame::Corrupted(FrameError::InvalidChecksum { expected, actual, frame });
    }

    RxFrame::Data(DataFrame(frame))
}


/// Accumulates link bytes until the length byte says a frame is complete.
#[derive(Debug)]
pub struct FrameReceiver {
    buffer: Vec<u8>,
    last_rx_time: Option<Instant>,
}

impl FrameReceiver {
    pub fn new() -> Self {
        FrameReceiver {
            buffer: Vec::with_capacity(RX_BUFFER_CAPACITY),
            last_rx_time: None,
        }
    }

    /// Consume up to [`RX_BATCH`] bytes from the front of `bytes`.
    ///
    /// Returns how many bytes were consumed and every frame completed along the way.
    /// A partial frame left over from before a pause is dropped first.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) -> (usize, Vec<RxFrame>) {
        let batch = &bytes[..bytes.len().min(RX_BATCH)];

        let mut frames: Vec<RxFrame> = self.expire(now).map(RxFrame::Corrupted).into_iter().collect();
        frames.extend(batch.iter().filter_map(|byte| self.push(*byte, now)));

        (batch.len(), frames)
    }

    /// Append a single byte, returning the frame it completes (if any).
    pub fn push(&mut self, byte: u8, now: Instant) -> Option<RxFrame> {
        self.buffer.push(byte);
        self.last_rx_time = Some(now);

        if self.buffer.len() >= RX_BUFFER_CAPACITY {
            self.buffer.clear();
            return Some(RxFrame::Corrupted(FrameError::Overflow));
        }

        let len = self.buffer.len();
        if len > LENGTH_OFFSET && usize::from(self.buffer[LENGTH_OFFSET]) + LENGTH_OVERHEAD == len {
            let frame = std::mem::replace(&mut self.buffer, Vec::with_capacity(RX_BUFFER_CAPACITY));
            return Some(classify(frame));
        }

        None
    }

    /// Drop a partial frame once the link has been quiet for longer than [`RX_TIMEOUT`].
    pub fn expire(&mut self, now: Instant) -> Option<FrameError> {
        match self.last_rx_time {
            Some(last) if !self.buffer.is_empty() && now.saturating_duration_since(last) > RX_TIMEOUT => {
                let discarded = self.buffer.len();
                self.buffer.clear();

                Some(FrameError::Timeout { discarded })
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn last_rx_time(&self) -> Option<Instant> {
        self.last_rx_time
    }
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}


/// `tokio_util` codec for tools that want a `Stream` of frames rather than
/// driving a [`FrameReceiver`] by hand.
pub struct ToshibaCodec {
    receiver: FrameReceiver,
}

impl ToshibaCodec {
    pub fn new() -> Self {
        ToshibaCodec {
            receiver: FrameReceiver::new(),
        }
    }
}

impl Default for ToshibaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ToshibaCodec {
    type Item = RxFrame;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let now = Instant::now();

        // stale bytes from before a pause belong to a frame that never finished
        if let Some(err) = self.receiver.expire(now) {
            return Ok(Some(RxFrame::Corrupted(err)));
        }

        while src.has_remaining() {
            if let Some(frame) = self.receiver.push(src.get_u8(), now) {
                return Ok(Some(frame));
            }
        }

        Ok(None)
    }
}

impl Encoder<TxFrame> for ToshibaCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: TxFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(frame.0.len());
        dst.put_slice(&frame.0);

        Ok(())
    }
}
