//! Wire format encoding and decoding.
//!
//! Every message on the link is one envelope with a 10-byte header:
//! ```text
//! ┌────────┬─────────┬──────────┬──────────┐
//! │ Kind   │ Channel │ Seq      │ Length   │
//! │ 1 byte │ 1 byte  │ 4 bytes  │ 4 bytes  │
//! │        │         │ uint32 BE│ uint32 BE│
//! └────────┴─────────┴──────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Pixel data never rides the
//! envelope; frames are referenced by slot index into the shared pool.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::MAX_CHANNELS;
use crate::error::{FramewireError, Result};

/// Header size in bytes (fixed, exactly 10).
pub const HEADER_SIZE: usize = 10;

/// Maximum payload size. Control messages are small; the anc budget plus
/// headroom fits comfortably.
pub const MAX_PAYLOAD_SIZE: u32 = 1_048_576;

/// Sequence number for unsolicited messages (grants and one-way kinds).
pub const UNSOLICITED_SEQ: u32 = 0;

/// Message kinds carried on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgKind {
    /// Client -> peer, JSON: protocol version check.
    Hello = 1,
    /// Peer -> client, JSON: version accepted, adapter ordinal.
    Welcome = 2,
    /// Client -> peer: open a stream on a channel.
    OpenStream = 3,
    /// Peer -> client: open accepted, effective stream parameters.
    OpenAck = 4,
    /// Peer -> client: open rejected, error code.
    OpenNack = 5,
    /// Client -> peer: channel closed, slots may be reclaimed.
    CloseStream = 6,
    /// Peer -> client: one frame slot granted for locking.
    FrameGrant = 7,
    /// Client -> peer: locked slot submitted with its anc blobs.
    SubmitFrame = 8,
    /// Client -> peer: change the frame delay of a channel.
    SetDelay = 9,
    /// Client -> peer: license signature for a stream.
    ProtectionSignature = 10,
    /// Client -> peer: session shutting down.
    Bye = 11,
}

impl MsgKind {
    /// Decodes the kind byte; unknown values return `None`.
    pub fn from_word(word: u8) -> Option<Self> {
        Some(match word {
            1 => Self::Hello,
            2 => Self::Welcome,
            3 => Self::OpenStream,
            4 => Self::OpenAck,
            5 => Self::OpenNack,
            6 => Self::CloseStream,
            7 => Self::FrameGrant,
            8 => Self::SubmitFrame,
            9 => Self::SetDelay,
            10 => Self::ProtectionSignature,
            11 => Self::Bye,
            _ => return None,
        })
    }

    /// True for kinds whose channel byte addresses a stream channel.
    #[inline]
    pub fn is_stream_scoped(self) -> bool {
        !matches!(self, Self::Hello | Self::Welcome | Self::Bye)
    }
}

/// Decoded envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: MsgKind,
    /// Stream channel for stream-scoped kinds, 0 otherwise.
    pub channel: u8,
    /// Request correlation id; `UNSOLICITED_SEQ` for one-way messages.
    pub seq: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    pub fn new(kind: MsgKind, channel: u8, seq: u32, payload_length: u32) -> Self {
        Self {
            kind,
            channel,
            seq,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1] = self.channel;
        buf[2..6].copy_from_slice(&self.seq.to_be_bytes());
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header. Returns `None` when the buffer is too short or
    /// the kind byte is unknown.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: MsgKind::from_word(buf[0])?,
            channel: buf[1],
            seq: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            payload_length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks the payload cap and, for stream-scoped kinds, the channel
    /// range.
    pub fn validate(&self) -> Result<()> {
        if self.payload_length > MAX_PAYLOAD_SIZE {
            return Err(FramewireError::BadSize);
        }
        if self.kind.is_stream_scoped() && self.channel as usize >= MAX_CHANNELS
        {
            return Err(FramewireError::BadParameter);
        }
        Ok(())
    }

    /// True for unsolicited (non-response) messages.
    #[inline]
    pub fn is_unsolicited(&self) -> bool {
        self.seq == UNSOLICITED_SEQ
    }
}

/// One complete message: header plus encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub payload: Bytes,
}

impl Envelope {
    /// Builds an envelope, filling in the payload length.
    pub fn new(kind: MsgKind, channel: u8, seq: u32, payload: Bytes) -> Self {
        Self {
            header: Header::new(kind, channel, seq, payload.len() as u32),
            payload,
        }
    }

    /// Serializes header and payload into one contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parses and validates one encoded envelope.
    ///
    /// # Errors
    ///
    /// `Unspecified` for short buffers, unknown kinds, or a length field
    /// that disagrees with the buffer; the header's own `validate` errors
    /// pass through.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let header =
            Header::decode(&buf).ok_or(FramewireError::Unspecified)?;
        header.validate()?;
        let payload = buf.split_off(HEADER_SIZE);
        if payload.len() != header.payload_length as usize {
            return Err(FramewireError::Unspecified);
        }
        Ok(Self { header, payload })
    }
}
