//! Wire codec for the Go-Back-N datagram format.
//!
//! ```text
//!  0               4               8   9       11      13
//! +---------------+---------------+---+-------+-------+----------------
//! |      seq      |      ack      |flg|  len  | csum  | payload (len bytes)
//! +---------------+---------------+---+-------+-------+----------------
//! ```
//!
//! All integers are big-endian. The checksum covers the payload only and is 0
//! for an empty payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::{internet_checksum, payload_checksum};

/// Maximum payload carried by one packet.
pub const MSS: usize = 1024;

/// Length of the fixed header on the wire.
pub const HEADER_LEN: usize = 13;

/// Receive buffers are over-allocated past `HEADER_LEN + MSS`.
pub const RECV_BUF_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Flag {
    Data = 0,
    /// Acknowledgment, or end of stream when sent by the server.
    AckOrEof = 1,
}

impl TryFrom<u8> for Flag {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Flag::Data),
            1 => Ok(Flag::AckOrEof),
            other => Err(PacketError::UnknownFlag(other)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("malformed packet: {len} bytes, header needs {min}", min = HEADER_LEN)]
    Truncated { len: usize },
    /// Flag byte other than 0 or 1. Stricter than peers that read any
    /// non-1 flag as data; receivers treat it like a truncated packet.
    #[error("malformed packet: unknown flag {0:#04x}")]
    UnknownFlag(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub ack: u32,
    pub flag: Flag,
    /// Payload length as declared by the sender.
    pub data_len: u16,
    pub checksum: u16,
}

/// A decoded datagram.
///
/// `payload` holds the bytes actually present after the header, capped at
/// `data_len`; it may be shorter than declared when the datagram was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl Packet {
    /// Build a packet whose `data_len` and checksum are derived from `payload`.
    pub fn new(seq: u32, ack: u32, flag: Flag, payload: Bytes) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                flag,
                data_len: payload.len() as u16,
                checksum: payload_checksum(&payload),
            },
            payload,
        }
    }

    pub fn data(seq: u32, payload: Bytes) -> Self {
        Self::new(seq, 0, Flag::Data, payload)
    }

    /// The virtual terminal segment: `AckOrEof` with an empty payload.
    pub fn eof(seq: u32) -> Self {
        Self::new(seq, 0, Flag::AckOrEof, Bytes::new())
    }

    /// Cumulative acknowledgment for everything before `next_expected`.
    ///
    /// `seq` mirrors `next_expected - 1` for compatibility with existing
    /// peers; only `ack` is read by the sender.
    pub fn ack(next_expected: u32) -> Self {
        Self::new(
            next_expected.saturating_sub(1),
            next_expected,
            Flag::AckOrEof,
            Bytes::new(),
        )
    }

    /// Session request naming the resource to fetch.
    pub fn request(resource: &str) -> Self {
        Self::new(0, 0, Flag::Data, Bytes::copy_from_slice(resource.as_bytes()))
    }

    pub fn is_eof(&self) -> bool {
        self.header.flag == Flag::AckOrEof && self.payload.is_empty()
    }

    /// Whether the declared `data_len` matches the payload bytes present.
    pub fn length_matches(&self) -> bool {
        self.header.data_len as usize == self.payload.len()
    }

    /// Whether the declared checksum matches the payload. Empty payloads
    /// are never checked.
    pub fn checksum_matches(&self) -> bool {
        self.payload.is_empty() || internet_checksum(&self.payload) == self.header.checksum
    }

    /// Serialize exactly as the header states, so a hand-built header with a
    /// stale checksum or length round-trips onto the wire unchanged.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u32(self.header.seq);
        buf.put_u32(self.header.ack);
        buf.put_u8(self.header.flag as u8);
        buf.put_u16(self.header.data_len);
        buf.put_u16(self.header.checksum);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a datagram. Only the header is validated here; length and
    /// checksum agreement are left to the receiver.
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_LEN {
            return Err(PacketError::Truncated {
                len: datagram.len(),
            });
        }

        let mut buf = datagram;
        let seq = buf.get_u32();
        let ack = buf.get_u32();
        let flag = Flag::try_from(buf.get_u8())?;
        let data_len = buf.get_u16();
        let checksum = buf.get_u16();

        let present = buf.len().min(data_len as usize);
        let payload = Bytes::copy_from_slice(&buf[..present]);

        Ok(Self {
            header: Header {
                seq,
                ack,
                flag,
                data_len,
                checksum,
            },
            payload,
        })
    }
}

/// Encode a packet from its parts.
pub fn encode(seq: u32, ack: u32, flag: Flag, payload: &[u8]) -> Bytes {
    Packet::new(seq, ack, flag, Bytes::copy_from_slice(payload)).encode()
}

/// Decode a datagram into its header fields and payload.
pub fn decode(datagram: &[u8]) -> Result<Packet, PacketError> {
    Packet::decode(datagram)
}
