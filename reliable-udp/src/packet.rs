//! Wire-format definitions for data and acknowledgment packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout of both packet variants.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Validating the checksum of a raw datagram and classifying it as an
//!   acknowledgment or a data packet.
//!
//! No I/O happens here, only data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Checksum           |             Length            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              Sequence Number (data packets only)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! An acknowledgment is exactly [`ACK_PACKET_SIZE`] bytes.  A data packet is
//! [`DATA_HEADER_LEN`] bytes plus up to [`MAX_PAYLOAD`] payload bytes; an
//! empty payload marks end-of-stream for that direction.

use thiserror::Error;

/// Byte length of an acknowledgment packet: cksum(2) + len(2) + ackno(4).
pub const ACK_PACKET_SIZE: usize = 8;

/// Byte length of a data packet header: ack header + seqno(4).
pub const DATA_HEADER_LEN: usize = 12;

/// Largest datagram either side will ever produce or accept.
pub const MAX_PACKET_SIZE: usize = 512;

/// Largest payload a single data packet can carry.
pub const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - DATA_HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_CHECKSUM: usize = 0;
const OFF_LEN: usize = 2;
const OFF_ACKNO: usize = 4;
const OFF_SEQNO: usize = 8;

/// A data-carrying packet (possibly an empty EOF marker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Piggy-backed acknowledgment: the highest sequence number the sender
    /// has received contiguously from its peer.
    pub ackno: u32,
    /// Sequence number of this packet; always at least 1.
    pub seqno: u32,
    pub payload: Vec<u8>,
}

impl DataPacket {
    /// Allocate a zeroed packet whose payload buffer can hold [`MAX_PAYLOAD`]
    /// bytes without reallocating.
    pub fn blank() -> Self {
        Self {
            ackno: 0,
            seqno: 0,
            payload: Vec::with_capacity(MAX_PAYLOAD),
        }
    }

    /// `true` for the zero-length end-of-stream marker.
    pub fn is_eof(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total on-wire length (header + payload).
    pub fn wire_len(&self) -> usize {
        DATA_HEADER_LEN + self.payload.len()
    }

    /// Serialise into a newly allocated byte vector.
    ///
    /// Encoding is deterministic, so re-encoding a buffered packet for
    /// retransmission reproduces the original checksum.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(self.payload.len()));
        }
        if self.seqno == 0 {
            return Err(PacketError::MissingSeqno);
        }
        let mut buf = vec![0u8; self.wire_len()];
        buf[OFF_ACKNO..OFF_ACKNO + 4].copy_from_slice(&self.ackno.to_be_bytes());
        buf[OFF_SEQNO..OFF_SEQNO + 4].copy_from_slice(&self.seqno.to_be_bytes());
        buf[DATA_HEADER_LEN..].copy_from_slice(&self.payload);
        Ok(seal(buf))
    }
}

/// A complete protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Header-only cumulative acknowledgment: every sequence number below
    /// `ackno` has been received.
    Ack { ackno: u32 },
    Data(DataPacket),
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            Packet::Ack { ackno } => {
                let mut buf = vec![0u8; ACK_PACKET_SIZE];
                buf[OFF_ACKNO..OFF_ACKNO + 4].copy_from_slice(&ackno.to_be_bytes());
                Ok(seal(buf))
            }
            Packet::Data(data) => data.encode(),
        }
    }

    /// Validate and classify a raw datagram.
    ///
    /// The datagram length is the declared length: exactly
    /// [`ACK_PACKET_SIZE`] bytes is an acknowledgment, at least
    /// [`DATA_HEADER_LEN`] bytes with a non-zero sequence number is data.
    /// Every other shape is rejected.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ACK_PACKET_SIZE {
            return Err(PacketError::TooShort(buf.len()));
        }
        if buf.len() > MAX_PACKET_SIZE {
            return Err(PacketError::TooLong(buf.len()));
        }

        let declared = u16::from_be_bytes([buf[OFF_LEN], buf[OFF_LEN + 1]]) as usize;
        if declared != buf.len() {
            return Err(PacketError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        if !validate(buf) {
            return Err(PacketError::ChecksumFailed);
        }

        let ackno = read_u32(buf, OFF_ACKNO);
        if buf.len() == ACK_PACKET_SIZE {
            return Ok(Packet::Ack { ackno });
        }
        if buf.len() < DATA_HEADER_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }

        let seqno = read_u32(buf, OFF_SEQNO);
        if seqno == 0 {
            return Err(PacketError::MissingSeqno);
        }

        Ok(Packet::Data(DataPacket {
            ackno,
            seqno,
            payload: buf[DATA_HEADER_LEN..].to_vec(),
        }))
    }
}

/// Errors that can arise when building or parsing a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than any packet header")]
    TooShort(usize),
    #[error("datagram of {0} bytes exceeds the maximum packet size")]
    TooLong(usize),
    #[error("length field says {declared} bytes but datagram has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("checksum verification failed")]
    ChecksumFailed,
    #[error("data packet has no sequence number")]
    MissingSeqno,
    #[error("payload of {0} bytes exceeds the maximum payload size")]
    PayloadTooLarge(usize),
}

/// Compute the Internet checksum (RFC 1071) over a serialised packet.
///
/// The checksum field (bytes 0-1) is treated as zero whatever it currently
/// holds, so the same function serves both encoding and verification.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;

    while i + 1 < data.len() {
        if i != OFF_CHECKSUM {
            sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        }
        i += 2;
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// `true` when the checksum stored in `buf` matches its contents.
pub fn validate(buf: &[u8]) -> bool {
    if buf.len() < OFF_CHECKSUM + 2 {
        return false;
    }
    let stored = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
    checksum(buf) == stored
}

/// Fill in the length field, then compute and store the checksum last.
fn seal(mut buf: Vec<u8>) -> Vec<u8> {
    let len = buf.len() as u16;
    buf[OFF_LEN..OFF_LEN + 2].copy_from_slice(&len.to_be_bytes());
    let csum = checksum(&buf);
    buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
    buf
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}
