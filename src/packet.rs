//! Wire-format definitions for RELDAT packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (flags, sequence fields, checksums).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], distinguishing
//!   header corruption from payload corruption.
//!
//! No I/O happens here — this is pure data transformation, and it is the
//! only module in the crate that touches raw packet bytes.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//! offset  0: [ Flags            ]  1 byte
//! offset  1: [ Sequence Number  ]  4 bytes
//! offset  5: [ ACK Number       ]  4 bytes
//! offset  9: [ Payload Checksum ] 16 bytes  (MD5 over payload)
//! offset 25: [ Header Checksum  ] 16 bytes  (MD5 over bytes 0..25)
//! offset 41: [ Payload ...      ]  0..=959 bytes
//! ```
//!
//! The payload checksum covers exactly the payload bytes; the header
//! checksum covers everything that precedes it (flags, sequence fields and
//! the payload checksum).  There is no payload-length field: the payload is
//! whatever follows the header in the datagram, so a forged length can
//! never cause an over-read.

use bitflags::bitflags;
use md5::{Digest, Md5};
use thiserror::Error;

/// Total size of a datagram must never exceed this.
pub const MAX_PACKET_SIZE: usize = 1000;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_SIZE: usize = 1 + 4 + 4 + 16 + 16;

/// Largest payload that fits in one packet.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

// Byte offsets of each field within the serialised packet.
const OFF_FLAGS: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_ACK: usize = 5;
const OFF_PAYLOAD_SUM: usize = 9;
const OFF_HEADER_SUM: usize = 25;

bitflags! {
    /// Packet flag bits.  Multiple flags combine freely (e.g. `OPEN | ACK`
    /// for the handshake reply).  Bits 6 and 7 are reserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Connection-open request (handshake).
        const OPEN = 0b0000_0001;
        /// Connection-close request (teardown).
        const CLOSE = 0b0000_0010;
        /// The `ack` field is meaningful.
        const ACK = 0b0000_0100;
        /// The payload has been transmitted before.
        const RETRANSMIT = 0b0000_1000;
        /// The payload carries application data.
        const DATA = 0b0001_0000;
        /// Marks the end of one logical send, distinct from CLOSE.
        const END_OF_DATA = 0b0010_0000;
    }
}

impl std::fmt::Display for Flags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Fixed-size protocol header, in host order.  [`Packet::encode`] converts
/// to big-endian on the wire and [`Packet::decode`] converts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Bitmask of [`Flags`].
    pub flags: Flags,
    /// Sequence number of this packet; one number per packet, wrapping
    /// modulo 2^32.
    pub seq: u32,
    /// Sequence number being acknowledged; meaningful only when
    /// [`Flags::ACK`] is set.
    pub ack: u32,
}

/// A complete RELDAT datagram: header + payload bytes.
///
/// Packets are immutable once constructed.  A retransmission is a fresh
/// copy built by [`Packet::retransmission`], never an in-place edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a packet from its parts.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when `payload` exceeds [`MAX_PAYLOAD_SIZE`];
    /// the packetizer is responsible for slicing payloads to fit.
    pub fn new(flags: Flags, seq: u32, ack: u32, payload: Vec<u8>) -> Self {
        debug_assert!(
            payload.len() <= MAX_PAYLOAD_SIZE,
            "payload of {} bytes exceeds MAX_PAYLOAD_SIZE",
            payload.len()
        );
        Self {
            header: Header { flags, seq, ack },
            payload,
        }
    }

    /// A fresh copy of this packet with [`Flags::RETRANSMIT`] added.
    ///
    /// Re-encoding the copy recomputes both checksums, so the original
    /// bytes are never mutated.
    pub fn retransmission(&self) -> Self {
        Self {
            header: Header {
                flags: self.header.flags | Flags::RETRANSMIT,
                ..self.header
            },
            payload: self.payload.clone(),
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Both checksums are computed here: the payload checksum over the
    /// payload bytes, then the header checksum over the 25 header bytes
    /// that precede it.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE + self.payload.len()];

        buf[OFF_FLAGS] = self.header.flags.bits();
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());

        let payload_sum = Md5::digest(&self.payload);
        buf[OFF_PAYLOAD_SUM..OFF_PAYLOAD_SUM + 16].copy_from_slice(payload_sum.as_slice());

        let header_sum = Md5::digest(&buf[..OFF_HEADER_SUM]);
        buf[OFF_HEADER_SUM..OFF_HEADER_SUM + 16].copy_from_slice(header_sum.as_slice());

        buf[HEADER_SIZE..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// The header checksum is verified first; only a packet whose header
    /// verifies has its payload checksum checked, so the two corruption
    /// kinds stay distinguishable.  The payload length is derived from the
    /// datagram length, never from a field the peer controls.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort);
        }

        let header_sum = Md5::digest(&buf[..OFF_HEADER_SUM]);
        if header_sum.as_slice() != &buf[OFF_HEADER_SUM..OFF_HEADER_SUM + 16] {
            return Err(DecodeError::HeaderCorrupted);
        }

        let payload = &buf[HEADER_SIZE..];
        let payload_sum = Md5::digest(payload);
        if payload_sum.as_slice() != &buf[OFF_PAYLOAD_SUM..OFF_PAYLOAD_SUM + 16] {
            return Err(DecodeError::PayloadCorrupted);
        }

        // Reserved bits are carried through untouched.
        let flags = Flags::from_bits_retain(buf[OFF_FLAGS]);
        let seq = u32::from_be_bytes(buf[OFF_SEQ..OFF_SEQ + 4].try_into().unwrap());
        let ack = u32::from_be_bytes(buf[OFF_ACK..OFF_ACK + 4].try_into().unwrap());

        Ok(Packet {
            header: Header { flags, seq, ack },
            payload: payload.to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
///
/// Both corruption kinds are recoverable: the datagram is discarded without
/// an ACK and the sender's retransmission timer restores delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram shorter than the fixed header.
    #[error("datagram shorter than the {HEADER_SIZE}-byte header")]
    TooShort,
    /// Header checksum mismatch.
    #[error("header checksum mismatch")]
    HeaderCorrupted,
    /// Payload checksum mismatch (header verified).
    #[error("payload checksum mismatch")]
    PayloadCorrupted,
}
