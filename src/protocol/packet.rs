//! GBN packet framing: a 4-byte header followed by the raw payload.
//!
//! Wire layout (big-endian): `seq: u16, checksum: u16, payload: bytes`.
//! An ACK reuses the same layout with an empty payload; its `seq` field
//! carries the cumulative ack number and its checksum covers that number
//! alone.

use bytes::{BufMut, Bytes, BytesMut};

use super::checksum::{checksum, verify};
use super::seq::Seq;

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: usize = 4;

/// A parsed GBN packet, either a data packet or a cumulative ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence number for data packets; the cumulative ack number for ACKs.
    pub seq: Seq,
    /// Stated checksum from the wire (or computed at construction).
    pub checksum: u16,
    /// Application payload; empty for ACKs.
    pub payload: Bytes,
}

impl Packet {
    /// Build a data packet, computing the checksum over `seq ‖ payload`.
    pub fn data(seq: Seq, payload: Bytes) -> Self {
        let sum = checksum(&checked_region(seq, &payload));
        Self { seq, checksum: sum, payload }
    }

    /// Build a cumulative ACK for `ack`. The checksum covers the ack number
    /// alone, never any payload.
    pub fn ack(ack: Seq) -> Self {
        let sum = checksum(&ack.0.to_be_bytes());
        Self { seq: ack, checksum: sum, payload: Bytes::new() }
    }

    /// Whether this packet carries no payload, i.e. is an ACK.
    pub fn is_ack(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize to wire bytes. Pure concatenation of header and payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16(self.seq.0);
        buf.put_u16(self.checksum);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse wire bytes. Returns `None` when the input is shorter than the
    /// fixed header; checksum validity is the caller's concern.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < HEADER_SIZE {
            return None;
        }
        let seq = Seq(u16::from_be_bytes([raw[0], raw[1]]));
        let sum = u16::from_be_bytes([raw[2], raw[3]]);
        Some(Self { seq, checksum: sum, payload: Bytes::copy_from_slice(&raw[HEADER_SIZE..]) })
    }

    /// Recompute the checksum over the appropriate region (ack number alone
    /// for ACKs, `seq ‖ payload` for data) and compare to the stated value.
    pub fn verify(&self) -> bool {
        if self.is_ack() {
            verify(&self.seq.0.to_be_bytes(), self.checksum)
        } else {
            verify(&checked_region(self.seq, &self.payload), self.checksum)
        }
    }
}

fn checked_region(seq: Seq, payload: &[u8]) -> Vec<u8> {
    let mut region = Vec::with_capacity(2 + payload.len());
    region.extend_from_slice(&seq.0.to_be_bytes());
    region.extend_from_slice(payload);
    region
}
