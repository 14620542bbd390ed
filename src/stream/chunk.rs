//! Chunk application header carried inside GBN payloads.
//!
//! Wire layout (big-endian): `frame_id: u32, chunk_idx: u16,
//! total_chunks: u16`, followed by chunk bytes. The end-of-stream sentinel
//! is a header-only chunk with `frame_id = 0xFFFF_FFFF` and
//! `total_chunks = 0xFFFF`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// Size of the chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Frame id reserved for the end-of-stream sentinel.
pub const END_OF_STREAM_FRAME_ID: u32 = 0xFFFF_FFFF;

/// Total-chunks value reserved for the end-of-stream sentinel.
pub const END_OF_STREAM_TOTAL_CHUNKS: u16 = 0xFFFF;

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub frame_id: u32,
    pub chunk_idx: u16,
    pub total_chunks: u16,
}

impl ChunkHeader {
    /// The end-of-stream sentinel header.
    pub fn end_of_stream() -> Self {
        Self {
            frame_id: END_OF_STREAM_FRAME_ID,
            chunk_idx: 0,
            total_chunks: END_OF_STREAM_TOTAL_CHUNKS,
        }
    }

    /// Whether this header is the end-of-stream sentinel.
    pub fn is_end_of_stream(&self) -> bool {
        self.frame_id == END_OF_STREAM_FRAME_ID
            && self.total_chunks == END_OF_STREAM_TOTAL_CHUNKS
    }

    /// Serialize the header followed by `body`.
    pub fn encode_with_body(&self, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + body.len());
        buf.put_u32(self.frame_id);
        buf.put_u16(self.chunk_idx);
        buf.put_u16(self.total_chunks);
        buf.put_slice(body);
        buf.freeze()
    }

    /// Parse a GBN payload into a header and chunk body.
    ///
    /// Returns `None` when the payload is shorter than the header.
    pub fn decode(payload: &Bytes) -> Option<(Self, Bytes)> {
        if payload.len() < CHUNK_HEADER_SIZE {
            return None;
        }
        let header = Self {
            frame_id: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            chunk_idx: u16::from_be_bytes([payload[4], payload[5]]),
            total_chunks: u16::from_be_bytes([payload[6], payload[7]]),
        };
        Some((header, payload.slice(CHUNK_HEADER_SIZE..)))
    }
}

/// Fragment one encoded frame into header-prefixed chunk payloads of at most
/// `max_chunk_bytes` body bytes each.
///
/// An empty frame produces no chunks. Fails when the frame would need more
/// chunks than the 16-bit count field can carry (the all-ones value is
/// reserved for the sentinel).
pub fn split_frame(frame_id: u32, data: &Bytes, max_chunk_bytes: usize) -> Result<Vec<Bytes>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let total = data.len().div_ceil(max_chunk_bytes);
    if total > usize::from(u16::MAX - 1) {
        return Err(TransportError::TooManyChunks { frame_id, chunks: total });
    }
    let total_chunks = total as u16;

    let mut chunks = Vec::with_capacity(total);
    for (idx, start) in (0..data.len()).step_by(max_chunk_bytes).enumerate() {
        let end = (start + max_chunk_bytes).min(data.len());
        let header = ChunkHeader { frame_id, chunk_idx: idx as u16, total_chunks };
        chunks.push(header.encode_with_body(&data[start..end]));
    }
    Ok(chunks)
}

/// The header-only end-of-stream payload.
pub fn end_of_stream_payload() -> Bytes {
    ChunkHeader::end_of_stream().encode_with_body(&[])
}
