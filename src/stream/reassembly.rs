//! Out-of-order chunk reassembly into complete frames.
//!
//! Chunks for many frames can be interleaved; each frame accumulates into
//! its own entry and is handed out only once every chunk has arrived.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::chunk::ChunkHeader;

/// Per-frame accumulation state.
struct FrameEntry {
    chunks: HashMap<u16, Bytes>,
    total_chunks: u16,
    received: u16,
    first_arrival: Instant,
}

/// Accumulates chunks per frame until each frame is complete.
#[derive(Default)]
pub struct ReassemblyBuffer {
    frames: HashMap<u32, FrameEntry>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one chunk. Duplicate chunk indices are ignored; the first
    /// arrival for a slot wins. A chunk whose index falls outside its own
    /// declared total is discarded, so completeness only ever counts
    /// in-range slots.
    pub fn add_chunk(&mut self, header: ChunkHeader, body: Bytes) {
        if header.chunk_idx >= header.total_chunks {
            debug!(
                frame_id = header.frame_id,
                chunk_idx = header.chunk_idx,
                total_chunks = header.total_chunks,
                "chunk index out of range, ignored"
            );
            return;
        }
        let entry = self
            .frames
            .entry(header.frame_id)
            .or_insert_with(|| FrameEntry {
                chunks: HashMap::new(),
                total_chunks: 0,
                received: 0,
                first_arrival: Instant::now(),
            });
        entry.total_chunks = entry.total_chunks.max(header.total_chunks);
        match entry.chunks.entry(header.chunk_idx) {
            Entry::Vacant(slot) => {
                slot.insert(body);
                entry.received += 1;
            }
            Entry::Occupied(_) => {
                trace!(
                    frame_id = header.frame_id,
                    chunk_idx = header.chunk_idx,
                    "duplicate chunk ignored"
                );
            }
        }
    }

    /// Whether every chunk of `frame_id` has arrived.
    pub fn is_complete(&self, frame_id: u32) -> bool {
        self.frames
            .get(&frame_id)
            .is_some_and(|e| e.total_chunks > 0 && e.received >= e.total_chunks)
    }

    /// Concatenate and remove a complete frame.
    ///
    /// Returns `None` without consuming anything when the frame is unknown
    /// or still missing chunks.
    pub fn assemble(&mut self, frame_id: u32) -> Option<Bytes> {
        if !self.is_complete(frame_id) {
            return None;
        }
        let entry = self.frames.remove(&frame_id)?;
        let size: usize = entry.chunks.values().map(Bytes::len).sum();
        let mut frame = BytesMut::with_capacity(size);
        for idx in 0..entry.total_chunks {
            frame.extend_from_slice(&entry.chunks[&idx]);
        }
        Some(frame.freeze())
    }

    /// Drop partial state for every frame id below `min_frame_id`.
    pub fn evict_before(&mut self, min_frame_id: u32) {
        self.frames.retain(|id, _| *id >= min_frame_id);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Age of the longest-pending partial frame, if any.
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.frames
            .values()
            .map(|e| e.first_arrival.elapsed())
            .max()
    }
}
