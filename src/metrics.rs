//! Quality-of-experience accounting for the receive and playback paths.
//!
//! Stalls and drops are expected, measured conditions - they are recorded
//! here, never raised as errors. The recorder is shared between the receive
//! task (chunk/frame counters, EOS flag) and the playback task (drops,
//! stall time), so everything is atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point-in-time QoE snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QoeMetrics {
    /// Data chunks seen by the receive path (the end-of-stream sentinel is
    /// not counted).
    pub received_chunks_total: u64,
    /// Frames fully reassembled and handed to the playback buffer.
    pub frames_reassembled_total: u64,
    /// Display cycles that ended without a frame to show.
    pub dropped_frames: u64,
    /// Cumulative time playback spent waiting past the grace window.
    pub stall_time_seconds: f64,
    /// Whether the end-of-stream sentinel has been observed.
    pub eos_received: bool,
}

/// Shared QoE recorder; cheap to clone snapshots from at any time.
#[derive(Debug, Default)]
pub struct QoeRecorder {
    received_chunks: AtomicU64,
    frames_reassembled: AtomicU64,
    dropped_frames: AtomicU64,
    stall_micros: AtomicU64,
    eos: AtomicBool,
}

impl QoeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&self) {
        self.received_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reassembled(&self) {
        self.frames_reassembled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_frame(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_stall(&self, stall: Duration) {
        self.stall_micros.fetch_add(stall.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn mark_eos(&self) {
        self.eos.store(true, Ordering::Release);
    }

    pub fn eos_received(&self) -> bool {
        self.eos.load(Ordering::Acquire)
    }

    /// Read a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> QoeMetrics {
        QoeMetrics {
            received_chunks_total: self.received_chunks.load(Ordering::Relaxed),
            frames_reassembled_total: self.frames_reassembled.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            stall_time_seconds: self.stall_micros.load(Ordering::Relaxed) as f64 / 1e6,
            eos_received: self.eos_received(),
        }
    }
}
