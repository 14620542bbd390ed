//! Configuration for the transport and playback layers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Configuration for a GBN sender/receiver pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbnConfig {
    /// Maximum number of in-flight (unacknowledged) packets.
    pub window_size: u16,

    /// Fixed retransmission timeout. No RTT estimation is performed.
    pub retransmit_timeout: Duration,

    /// Maximum datagram size, header included.
    pub max_packet_size: usize,
}

impl Default for GbnConfig {
    fn default() -> Self {
        Self {
            window_size: 32,
            retransmit_timeout: Duration::from_millis(500),
            max_packet_size: 1400,
        }
    }
}

impl GbnConfig {
    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(TransportError::config("window_size must be at least 1"));
        }
        if self.max_packet_size <= crate::stream::chunk::CHUNK_HEADER_SIZE {
            return Err(TransportError::config(format!(
                "max_packet_size {} leaves no room for chunk payload",
                self.max_packet_size
            )));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(TransportError::config("retransmit_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration for the playback scheduler and buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Display cadence in frames per second.
    pub fps: f64,

    /// Playback buffer capacity in assembled frames.
    pub buffer_capacity: usize,

    /// First frame id the scheduler waits for.
    pub start_frame_id: u32,

    /// How many frames behind the playback cursor reassembly entries are
    /// kept before eviction.
    pub eviction_horizon: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { fps: 30.0, buffer_capacity: 120, start_frame_id: 0, eviction_horizon: 10 }
    }
}

impl PlaybackConfig {
    /// Time between display cycles.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    /// Grace window for late frames before a cycle is considered stalled.
    pub fn grace_window(&self) -> Duration {
        self.frame_interval().div_f64(2.0).min(Duration::from_millis(50))
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(TransportError::config(format!("fps {} must be positive", self.fps)));
        }
        if self.buffer_capacity == 0 {
            return Err(TransportError::config("buffer_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Server-side session policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions with no activity for this long are reaped.
    pub idle_timeout: Duration,

    /// How often the reaper sweeps the registry.
    pub reap_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(30), reap_interval: Duration::from_secs(5) }
    }
}
