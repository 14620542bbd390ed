//! Simulated packet loss for testing the retransmission machinery.
//!
//! A useful strategy for testing ARQ code is to induce artificial loss and
//! watch the sender recover. The model here combines two independent
//! mechanisms: a uniform random drop and a periodic bursty window. It is
//! stateless with respect to packet content and only looks at the clock.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Loss model configuration.
///
/// The all-zero default delivers every packet, i.e. an ideal network.
/// Rates outside `0.0..=1.0` are clamped at construction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LossConfig {
    /// Chance of any packet being dropped, independent of timing.
    pub random_loss_rate: f64,

    /// Chance of a packet being dropped while inside a burst window.
    pub burst_loss_rate: f64,

    /// Length of each burst window in milliseconds.
    pub burst_duration_ms: u64,

    /// Period between burst window starts in milliseconds.
    pub burst_interval_ms: u64,
}

/// Per-packet delivery decision combining burst and uniform loss.
#[derive(Debug)]
pub struct LossModel {
    config: LossConfig,
    rng: StdRng,
}

impl LossModel {
    /// Build a model seeded from OS entropy.
    pub fn new(config: LossConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Build a model with a fixed seed for deterministic tests.
    pub fn seeded(config: LossConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: LossConfig, rng: StdRng) -> Self {
        config.random_loss_rate = config.random_loss_rate.clamp(0.0, 1.0);
        config.burst_loss_rate = config.burst_loss_rate.clamp(0.0, 1.0);
        Self { config, rng }
    }

    /// Decide whether a packet sent at `now_ms` (wall-clock milliseconds)
    /// is delivered. A packet survives only if neither mechanism drops it.
    pub fn allow(&mut self, now_ms: u64) -> bool {
        // Burst window: the danger zone at the start of each interval.
        if self.config.burst_loss_rate > 0.0 && self.config.burst_interval_ms > 0 {
            let pos = now_ms % self.config.burst_interval_ms;
            if pos < self.config.burst_duration_ms && self.rng.gen_bool(self.config.burst_loss_rate)
            {
                return false;
            }
        }

        if self.config.random_loss_rate > 0.0 && self.rng.gen_bool(self.config.random_loss_rate) {
            return false;
        }

        true
    }

    /// The active configuration (after clamping).
    pub fn config(&self) -> &LossConfig {
        &self.config
    }
}

/// Milliseconds since the Unix epoch, the clock the burst window keys off.
pub fn wall_clock_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
