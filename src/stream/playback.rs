//! Fixed-rate playback scheduling over the bounded frame buffer.
//!
//! The scheduler wakes once per frame interval and tries to display the
//! next expected frame. A frame that misses its slot by no more than the
//! grace window is still shown; beyond that the scheduler stalls (the
//! clock keeps its cadence, stall time accrues) until the frame arrives
//! or, with end-of-stream already seen, the slot is abandoned and counted
//! as a drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PlaybackConfig;
use crate::metrics::QoeRecorder;

use super::reassembly::ReassemblyBuffer;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const STALL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A frame handed to subscribers at display time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedFrame {
    pub frame_id: u32,
    pub data: Bytes,
}

/// Bounded store of fully reassembled frames awaiting display.
pub struct PlaybackBuffer {
    frames: HashMap<u32, Bytes>,
    capacity: usize,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { frames: HashMap::new(), capacity }
    }

    /// Insert a frame; returns `false` (frame refused) when full.
    pub fn insert(&mut self, frame_id: u32, data: Bytes) -> bool {
        if self.frames.len() >= self.capacity {
            return false;
        }
        self.frames.insert(frame_id, data);
        true
    }

    pub fn pop(&mut self, frame_id: u32) -> Option<Bytes> {
        self.frames.remove(&frame_id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Drives frame display at the configured rate.
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    playback: Arc<Mutex<PlaybackBuffer>>,
    reassembly: Arc<Mutex<ReassemblyBuffer>>,
    qoe: Arc<QoeRecorder>,
    display_tx: watch::Sender<Option<Arc<DisplayedFrame>>>,
    cancel: CancellationToken,
}

impl PlaybackScheduler {
    pub fn new(
        config: PlaybackConfig,
        playback: Arc<Mutex<PlaybackBuffer>>,
        reassembly: Arc<Mutex<ReassemblyBuffer>>,
        qoe: Arc<QoeRecorder>,
        display_tx: watch::Sender<Option<Arc<DisplayedFrame>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, playback, reassembly, qoe, display_tx, cancel }
    }

    /// Run until cancelled or until end-of-stream has been seen and the
    /// buffer is drained.
    pub async fn run(self) {
        let interval = self.config.frame_interval();
        let grace = self.config.grace_window();
        let mut expected = self.config.start_frame_id;
        let mut next_display = Instant::now() + interval;
        let mut stall_started: Option<Instant> = None;

        info!(
            fps = self.config.fps,
            start_frame_id = expected,
            "playback started"
        );

        'running: loop {
            if self.finished().await {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break 'running,
                _ = sleep_until(next_display) => {}
            }

            let mut frame = self.playback.lock().await.pop(expected);

            // Grace window: brief polling before declaring a stall.
            let grace_deadline = Instant::now() + grace;
            while frame.is_none() && Instant::now() < grace_deadline {
                if self.poll_sleep(POLL_INTERVAL).await.is_none() {
                    break 'running;
                }
                frame = self.playback.lock().await.pop(expected);
            }

            // Stall: wait indefinitely unless end-of-stream means the frame
            // can never arrive.
            if frame.is_none() {
                if stall_started.is_none() {
                    stall_started = Some(Instant::now());
                    debug!(frame_id = expected, "playback stalling");
                }
                loop {
                    if let Some(found) = self.playback.lock().await.pop(expected) {
                        frame = Some(found);
                        break;
                    }
                    if self.qoe.eos_received() {
                        break;
                    }
                    if self.poll_sleep(STALL_POLL_INTERVAL).await.is_none() {
                        break 'running;
                    }
                }
            }

            match frame {
                Some(data) => {
                    if let Some(started) = stall_started.take() {
                        self.qoe.add_stall(started.elapsed());
                    }
                    let displayed = Arc::new(DisplayedFrame { frame_id: expected, data });
                    self.display_tx.send_replace(Some(displayed));
                }
                None => {
                    // One drop per abandoned display slot.
                    self.qoe.record_dropped_frame();
                    debug!(frame_id = expected, "frame dropped");
                }
            }

            expected = expected.wrapping_add(1);
            self.reassembly
                .lock()
                .await
                .evict_before(expected.saturating_sub(self.config.eviction_horizon));
            next_display += interval;
        }

        // Dropping the scheduler's sender ends subscriber streams; watch
        // guarantees the final displayed frame is still observed first.
        info!(next_frame = expected, "playback stopped");
    }

    async fn finished(&self) -> bool {
        self.qoe.eos_received() && self.playback.lock().await.is_empty()
    }

    /// Sleep unless cancelled; `None` means cancelled.
    async fn poll_sleep(&self, duration: Duration) -> Option<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            _ = sleep(duration) => Some(()),
        }
    }
}
