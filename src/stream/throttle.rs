//! Display stream throttling.

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, interval};

/// Requested delivery rate for a display subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DisplayRate {
    /// Every displayed frame, at the playback rate.
    Native,

    /// Throttled to at most this many frames per second.
    /// A rate at or above the playback rate falls back to Native.
    Max(u32),
}

impl DisplayRate {
    /// Normalize against the playback rate.
    pub fn normalize(self, playback_fps: f64) -> Self {
        match self {
            DisplayRate::Native => DisplayRate::Native,
            DisplayRate::Max(fps) if fps as f64 >= playback_fps => DisplayRate::Native,
            DisplayRate::Max(fps) => DisplayRate::Max(fps),
        }
    }

    /// Throttle interval, or `None` when no throttling is needed.
    pub fn throttle_interval(self, playback_fps: f64) -> Option<Duration> {
        match self.normalize(playback_fps) {
            DisplayRate::Native => None,
            DisplayRate::Max(fps) => Some(Duration::from_secs_f64(1.0 / fps as f64)),
        }
    }
}

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Throttle the stream to emit at most once per interval
    ///
    /// Uses "latest-wins" semantics - if multiple items arrive
    /// during an interval, only the latest is emitted.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
    }
}

impl<S: Stream> Throttle<S> {
    /// Create a new throttled stream
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Delay rather than burst after missed ticks.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { stream, interval, pending: None }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        ready!(this.interval.poll_tick(cx));

        // Drain all available items, keeping only the latest.
        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    *this.pending = Some(item);
                }
                Poll::Ready(None) => {
                    return Poll::Ready(this.pending.take());
                }
                Poll::Pending => {
                    return Poll::Ready(this.pending.take());
                }
            }
        }
    }
}
