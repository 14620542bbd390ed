//! Go-Back-N sender: sliding window, retransmission timer, cumulative ACKs.
//!
//! One sender instance serves exactly one peer. Three paths touch the window
//! state concurrently - the send path, the ACK task, and the timer task -
//! so everything lives behind a single async mutex. Window capacity is
//! enforced with a semaphore: `send` waits for space (backpressure),
//! `try_send` reports [`TransportError::WindowFull`] instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::GbnConfig;
use crate::error::{Result, TransportError};
use crate::link::DatagramLink;
use crate::loss::{LossModel, wall_clock_ms};
use crate::protocol::{Packet, Seq};

/// Point-in-time snapshot of sender counters.
///
/// All counters are monotone; `elapsed` is wall time since the sender was
/// created. Retransmissions count toward `packets_sent` as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderMetrics {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

struct SenderState {
    send_base: Seq,
    next_seq: Seq,
    /// Encoded packets awaiting acknowledgment, oldest first. Insertion
    /// order is send order, which is ascending modular sequence order.
    unacked: VecDeque<(Seq, Bytes)>,
    /// Bumped on every timer restart or stop; a timer task whose generation
    /// no longer matches must not act.
    timer_generation: u64,
    loss: LossModel,
    packets_sent: u64,
    packets_delivered: u64,
    packets_lost: u64,
    retransmissions: u64,
    timeouts: u64,
}

struct Shared {
    state: Mutex<SenderState>,
    /// One permit per window slot; acquired on send, released on ack.
    window: Semaphore,
    link: Arc<dyn DatagramLink>,
    retransmit_timeout: Duration,
    window_size: u16,
    cancel: CancellationToken,
    started: Instant,
}

/// GBN sliding-window sender over a [`DatagramLink`].
#[derive(Clone)]
pub struct GbnSender {
    shared: Arc<Shared>,
}

impl GbnSender {
    /// Create a sender and spawn its ACK-processing task.
    ///
    /// The task reads the link until it is closed or [`close`](Self::close)
    /// is called, applying cumulative acknowledgments as they arrive.
    pub fn new(link: Arc<dyn DatagramLink>, config: &GbnConfig, loss: LossModel) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(SenderState {
                send_base: Seq(0),
                next_seq: Seq(0),
                unacked: VecDeque::new(),
                timer_generation: 0,
                loss,
                packets_sent: 0,
                packets_delivered: 0,
                packets_lost: 0,
                retransmissions: 0,
                timeouts: 0,
            }),
            window: Semaphore::new(usize::from(config.window_size)),
            link,
            retransmit_timeout: config.retransmit_timeout,
            window_size: config.window_size,
            cancel: CancellationToken::new(),
            started: Instant::now(),
        });

        tokio::spawn(Self::ack_task(Arc::clone(&shared)));

        Self { shared }
    }

    /// Send one payload, waiting for window space if necessary.
    ///
    /// The packet is buffered for retransmission even when the loss model
    /// swallows the first transmission, so a simulated drop is still
    /// recovered by timeout.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let permit = tokio::select! {
            permit = self.shared.window.acquire() => {
                permit.map_err(|_| TransportError::Closed)?
            }
            _ = self.shared.cancel.cancelled() => return Err(TransportError::Closed),
        };
        permit.forget();
        self.transmit(payload).await
    }

    /// Send one payload, or fail with [`TransportError::WindowFull`] when
    /// the window has no space.
    pub async fn try_send(&self, payload: Bytes) -> Result<()> {
        match self.shared.window.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => {
                return Err(TransportError::WindowFull { window_size: self.shared.window_size });
            }
            Err(TryAcquireError::Closed) => return Err(TransportError::Closed),
        }
        self.transmit(payload).await
    }

    async fn transmit(&self, payload: Bytes) -> Result<()> {
        let shared = &self.shared;
        let mut st = shared.state.lock().await;

        let seq = st.next_seq.post_increment();
        let wire = Packet::data(seq, payload).encode();
        let window_was_empty = st.unacked.is_empty();
        st.unacked.push_back((seq, wire.clone()));

        st.packets_sent += 1;
        if st.loss.allow(wall_clock_ms()) {
            st.packets_delivered += 1;
            shared.link.send(&wire).await?;
            trace!(seq = %seq, len = wire.len(), "sent data packet");
        } else {
            st.packets_lost += 1;
            trace!(seq = %seq, "loss model dropped outgoing packet");
        }

        if window_was_empty {
            Self::arm_timer(shared, &mut st);
        }
        Ok(())
    }

    /// Apply a cumulative acknowledgment.
    ///
    /// Removes every unacked entry in `[send_base, ack]` under modular
    /// ordering and advances the window base. Ack numbers outside the
    /// current window are a no-op. Normally driven by the internal ACK
    /// task; public for direct protocol tests.
    pub async fn on_ack(&self, ack: Seq) {
        let shared = &self.shared;
        let mut st = shared.state.lock().await;

        let in_flight = st.next_seq.dist_from(st.send_base);
        let offset = ack.dist_from(st.send_base);
        if offset >= in_flight {
            trace!(ack = %ack, base = %st.send_base, "ack outside window, ignoring");
            return;
        }

        let freed = usize::from(offset) + 1;
        for _ in 0..freed {
            st.unacked.pop_front();
        }
        st.send_base = ack.next();
        trace!(ack = %ack, new_base = %st.send_base, freed, "cumulative ack");

        if st.unacked.is_empty() {
            // Stop the timer: invalidate any task in flight.
            st.timer_generation += 1;
        } else {
            Self::arm_timer(shared, &mut st);
        }
        drop(st);

        shared.window.add_permits(freed);
    }

    /// Restart the retransmission timer. Bumping the generation first makes
    /// the previous timer task a stale no-op, so two timers can never act
    /// for the same sender.
    fn arm_timer(shared: &Arc<Shared>, st: &mut SenderState) {
        st.timer_generation += 1;
        let generation = st.timer_generation;
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            Self::timer_task(shared, generation).await;
        });
    }

    /// One timer lifetime. Loops because go-back-N restarts the timer
    /// unconditionally after every expiry; exits when superseded, stopped,
    /// or cancelled.
    async fn timer_task(shared: Arc<Shared>, generation: u64) {
        loop {
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(shared.retransmit_timeout) => {}
            }

            let mut st = shared.state.lock().await;
            if st.timer_generation != generation {
                return;
            }
            if st.unacked.is_empty() {
                return;
            }

            st.timeouts += 1;
            debug!(
                base = %st.send_base,
                in_flight = st.unacked.len(),
                "retransmission timeout, resending window"
            );

            // Resend the whole window in ascending sequence order, each
            // packet independently subject to the loss model.
            for i in 0..st.unacked.len() {
                let (seq, wire) = st.unacked[i].clone();
                st.packets_sent += 1;
                st.retransmissions += 1;
                if st.loss.allow(wall_clock_ms()) {
                    st.packets_delivered += 1;
                    if let Err(e) = shared.link.send(&wire).await {
                        warn!(seq = %seq, error = %e, "retransmission send failed");
                    }
                } else {
                    st.packets_lost += 1;
                    trace!(seq = %seq, "loss model dropped retransmission");
                }
            }
        }
    }

    /// Reads ACK datagrams off the link until closure or cancellation.
    async fn ack_task(shared: Arc<Shared>) {
        let sender = GbnSender { shared: Arc::clone(&shared) };
        loop {
            let datagram = tokio::select! {
                _ = shared.cancel.cancelled() => break,
                result = shared.link.recv() => match result {
                    Ok(Some(datagram)) => datagram,
                    Ok(None) => {
                        debug!("link closed, ack task exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "ack receive failed");
                        break;
                    }
                },
            };

            let Some(packet) = Packet::decode(&datagram) else {
                trace!(len = datagram.len(), "malformed datagram on ack path, ignoring");
                continue;
            };
            if !packet.is_ack() {
                trace!(seq = %packet.seq, "non-ack datagram on ack path, ignoring");
                continue;
            }
            if !packet.verify() {
                trace!(ack = %packet.seq, "corrupt ack, dropping");
                continue;
            }
            sender.on_ack(packet.seq).await;
        }
        shared.window.close();
    }

    /// Current number of unacknowledged packets, `next_seq − send_base`.
    pub async fn in_flight(&self) -> u16 {
        let st = self.shared.state.lock().await;
        st.next_seq.dist_from(st.send_base)
    }

    /// Snapshot of counters.
    pub async fn metrics(&self) -> SenderMetrics {
        let st = self.shared.state.lock().await;
        SenderMetrics {
            packets_sent: st.packets_sent,
            packets_delivered: st.packets_delivered,
            packets_lost: st.packets_lost,
            retransmissions: st.retransmissions,
            timeouts: st.timeouts,
            elapsed: self.shared.started.elapsed(),
        }
    }

    /// Stop the sender: cancels the ACK and timer tasks and fails any
    /// blocked `send` with [`TransportError::Closed`].
    pub fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.window.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use crate::loss::LossConfig;

    fn ideal_loss() -> LossModel {
        LossModel::seeded(LossConfig::default(), 0)
    }

    fn config(window_size: u16, timeout_ms: u64) -> GbnConfig {
        GbnConfig {
            window_size,
            retransmit_timeout: Duration::from_millis(timeout_ms),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn window_fills_then_rejects_then_accepts_after_ack() {
        let (near, _far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(5, 10_000), ideal_loss());

        for i in 0u8..5 {
            sender.send(Bytes::from(vec![i])).await.unwrap();
        }
        assert_eq!(sender.in_flight().await, 5);

        // Window full: seq 5 is rejected before any ack.
        let err = sender.try_send(Bytes::from_static(b"overflow")).await.unwrap_err();
        assert!(matches!(err, TransportError::WindowFull { window_size: 5 }));

        // Ack seq 0 and the same send is accepted.
        sender.on_ack(Seq(0)).await;
        sender.try_send(Bytes::from_static(b"fits")).await.unwrap();
        assert_eq!(sender.in_flight().await, 5);

        sender.close();
    }

    #[tokio::test]
    async fn cumulative_ack_frees_prefix_only() {
        let (near, _far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(8, 10_000), ideal_loss());

        for i in 0u8..6 {
            sender.send(Bytes::from(vec![i])).await.unwrap();
        }

        sender.on_ack(Seq(3)).await;
        // Entries 0..=3 removed, 4 and 5 remain.
        assert_eq!(sender.in_flight().await, 2);

        // Stale ack is a no-op.
        sender.on_ack(Seq(1)).await;
        assert_eq!(sender.in_flight().await, 2);

        sender.close();
    }

    #[tokio::test]
    async fn out_of_window_ack_is_noop() {
        let (near, _far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(4, 10_000), ideal_loss());

        sender.send(Bytes::from_static(b"a")).await.unwrap();
        sender.on_ack(Seq(9000)).await;
        assert_eq!(sender.in_flight().await, 1);

        sender.close();
    }

    #[tokio::test]
    async fn timeout_resends_whole_window_in_order() {
        let (near, far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(8, 50), ideal_loss());

        for i in 0u8..3 {
            sender.send(Bytes::from(vec![b'a' + i])).await.unwrap();
        }

        // Drain the three originals.
        let mut seqs = Vec::new();
        for _ in 0..3 {
            let raw = far.recv().await.unwrap().unwrap();
            seqs.push(Packet::decode(&raw).unwrap().seq);
        }
        assert_eq!(seqs, vec![Seq(0), Seq(1), Seq(2)]);

        // After a timeout the entire window is resent, oldest first.
        let mut resent = Vec::new();
        for _ in 0..3 {
            let raw = far.recv().await.unwrap().unwrap();
            resent.push(Packet::decode(&raw).unwrap().seq);
        }
        assert_eq!(resent, vec![Seq(0), Seq(1), Seq(2)]);

        let metrics = sender.metrics().await;
        assert!(metrics.timeouts >= 1);
        assert!(metrics.retransmissions >= 3);

        sender.close();
    }

    #[tokio::test]
    async fn total_loss_still_buffers_and_retransmits() {
        let (near, far) = MemoryLink::pair();
        let loss = LossModel::seeded(
            LossConfig { random_loss_rate: 1.0, ..Default::default() },
            7,
        );
        let sender = GbnSender::new(near, &config(4, 20), loss);

        sender.send(Bytes::from_static(b"doomed")).await.unwrap();

        // Nothing ever reaches the wire...
        tokio::time::sleep(Duration::from_millis(150)).await;
        let metrics = sender.metrics().await;
        assert_eq!(metrics.packets_delivered, 0);
        assert_eq!(metrics.packets_lost, metrics.packets_sent);
        // ...but the sender keeps trying, so packets_sent keeps growing.
        assert!(metrics.packets_sent > 3, "sent {} packets", metrics.packets_sent);
        assert!(metrics.timeouts >= 3);

        sender.close();
        drop(far);
    }

    #[tokio::test]
    async fn ack_task_drives_window_from_wire_acks() {
        let (near, far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(2, 10_000), ideal_loss());

        sender.send(Bytes::from_static(b"one")).await.unwrap();
        sender.send(Bytes::from_static(b"two")).await.unwrap();

        // Window is now full; a wire ack for seq 1 must unblock this send.
        far.recv().await.unwrap().unwrap();
        far.recv().await.unwrap().unwrap();
        far.send(&Packet::ack(Seq(1)).encode()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), sender.send(Bytes::from_static(b"three")))
            .await
            .expect("send should unblock after ack")
            .unwrap();

        sender.close();
    }

    #[tokio::test]
    async fn corrupt_ack_is_ignored() {
        let (near, far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(4, 10_000), ideal_loss());

        sender.send(Bytes::from_static(b"x")).await.unwrap();
        far.recv().await.unwrap().unwrap();

        // Flip a bit in a valid ack; the window must not move.
        let mut raw = Packet::ack(Seq(0)).encode().to_vec();
        raw[2] ^= 0x01;
        far.send(&raw).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sender.in_flight().await, 1);

        sender.close();
    }

    #[tokio::test]
    async fn window_bound_holds_across_wraparound() {
        let (near, _far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(4, 10_000), ideal_loss());

        // Walk the window across the 16-bit boundary, acking as we go.
        {
            let mut st = sender.shared.state.lock().await;
            st.send_base = Seq(65534);
            st.next_seq = Seq(65534);
        }
        for i in 0u16..8 {
            sender.send(Bytes::from(vec![i as u8])).await.unwrap();
            assert!(sender.in_flight().await <= 4);
            sender.on_ack(Seq(65534u16.wrapping_add(i))).await;
        }
        let st = sender.shared.state.lock().await;
        assert_eq!(st.send_base, Seq(6));
        drop(st);

        sender.close();
    }

    #[tokio::test]
    async fn closed_sender_rejects_sends() {
        let (near, _far) = MemoryLink::pair();
        let sender = GbnSender::new(near, &config(4, 10_000), ideal_loss());

        sender.close();
        let err = sender.send(Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
