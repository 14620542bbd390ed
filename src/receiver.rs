//! Go-Back-N receiver: strict in-order delivery with cumulative ACKs.
//!
//! The receiver accepts exactly one sequence number - `expected` - and
//! never buffers anything else. Out-of-order and duplicate packets are
//! dropped after re-ACKing the last delivered sequence; the sender's
//! retransmission is the only recovery path.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Result;
use crate::link::DatagramLink;
use crate::protocol::{Packet, Seq};

/// GBN receiver over a [`DatagramLink`].
pub struct GbnReceiver {
    link: Arc<dyn DatagramLink>,
    expected: Mutex<Seq>,
    cancel: CancellationToken,
}

impl GbnReceiver {
    /// Create a receiver expecting sequence number 0 first.
    pub fn new(link: Arc<dyn DatagramLink>) -> Self {
        Self::with_cancel(link, CancellationToken::new())
    }

    /// Create a receiver whose `recv` unblocks when `cancel` fires.
    pub fn with_cancel(link: Arc<dyn DatagramLink>, cancel: CancellationToken) -> Self {
        Self { link, expected: Mutex::new(Seq(0)), cancel }
    }

    /// Block until the next in-order payload is available.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` - the payload for the expected sequence number
    /// - `Ok(None)` - the channel closed or the receiver was cancelled
    /// - `Err(e)` - socket failure
    ///
    /// Malformed and corrupt datagrams are dropped silently; anything with
    /// the wrong sequence number is dropped after re-ACKing `expected − 1`.
    pub async fn recv(&self) -> Result<Option<Bytes>> {
        loop {
            let datagram = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("receiver cancelled");
                    return Ok(None);
                }
                result = self.link.recv() => match result? {
                    Some(datagram) => datagram,
                    None => {
                        debug!("link closed");
                        return Ok(None);
                    }
                },
            };

            let Some(packet) = Packet::decode(&datagram) else {
                trace!(len = datagram.len(), "datagram too short for a header, ignoring");
                continue;
            };

            if !packet.verify() {
                trace!(seq = %packet.seq, "checksum mismatch, dropping");
                continue;
            }

            let mut expected = self.expected.lock().await;
            if packet.seq == *expected {
                trace!(seq = %packet.seq, "in-order packet, delivering");
                self.send_ack(packet.seq).await;
                *expected = expected.next();
                return Ok(Some(packet.payload));
            }

            // Duplicate or ahead of the cursor: one modular branch covers
            // both. Re-ACK the last in-order sequence so the sender's
            // window can still advance.
            let last_in_order = expected.prev();
            trace!(
                seq = %packet.seq,
                expected = %*expected,
                "unexpected sequence, re-acking {last_in_order} and dropping"
            );
            drop(expected);
            self.send_ack(last_in_order).await;
        }
    }

    async fn send_ack(&self, ack: Seq) {
        let wire = Packet::ack(ack).encode();
        if let Err(e) = self.link.send(&wire).await {
            debug!(ack = %ack, error = %e, "failed to send ack");
        }
    }

    /// The next sequence number the receiver will accept.
    pub async fn expected(&self) -> Seq {
        *self.expected.lock().await
    }

    /// Mark the receiver closed; any blocked `recv` returns promptly.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;
    use std::time::Duration;

    async fn send_data(link: &Arc<MemoryLink>, seq: u16, payload: &[u8]) {
        let wire = Packet::data(Seq(seq), Bytes::copy_from_slice(payload)).encode();
        link.send(&wire).await.unwrap();
    }

    async fn expect_ack(link: &Arc<MemoryLink>, ack: u16) {
        let raw = link.recv().await.unwrap().expect("ack datagram");
        let packet = Packet::decode(&raw).expect("parsable ack");
        assert!(packet.is_ack());
        assert_eq!(packet.seq, Seq(ack));
    }

    #[tokio::test]
    async fn delivers_in_order_and_acks() {
        let (near, far) = MemoryLink::pair();
        let receiver = GbnReceiver::new(near);

        send_data(&far, 0, b"first").await;
        send_data(&far, 1, b"second").await;

        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"first"));
        expect_ack(&far, 0).await;
        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"second"));
        expect_ack(&far, 1).await;
        assert_eq!(receiver.expected().await, Seq(2));
    }

    #[tokio::test]
    async fn out_of_order_reacked_and_dropped() {
        let (near, far) = MemoryLink::pair();
        let receiver = GbnReceiver::new(near);

        // Scenario: 0, 1, 3, 2 - packet 3 arrives before 2.
        send_data(&far, 0, b"p0").await;
        send_data(&far, 1, b"p1").await;
        send_data(&far, 3, b"p3").await;
        send_data(&far, 2, b"p2").await;
        send_data(&far, 3, b"p3").await; // retransmission of 3

        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"p0"));
        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"p1"));
        // Packet 3 is dropped; the next delivery is 2, then the resent 3.
        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"p2"));
        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"p3"));

        // ACK trail: 0, 1, then a re-ACK of 1 for the early 3, then 2, 3.
        expect_ack(&far, 0).await;
        expect_ack(&far, 1).await;
        expect_ack(&far, 1).await;
        expect_ack(&far, 2).await;
        expect_ack(&far, 3).await;
    }

    #[tokio::test]
    async fn duplicate_before_wraparound_reacks_last_in_order() {
        let (near, far) = MemoryLink::pair();
        let receiver = GbnReceiver::new(near);

        // A duplicate of 65535 arriving while expecting 0 must re-ACK
        // 65535, not deliver. The old linear comparison special-cased this
        // boundary; the modular cursor handles it uniformly.
        send_data(&far, 65535, b"dup").await;

        let recv = tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await;
        assert!(recv.is_err(), "duplicate must not be delivered");
        expect_ack(&far, 65535).await;
        assert_eq!(receiver.expected().await, Seq(0));
    }

    #[tokio::test]
    async fn corrupt_and_malformed_dropped_silently() {
        let (near, far) = MemoryLink::pair();
        let receiver = GbnReceiver::new(near);

        // Too short for a header.
        far.send(&[0x01, 0x02]).await.unwrap();

        // Valid header, flipped payload bit.
        let mut corrupt = Packet::data(Seq(0), Bytes::from_static(b"data")).encode().to_vec();
        *corrupt.last_mut().unwrap() ^= 0x01;
        far.send(&corrupt).await.unwrap();

        // A good packet finally gets through; no ACK was sent for the junk.
        send_data(&far, 0, b"clean").await;
        assert_eq!(receiver.recv().await.unwrap().unwrap(), Bytes::from_static(b"clean"));
        expect_ack(&far, 0).await;
    }

    #[tokio::test]
    async fn expected_strictly_increments_per_delivery() {
        let (near, far) = MemoryLink::pair();
        let receiver = GbnReceiver::new(near);

        for seq in 0u16..20 {
            send_data(&far, seq, &seq.to_be_bytes()).await;
            let payload = receiver.recv().await.unwrap().unwrap();
            assert_eq!(&payload[..], &seq.to_be_bytes());
            assert_eq!(receiver.expected().await, Seq(seq + 1));
        }
    }

    #[tokio::test]
    async fn close_unblocks_recv_promptly() {
        let (near, _far) = MemoryLink::pair();
        let receiver = Arc::new(GbnReceiver::new(near));

        let waiter = Arc::clone(&receiver);
        let handle = tokio::spawn(async move { waiter.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        receiver.close();

        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("recv must unblock within the polling bound")
            .unwrap();
        assert!(matches!(result, Ok(None)));
    }
}
