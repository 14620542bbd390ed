//! Datagram seam between the protocol machinery and the OS socket.
//!
//! The GBN layers never touch a socket directly; they talk to a
//! [`DatagramLink`]. Production uses [`UdpLink`] over a connected UDP
//! socket, tests use [`MemoryLink`] pairs so exchanges run in-process
//! with no real network.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};

use crate::error::{Result, TransportError};

/// An unreliable, unordered datagram channel to exactly one peer.
#[async_trait::async_trait]
pub trait DatagramLink: Send + Sync + 'static {
    /// Send one datagram. Delivery is best-effort; loss is not an error.
    async fn send(&self, datagram: &[u8]) -> Result<()>;

    /// Receive one datagram.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - a datagram arrived
    /// - `Ok(None)` - the channel is closed (normal termination)
    /// - `Err(e)` - socket failure
    async fn recv(&self) -> Result<Option<Bytes>>;
}

/// [`DatagramLink`] over a connected [`UdpSocket`].
pub struct UdpLink {
    socket: UdpSocket,
}

impl UdpLink {
    /// Wrap a socket already `connect`ed to the peer address.
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind `local`, connect to `peer`.
    pub async fn connect(local: &str, peer: &str) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::socket(format!("bind {local}"), e))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| TransportError::socket(format!("connect {peer}"), e))?;
        Ok(Self::new(socket))
    }
}

#[async_trait::async_trait]
impl DatagramLink for UdpLink {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket
            .send(datagram)
            .await
            .map_err(|e| TransportError::socket("udp send", e))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        let mut buf = vec![0u8; 65536];
        let len = self
            .socket
            .recv(&mut buf)
            .await
            .map_err(|e| TransportError::socket("udp recv", e))?;
        buf.truncate(len);
        Ok(Some(Bytes::from(buf)))
    }
}

/// In-process datagram channel for tests: two crossed mpsc queues.
///
/// Preserves datagram boundaries and drops nothing by itself; use
/// [`LossModel`](crate::loss::LossModel) on the sender for loss.
pub struct MemoryLink {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryLink {
    /// Build a connected pair of links.
    pub fn pair() -> (Arc<MemoryLink>, Arc<MemoryLink>) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Arc::new(MemoryLink { tx: a_tx, rx: Mutex::new(a_rx) }),
            Arc::new(MemoryLink { tx: b_tx, rx: Mutex::new(b_rx) }),
        )
    }
}

#[async_trait::async_trait]
impl DatagramLink for MemoryLink {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        // Peer gone means the channel is closed, not a socket fault.
        self.tx
            .send(Bytes::copy_from_slice(datagram))
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_exchanges_datagrams() {
        let (a, b) = MemoryLink::pair();

        a.send(b"ping").await.unwrap();
        let got = b.recv().await.unwrap().expect("datagram");
        assert_eq!(&got[..], b"ping");

        b.send(b"pong").await.unwrap();
        let got = a.recv().await.unwrap().expect("datagram");
        assert_eq!(&got[..], b"pong");
    }

    #[tokio::test]
    async fn dropped_peer_reads_as_closed() {
        let (a, b) = MemoryLink::pair();
        drop(a);

        assert!(matches!(b.recv().await, Ok(None)));
        assert!(matches!(b.send(b"x").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn udp_link_round_trip() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();
        a.connect(b_addr).await.unwrap();
        b.connect(a_addr).await.unwrap();

        let a = UdpLink::new(a);
        let b = UdpLink::new(b);

        a.send(b"hello").await.unwrap();
        let got = b.recv().await.unwrap().expect("datagram");
        assert_eq!(&got[..], b"hello");
    }
}
