//! Reliable UDP media streaming with Go-Back-N delivery.
//!
//! Reelcast streams encoded frames over plain UDP with a Go-Back-N
//! sliding-window layer providing in-order, loss-tolerant delivery, and a
//! fixed-rate playback scheduler smoothing the result for display.
//!
//! # Features
//!
//! - **Go-Back-N transport**: sliding window, cumulative ACKs, single
//!   retransmission timer over any datagram link
//! - **Frame pipeline**: chunking, out-of-order reassembly, bounded
//!   playback buffering at a fixed frame rate
//! - **QoE accounting**: stalls, drops, chunk and frame counters
//! - **Loss simulation**: seedable burst and random loss for testing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use reelcast::{DisplayRate, PlaybackConfig, Reelcast};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> reelcast::Result<()> {
//!     let client = Reelcast::connect("127.0.0.1:5000", "race_highlights",
//!         PlaybackConfig::default()).await?;
//!     let mut frames = client.subscribe(DisplayRate::Max(24));
//!
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {} ({} bytes)", frame.frame_id, frame.data.len());
//!     }
//!     println!("{:?}", client.metrics());
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod config;
mod error;
pub mod link;
pub mod loss;
pub mod metrics;

// Go-Back-N transport
pub mod protocol;
pub mod receiver;
pub mod sender;

// Media pipeline
pub mod stream;

// Session boundary
pub mod client;
pub mod server;
pub mod session;
pub mod source;

// Core exports
pub use config::{GbnConfig, PlaybackConfig, SessionConfig};
pub use error::{Result, TransportError};
pub use link::{DatagramLink, MemoryLink, UdpLink};
pub use loss::{LossConfig, LossModel};
pub use metrics::{QoeMetrics, QoeRecorder};

// Transport exports
pub use protocol::{Packet, Seq};
pub use receiver::GbnReceiver;
pub use sender::{GbnSender, SenderMetrics};

// Pipeline exports
pub use stream::playback::DisplayedFrame;
pub use stream::throttle::DisplayRate;

// Boundary exports
pub use client::StreamClient;
pub use server::{ServerConfig, StreamServer};
pub use source::{Catalog, FrameSource};

use std::sync::Arc;

/// Unified entry point for Reelcast endpoints.
///
/// Thin factory over [`StreamClient`] and [`StreamServer`] for the common
/// one-socket cases; construct those directly for custom links.
pub struct Reelcast;

impl Reelcast {
    /// Connect to a streaming server and request `media`.
    ///
    /// Binds an ephemeral local UDP port, performs the PLAY handshake and
    /// starts the receive and playback pipelines.
    pub async fn connect(
        server: &str,
        media: &str,
        config: PlaybackConfig,
    ) -> Result<StreamClient> {
        let link = Arc::new(UdpLink::connect("0.0.0.0:0", server).await?);
        StreamClient::connect(link, media, config).await
    }

    /// Bind a streaming server on `addr` serving `catalog`.
    ///
    /// The server does not accept sessions until [`StreamServer::run`] is
    /// awaited.
    pub async fn serve(
        addr: &str,
        catalog: Arc<dyn Catalog>,
        config: ServerConfig,
    ) -> Result<StreamServer> {
        StreamServer::bind(addr, catalog, config).await
    }
}
