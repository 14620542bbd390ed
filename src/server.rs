//! Streaming server: control handling, per-peer sessions, frame pacing.
//!
//! One UDP socket carries everything. The accept loop parses control
//! datagrams itself and routes transport datagrams (client acknowledgements)
//! to the session owning that peer address; each session sends through the
//! shared socket with its peer as the fixed destination.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{GbnConfig, SessionConfig};
use crate::error::{Result, TransportError};
use crate::link::DatagramLink;
use crate::loss::{LossConfig, LossModel};
use crate::protocol::HEADER_SIZE;
use crate::sender::GbnSender;
use crate::session::{ControlReply, ControlRequest, SessionRegistry, is_control};
use crate::source::{Catalog, FrameSource};
use crate::stream::chunk::{CHUNK_HEADER_SIZE, end_of_stream_payload, split_frame};

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub gbn: GbnConfig,
    /// Source pacing rate in frames per second.
    pub fps: f64,
    pub session: SessionConfig,
    /// Simulated loss applied to outgoing transport datagrams.
    pub loss: LossConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gbn: GbnConfig::default(),
            fps: 30.0,
            session: SessionConfig::default(),
            loss: LossConfig::default(),
        }
    }
}

/// Per-peer [`DatagramLink`] over the shared server socket.
///
/// Sends go to the fixed peer address; receives come from the accept loop,
/// which routes this peer's transport datagrams into the channel.
struct RoutedLink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

#[async_trait::async_trait]
impl DatagramLink for RoutedLink {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket
            .send_to(datagram, self.peer)
            .await
            .map_err(|e| TransportError::socket("udp send_to", e))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// Routing entry for one peer, tagged with the owning session's id so that
/// a replaced session's cleanup cannot tear down its successor's route.
struct Route {
    session_id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

struct ServerInner {
    socket: Arc<UdpSocket>,
    catalog: Arc<dyn Catalog>,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    routes: Mutex<HashMap<SocketAddr, Route>>,
    cancel: CancellationToken,
}

/// A media streaming server bound to one UDP socket.
pub struct StreamServer {
    inner: Arc<ServerInner>,
}

impl StreamServer {
    /// Bind `addr` and prepare to serve `catalog`.
    pub async fn bind(addr: &str, catalog: Arc<dyn Catalog>, config: ServerConfig) -> Result<Self> {
        config.gbn.validate()?;
        if !(config.fps.is_finite() && config.fps > 0.0) {
            return Err(TransportError::config(format!(
                "fps must be positive, got {}",
                config.fps
            )));
        }

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::socket(format!("bind {addr}"), e))?;
        let local = socket.local_addr().map_err(TransportError::from)?;
        info!(addr = %local, "server listening");

        Ok(Self {
            inner: Arc::new(ServerInner {
                socket: Arc::new(socket),
                catalog,
                config,
                registry: Arc::new(SessionRegistry::new()),
                routes: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Accept loop; runs until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<()> {
        let inner = &self.inner;
        let reaper = Arc::clone(&inner.registry)
            .spawn_reaper(inner.config.session.clone(), inner.cancel.child_token());

        let mut buf = vec![0u8; 65536];
        loop {
            let (len, peer) = tokio::select! {
                _ = inner.cancel.cancelled() => break,
                received = inner.socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "recv_from failed");
                        continue;
                    }
                },
            };
            let datagram = &buf[..len];

            if is_control(datagram) {
                handle_control(inner, datagram, peer).await;
            } else {
                // Transport traffic from a peer: client acknowledgements.
                inner.registry.touch(peer).await;
                let routes = inner.routes.lock().await;
                match routes.get(&peer) {
                    Some(route) => {
                        let _ = route.tx.send(Bytes::copy_from_slice(datagram));
                    }
                    None => debug!(%peer, "transport datagram from unknown peer"),
                }
            }
        }

        reaper.abort();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

async fn reply(inner: &ServerInner, peer: SocketAddr, reply: ControlReply) {
    if let Err(e) = inner.socket.send_to(&reply.encode(), peer).await {
        debug!(%peer, error = %e, "control reply not sent");
    }
}

async fn handle_control(inner: &Arc<ServerInner>, datagram: &[u8], peer: SocketAddr) {
    match ControlRequest::decode(datagram) {
        Ok(ControlRequest::Play(name)) => {
            let source = match inner.catalog.open(&name) {
                Ok(source) => source,
                Err(TransportError::NotFound { name }) => {
                    debug!(%peer, name, "unknown media requested");
                    reply(inner, peer, ControlReply::NotFound).await;
                    return;
                }
                Err(e) => {
                    warn!(%peer, name, error = %e, "catalog failure");
                    reply(inner, peer, ControlReply::InternalError).await;
                    return;
                }
            };
            start_session(inner, peer, name, source).await;
        }
        Ok(ControlRequest::Stop) => {
            let removed = inner.registry.remove(peer).await;
            inner.routes.lock().await.remove(&peer);
            debug!(%peer, removed, "stop requested");
            reply(inner, peer, ControlReply::Ok("stopped".into())).await;
        }
        Err(e) => {
            debug!(%peer, error = %e, "bad control request");
            reply(inner, peer, ControlReply::BadRequest).await;
        }
    }
}

async fn start_session(
    inner: &Arc<ServerInner>,
    peer: SocketAddr,
    name: String,
    source: Box<dyn FrameSource>,
) {
    let session_cancel = inner.cancel.child_token();
    let (route_tx, route_rx) = mpsc::unbounded_channel();

    let session_id = inner.registry.insert(peer, session_cancel.clone()).await;
    inner
        .routes
        .lock()
        .await
        .insert(peer, Route { session_id, tx: route_tx });

    let link: Arc<dyn DatagramLink> = Arc::new(RoutedLink {
        socket: Arc::clone(&inner.socket),
        peer,
        rx: Mutex::new(route_rx),
    });
    let loss = LossModel::new(inner.config.loss);
    let sender = GbnSender::new(link, &inner.config.gbn, loss);

    info!(%peer, name, "session started");
    reply(inner, peer, ControlReply::Ok(format!("streaming {name}"))).await;

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        stream_session(&inner, peer, source, &sender, &session_cancel).await;
        sender.close();
        // Clean up only this session's entries; a replacement started for
        // the same peer keeps its own route and registration.
        {
            let mut routes = inner.routes.lock().await;
            if routes.get(&peer).is_some_and(|route| route.session_id == session_id) {
                routes.remove(&peer);
            }
        }
        inner.registry.remove_if(peer, session_id).await;
        info!(%peer, "session finished");
    });
}

/// Pace frames at the configured rate, fragmenting each through the sender,
/// then send the end-of-stream sentinel and wait for it to be acknowledged.
async fn stream_session(
    inner: &Arc<ServerInner>,
    peer: SocketAddr,
    mut source: Box<dyn FrameSource>,
    sender: &GbnSender,
    cancel: &CancellationToken,
) {
    let config = &inner.config;
    let max_chunk_bytes = config.gbn.max_packet_size - HEADER_SIZE - CHUNK_HEADER_SIZE;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / config.fps));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut frame_id: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "frame source failed");
                break;
            }
        };

        let chunks = match split_frame(frame_id, &frame, max_chunk_bytes) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(%peer, frame_id, error = %e, "frame skipped");
                frame_id = frame_id.wrapping_add(1);
                continue;
            }
        };
        for chunk in chunks {
            let sent = tokio::select! {
                _ = cancel.cancelled() => return,
                sent = sender.send(chunk) => sent,
            };
            if let Err(e) = sent {
                warn!(%peer, frame_id, error = %e, "send failed, ending session");
                return;
            }
        }
        inner.registry.touch(peer).await;
        frame_id = frame_id.wrapping_add(1);
    }

    if let Err(e) = sender.send(end_of_stream_payload()).await {
        debug!(%peer, error = %e, "end-of-stream not sent");
        return;
    }
    drain(sender, cancel, config.gbn.retransmit_timeout * 10).await;
}

/// Wait until every in-flight packet is acknowledged, bounded by `limit`.
async fn drain(sender: &GbnSender, cancel: &CancellationToken, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while sender.in_flight().await > 0 {
        if cancel.is_cancelled() || tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StreamClient;
    use crate::config::PlaybackConfig;
    use crate::link::UdpLink;
    use crate::source::MemoryCatalog;
    use crate::stream::throttle::DisplayRate;
    use futures::StreamExt;
    use tokio::time::timeout;

    fn catalog(frames: Vec<Bytes>) -> Arc<MemoryCatalog> {
        let mut catalog = MemoryCatalog::new();
        catalog.insert("clip", frames);
        Arc::new(catalog)
    }

    fn fast_config() -> ServerConfig {
        ServerConfig { fps: 40.0, ..ServerConfig::default() }
    }

    async fn spawn_server(config: ServerConfig, catalog: Arc<MemoryCatalog>) -> (Arc<StreamServer>, SocketAddr) {
        let server = Arc::new(
            StreamServer::bind("127.0.0.1:0", catalog, config)
                .await
                .unwrap(),
        );
        let addr = server.local_addr().unwrap();
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });
        (server, addr)
    }

    async fn connect(addr: SocketAddr, media: &str) -> crate::error::Result<StreamClient> {
        let link = Arc::new(UdpLink::connect("127.0.0.1:0", &addr.to_string()).await?);
        let playback = PlaybackConfig {
            fps: 40.0,
            buffer_capacity: 64,
            start_frame_id: 0,
            eviction_horizon: 10,
        };
        StreamClient::connect(link, media, playback).await
    }

    #[tokio::test]
    async fn streams_every_frame_to_the_client() {
        let frames: Vec<Bytes> = (0u8..5)
            .map(|i| Bytes::from(vec![i; 3000]))
            .collect();
        let (_server, addr) = spawn_server(fast_config(), catalog(frames.clone())).await;

        let client = connect(addr, "clip").await.unwrap();
        let displayed: Vec<_> = timeout(
            Duration::from_secs(5),
            client.subscribe(DisplayRate::Native).collect::<Vec<_>>(),
        )
        .await
        .expect("stream finished in time");

        assert_eq!(displayed.len(), 5);
        for (i, frame) in displayed.iter().enumerate() {
            assert_eq!(frame.frame_id, i as u32);
            assert_eq!(frame.data, frames[i]);
        }

        let metrics = client.metrics();
        assert_eq!(metrics.frames_reassembled_total, 5);
        assert_eq!(metrics.dropped_frames, 0);
        assert!(metrics.eos_received);
    }

    #[tokio::test]
    async fn unknown_media_is_refused() {
        let (_server, addr) = spawn_server(fast_config(), catalog(vec![])).await;

        let result = connect(addr, "nope").await;
        assert!(matches!(
            result,
            Err(TransportError::NotFound { name }) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn stop_tears_the_session_down() {
        // A long stream the client abandons midway.
        let frames: Vec<Bytes> = (0..1000u16)
            .map(|i| Bytes::from(i.to_be_bytes().to_vec()))
            .collect();
        let (server, addr) = spawn_server(fast_config(), catalog(frames)).await;

        let client = connect(addr, "clip").await.unwrap();
        let mut stream = client.subscribe(DisplayRate::Native);
        timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("first frame in time")
            .expect("stream open");

        client.stop().await;

        // The registry empties once the session task observes the cancel.
        timeout(Duration::from_secs(2), async {
            while !server.inner.registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session reaped after stop");
    }

    #[tokio::test]
    async fn second_play_from_one_peer_keeps_the_replacement_alive() {
        // A clip long enough that neither session finishes on its own.
        let frames: Vec<Bytes> = (0..10_000u16)
            .map(|i| Bytes::from(i.to_be_bytes().to_vec()))
            .collect();
        let (server, addr) = spawn_server(fast_config(), catalog(frames)).await;

        let link = UdpLink::connect("127.0.0.1:0", &addr.to_string())
            .await
            .unwrap();
        let play = ControlRequest::Play("clip".into()).encode();
        link.send(&play).await.unwrap();
        link.send(&play).await.unwrap();

        // The replaced session's cleanup must leave the replacement's
        // route and registration in place.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(server.inner.registry.len().await, 1);
        assert_eq!(server.inner.routes.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn lossy_path_still_delivers_every_frame() {
        let frames: Vec<Bytes> = (0u8..3)
            .map(|i| Bytes::from(vec![i; 500]))
            .collect();
        let mut config = fast_config();
        config.loss = LossConfig { random_loss_rate: 0.3, ..LossConfig::default() };
        config.gbn.retransmit_timeout = Duration::from_millis(50);
        let (_server, addr) = spawn_server(config, catalog(frames.clone())).await;

        let client = connect(addr, "clip").await.unwrap();
        let displayed: Vec<_> = timeout(
            Duration::from_secs(10),
            client.subscribe(DisplayRate::Native).collect::<Vec<_>>(),
        )
        .await
        .expect("retransmissions recover all frames");

        assert_eq!(displayed.len(), 3);
        for (i, frame) in displayed.iter().enumerate() {
            assert_eq!(frame.data, frames[i]);
        }
    }
}
