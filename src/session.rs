//! Text control protocol and per-peer session tracking.
//!
//! Control datagrams share the UDP socket with binary transport traffic and
//! are distinguished by a 4-byte magic prefix. The control body is a single
//! line of ASCII text.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{Result, TransportError};

/// Magic prefix marking a datagram as control traffic.
pub const CONTROL_MAGIC: &[u8; 4] = b"RCTL";

/// Whether a datagram carries a control message rather than transport bytes.
pub fn is_control(datagram: &[u8]) -> bool {
    datagram.starts_with(CONTROL_MAGIC)
}

fn encode_line(line: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(CONTROL_MAGIC.len() + line.len() + 1);
    buf.put_slice(CONTROL_MAGIC);
    buf.put_slice(line.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

fn decode_line(datagram: &[u8]) -> Result<&str> {
    let body = datagram
        .strip_prefix(CONTROL_MAGIC)
        .ok_or_else(|| TransportError::bad_request("missing control magic"))?;
    let text = std::str::from_utf8(body)
        .map_err(|_| TransportError::bad_request("control body is not UTF-8"))?;
    Ok(text.trim_end_matches(['\r', '\n']).trim())
}

/// Client-to-server control requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Start streaming the named media.
    Play(String),
    /// Tear down the caller's session.
    Stop,
}

impl ControlRequest {
    pub fn encode(&self) -> Bytes {
        match self {
            ControlRequest::Play(name) => encode_line(&format!("PLAY {name}")),
            ControlRequest::Stop => encode_line("STOP"),
        }
    }

    /// Parse a control datagram into a request.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let line = decode_line(datagram)?;
        if line == "STOP" {
            return Ok(ControlRequest::Stop);
        }
        if let Some(name) = line.strip_prefix("PLAY ") {
            let name = name.trim();
            if name.is_empty() {
                return Err(TransportError::bad_request("PLAY without a media name"));
            }
            return Ok(ControlRequest::Play(name.to_string()));
        }
        Err(TransportError::bad_request(format!("unknown command: {line}")))
    }
}

/// Server-to-client control replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Request accepted; carries a short human-readable detail.
    Ok(String),
    NotFound,
    BadRequest,
    InternalError,
}

impl ControlReply {
    pub fn status(&self) -> u16 {
        match self {
            ControlReply::Ok(_) => 200,
            ControlReply::NotFound => 404,
            ControlReply::BadRequest => 400,
            ControlReply::InternalError => 500,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            ControlReply::Ok(detail) => encode_line(&format!("200 OK {detail}")),
            ControlReply::NotFound => encode_line("404 NOT_FOUND"),
            ControlReply::BadRequest => encode_line("400 BAD_REQUEST"),
            ControlReply::InternalError => encode_line("500 INTERNAL_ERROR"),
        }
    }

    /// Parse a control datagram into a reply.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let line = decode_line(datagram)?;
        if let Some(detail) = line.strip_prefix("200 OK") {
            return Ok(ControlReply::Ok(detail.trim().to_string()));
        }
        match line {
            "404 NOT_FOUND" => Ok(ControlReply::NotFound),
            "400 BAD_REQUEST" => Ok(ControlReply::BadRequest),
            "500 INTERNAL_ERROR" => Ok(ControlReply::InternalError),
            other => Err(TransportError::bad_request(format!(
                "unknown status line: {other}"
            ))),
        }
    }

    /// Convert an error reply into the matching `TransportError`.
    pub fn into_error(self, media: &str) -> Option<TransportError> {
        match self {
            ControlReply::Ok(_) => None,
            ControlReply::NotFound => Some(TransportError::NotFound { name: media.to_string() }),
            reply => Some(TransportError::ServerStatus { status: reply.status() }),
        }
    }
}

struct SessionHandle {
    id: u64,
    cancel: CancellationToken,
    last_activity: Instant,
}

/// Server-side table of active streaming sessions, one per peer address.
///
/// Each registration gets a unique id so that cleanup after a replaced
/// session can tell its own entry apart from a successor at the same
/// address.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SocketAddr, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for `peer`, cancelling any previous one.
    ///
    /// Returns the id identifying this registration, for use with
    /// [`remove_if`](Self::remove_if).
    pub async fn insert(&self, peer: SocketAddr, cancel: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.insert(
            peer,
            SessionHandle { id, cancel, last_activity: Instant::now() },
        ) {
            debug!(%peer, "replacing existing session");
            previous.cancel.cancel();
        }
        id
    }

    /// Record activity for `peer`, deferring idle reaping.
    pub async fn touch(&self, peer: SocketAddr) {
        if let Some(handle) = self.sessions.lock().await.get_mut(&peer) {
            handle.last_activity = Instant::now();
        }
    }

    /// Cancel and remove the session for `peer`, if any.
    pub async fn remove(&self, peer: SocketAddr) -> bool {
        match self.sessions.lock().await.remove(&peer) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove the session for `peer` only if it is still the
    /// registration identified by `id`. A session that has been replaced
    /// finds a different id here and leaves its successor alone.
    pub async fn remove_if(&self, peer: SocketAddr, id: u64) -> bool {
        let mut sessions = self.sessions.lock().await;
        if let Entry::Occupied(entry) = sessions.entry(peer) {
            if entry.get().id == id {
                entry.remove().cancel.cancel();
                return true;
            }
        }
        false
    }

    /// Cancel and remove every session idle for longer than `idle_timeout`.
    pub async fn reap_idle(&self, idle_timeout: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|peer, handle| {
            let idle = now.duration_since(handle.last_activity) < idle_timeout;
            if !idle {
                info!(%peer, "reaping idle session");
                handle.cancel.cancel();
            }
            idle
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Periodically reap idle sessions until cancelled.
    pub fn spawn_reaper(
        self: Arc<Self>,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.reap_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                registry.reap_idle(config.idle_timeout).await;
            }
        })
    }
}
