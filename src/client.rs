//! Streaming client: session setup, receive pipeline, playback.
//!
//! One client owns one connected datagram link to the server. Control
//! replies and transport datagrams arrive interleaved on that link; a demux
//! wrapper splits off control frames so the transport receiver only ever
//! sees binary packets.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::{Result, TransportError};
use crate::link::DatagramLink;
use crate::metrics::{QoeMetrics, QoeRecorder};
use crate::receiver::GbnReceiver;
use crate::session::{ControlReply, ControlRequest, is_control};
use crate::stream::chunk::ChunkHeader;
use crate::stream::playback::{DisplayedFrame, PlaybackBuffer, PlaybackScheduler};
use crate::stream::reassembly::ReassemblyBuffer;
use crate::stream::throttle::{DisplayRate, ThrottleExt};

const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Splits control datagrams off an inner link.
///
/// `recv` yields only transport datagrams; control frames are forwarded to
/// a side channel consumed during session setup.
struct DemuxLink {
    inner: Arc<dyn DatagramLink>,
    control_tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait::async_trait]
impl DatagramLink for DemuxLink {
    async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.inner.send(datagram).await
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        loop {
            match self.inner.recv().await? {
                Some(datagram) if is_control(&datagram) => {
                    // Setup already done means nobody is listening; fine.
                    let _ = self.control_tx.send(datagram);
                }
                other => return Ok(other),
            }
        }
    }
}

/// A playback session against one streaming server.
pub struct StreamClient {
    link: Arc<dyn DatagramLink>,
    config: PlaybackConfig,
    qoe: Arc<QoeRecorder>,
    display_rx: watch::Receiver<Option<Arc<DisplayedFrame>>>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Request `media` from the peer behind `link` and start the receive
    /// and playback pipelines.
    ///
    /// Fails when the server refuses the request or does not answer within
    /// the control timeout.
    pub async fn connect(
        link: Arc<dyn DatagramLink>,
        media: &str,
        config: PlaybackConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let link: Arc<dyn DatagramLink> =
            Arc::new(DemuxLink { inner: link, control_tx });

        let qoe = Arc::new(QoeRecorder::new());
        let playback = Arc::new(Mutex::new(PlaybackBuffer::new(config.buffer_capacity)));
        let reassembly = Arc::new(Mutex::new(ReassemblyBuffer::new()));
        let (display_tx, display_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        // Start the receive pipeline before the handshake: it pumps the
        // link, which routes the control reply to `control_rx`, and it
        // catches data packets racing ahead of the reply.
        let receiver = GbnReceiver::with_cancel(Arc::clone(&link), cancel.child_token());
        tokio::spawn(receive_task(
            receiver,
            Arc::clone(&playback),
            Arc::clone(&reassembly),
            Arc::clone(&qoe),
        ));

        link.send(&ControlRequest::Play(media.to_string()).encode()).await?;
        let handshake = async {
            let reply = tokio::time::timeout(CONTROL_REPLY_TIMEOUT, control_rx.recv())
                .await
                .map_err(|_| TransportError::Timeout { duration: CONTROL_REPLY_TIMEOUT })?
                .ok_or(TransportError::Closed)?;
            let reply = ControlReply::decode(&reply)?;
            match reply.into_error(media) {
                None => Ok(()),
                Some(err) => Err(err),
            }
        };
        if let Err(err) = handshake.await {
            cancel.cancel();
            return Err(err);
        }
        info!(media, "session accepted");

        // The scheduler owns the only sender; its exit ends subscriber
        // streams without losing the final displayed frame.
        let scheduler = PlaybackScheduler::new(
            config.clone(),
            playback,
            reassembly,
            Arc::clone(&qoe),
            display_tx,
            cancel.child_token(),
        );
        tokio::spawn(scheduler.run());

        Ok(Self { link, config, qoe, display_rx, cancel })
    }

    /// Subscribe to displayed frames.
    ///
    /// The stream yields each frame as it is displayed, throttled to at
    /// most the requested rate, and ends when playback stops.
    pub fn subscribe(&self, rate: DisplayRate) -> impl Stream<Item = Arc<DisplayedFrame>> + 'static {
        // WatchStream yields the current value immediately; a leading None
        // just means nothing has been displayed yet.
        let frames = WatchStream::new(self.display_rx.clone())
            .filter_map(|opt| async move { opt });

        match rate.throttle_interval(self.config.fps) {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// Quality-of-experience counters so far.
    pub fn metrics(&self) -> QoeMetrics {
        self.qoe.snapshot()
    }

    /// Tell the server to tear the session down and stop local tasks.
    pub async fn stop(&self) {
        if let Err(e) = self.link.send(&ControlRequest::Stop.encode()).await {
            debug!(error = %e, "stop notification not sent");
        }
        self.cancel.cancel();
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reads transport payloads, parses chunks, feeds reassembly and playback.
async fn receive_task(
    receiver: GbnReceiver,
    playback: Arc<Mutex<PlaybackBuffer>>,
    reassembly: Arc<Mutex<ReassemblyBuffer>>,
    qoe: Arc<QoeRecorder>,
) {
    loop {
        let payload = match receiver.recv().await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "receive failed");
                break;
            }
        };

        let Some((header, body)) = ChunkHeader::decode(&payload) else {
            debug!(len = payload.len(), "undersized chunk payload ignored");
            continue;
        };

        if header.is_end_of_stream() {
            info!("end of stream received");
            qoe.mark_eos();
            break;
        }

        qoe.record_chunk();
        let mut reassembly = reassembly.lock().await;
        reassembly.add_chunk(header, body);
        if let Some(frame) = reassembly.assemble(header.frame_id) {
            qoe.record_reassembled();
            if !playback.lock().await.insert(header.frame_id, frame) {
                // Buffer full; the frame is gone and the scheduler counts
                // the drop when it abandons the empty slot.
                debug!(frame_id = header.frame_id, "playback buffer full, frame dropped");
            }
        }
    }
    debug!("receive task finished");
}
