//! Phone link TCP listener
//!
//! The BLE GATT bridge connects here. One peer is served at a time; further
//! connections wait in the accept backlog until the current one ends.
//! Frames are delimited by a u16 LE length prefix in both directions.

use crate::infra::metrics::Metrics;
use crate::services::outbound::FrameSink;
use anyhow::Context;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Per-peer outbound writer queue depth
const WRITER_QUEUE: usize = 64;

/// Events delivered to the session task, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Frame(Vec<u8>),
    Disconnected,
}

/// Outbound side of the link, shared between the listener and the session
///
/// Holds the writer queue of the current peer; `send_frame` never blocks and
/// drops the frame when no peer is attached or its writer is backed up.
pub struct LinkSender {
    slot: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    metrics: Arc<Metrics>,
}

impl LinkSender {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { slot: Mutex::new(None), metrics }
    }

    fn attach(&self, tx: mpsc::Sender<Vec<u8>>) {
        *self.slot.lock() = Some(tx);
    }

    fn detach(&self) {
        self.slot.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl FrameSink for LinkSender {
    fn send_frame(&self, frame: &[u8]) {
        let guard = self.slot.lock();
        let Some(tx) = guard.as_ref() else {
            self.metrics.record_outbound_dropped();
            debug!(len = frame.len(), "link_send_no_peer");
            return;
        };
        match tx.try_send(frame.to_vec()) {
            Ok(()) => self.metrics.record_outbound_frame(),
            Err(TrySendError::Full(_)) => {
                self.metrics.record_outbound_dropped();
                warn!("link_writer_queue_full");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_outbound_dropped();
                debug!("link_writer_closed");
            }
        }
    }
}

/// Bound link listener, ready to run
pub struct LinkListener {
    listener: TcpListener,
}

impl LinkListener {
    /// Bind the listening socket; failure is fatal at startup
    pub async fn bind(bind_address: &str, port: u16) -> anyhow::Result<Self> {
        let addr = format!("{bind_address}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind link listener on {addr}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve peers one at a time until shutdown
    pub async fn run(
        self,
        event_tx: mpsc::Sender<LinkEvent>,
        sender: Arc<LinkSender>,
        metrics: Arc<Metrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "link_listener_started");
        }

        loop {
            let accepted = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("link_listener_shutdown");
                        return;
                    }
                    continue;
                }
                result = self.listener.accept() => result,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "link_accept_failed");
                    continue;
                }
            };

            let stop = tokio::select! {
                _ = serve_peer(socket, peer, &event_tx, &sender, &metrics) => false,
                changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
            };
            sender.detach();
            if event_tx.send(LinkEvent::Disconnected).await.is_err() || stop {
                info!("link_listener_shutdown");
                return;
            }
        }
    }
}

async fn serve_peer(
    socket: TcpStream,
    peer: SocketAddr,
    event_tx: &mpsc::Sender<LinkEvent>,
    sender: &LinkSender,
    metrics: &Metrics,
) {
    let _ = socket.set_nodelay(true);
    let (reader, writer) = socket.into_split();
    let (out_tx, out_rx) = mpsc::channel(WRITER_QUEUE);

    if event_tx.send(LinkEvent::Connected).await.is_err() {
        return;
    }
    sender.attach(out_tx);
    info!(peer = %peer, "link_peer_connected");

    let writer_task = tokio::spawn(write_frames(writer, out_rx));
    read_frames(reader, peer, event_tx, metrics).await;
    writer_task.abort();

    info!(peer = %peer, "link_peer_disconnected");
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    peer: SocketAddr,
    event_tx: &mpsc::Sender<LinkEvent>,
    metrics: &Metrics,
) {
    loop {
        let len = match reader.read_u16_le().await {
            Ok(len) => len as usize,
            Err(e) => {
                debug!(peer = %peer, error = %e, "link_read_closed");
                return;
            }
        };
        if len == 0 {
            continue;
        }
        let mut frame = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut frame).await {
            warn!(peer = %peer, error = %e, expected = len, "link_frame_truncated");
            return;
        }
        trace!(len, command = frame[0], "link_frame_received");

        // Full session channel: stop reading so TCP flow control reaches the peer
        let event = match event_tx.try_send(LinkEvent::Frame(frame)) {
            Ok(()) => continue,
            Err(TrySendError::Full(event)) => {
                metrics.record_inbound_backpressure();
                trace!(peer = %peer, "link_session_channel_full");
                event
            }
            Err(TrySendError::Closed(_)) => {
                warn!(peer = %peer, "link_session_channel_closed");
                return;
            }
        };
        if event_tx.send(event).await.is_err() {
            warn!(peer = %peer, "link_session_channel_closed");
            return;
        }
    }
}

async fn write_frames(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        let len = frame.len().min(u16::MAX as usize);
        let result = async {
            writer.write_u16_le(len as u16).await?;
            writer.write_all(&frame[..len]).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "link_write_failed");
            return;
        }
    }
}

/// Write one length-prefixed frame (peer side helper for tools and tests)
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_u16_le(frame.len() as u16).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Read one length-prefixed frame (peer side helper for tools and tests)
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let len = reader.read_u16_le().await? as usize;
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sender_without_peer_drops() {
        let metrics = Arc::new(Metrics::new());
        let sender = LinkSender::new(metrics.clone());
        sender.send_frame(&[1, 2, 3]);
        assert!(!sender.is_attached());
        assert_eq!(metrics.report().outbound_dropped, 1);
    }

    #[test]
    fn test_sender_forwards_to_attached_peer() {
        let metrics = Arc::new(Metrics::new());
        let sender = LinkSender::new(metrics.clone());
        let (tx, mut rx) = mpsc::channel(4);
        sender.attach(tx);
        sender.send_frame(&[9, 8]);
        assert_eq!(rx.try_recv().unwrap(), vec![9, 8]);
        assert_eq!(metrics.outbound_frames(), 1);

        sender.detach();
        sender.send_frame(&[7]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_session_channel_delays_instead_of_dropping() {
        let metrics = Arc::new(Metrics::new());
        let listener = LinkListener::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = Arc::new(LinkSender::new(metrics.clone()));
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(listener.run(event_tx, sender, metrics.clone(), shutdown_rx));

        let mut peer = TcpStream::connect(addr).await.unwrap();
        for _ in 0..20 {
            write_frame(&mut peer, &[crate::io::protocol::CMD_CONFIRM_RECEIVED]).await.unwrap();
        }
        // let the reader run into the full channel before draining it
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(event_rx.recv().await, Some(LinkEvent::Connected));
        let mut frames = 0;
        while frames < 20 {
            match event_rx.recv().await {
                Some(LinkEvent::Frame(frame)) => {
                    assert_eq!(frame, vec![crate::io::protocol::CMD_CONFIRM_RECEIVED]);
                    frames += 1;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(metrics.report().inbound_backpressure > 0);

        drop(peer);
        assert_eq!(event_rx.recv().await, Some(LinkEvent::Disconnected));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_round_trip() {
        let metrics = Arc::new(Metrics::new());
        let listener = LinkListener::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = Arc::new(LinkSender::new(metrics.clone()));
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(listener.run(event_tx, sender.clone(), metrics.clone(), shutdown_rx));

        let mut peer = TcpStream::connect(addr).await.unwrap();
        assert_eq!(event_rx.recv().await, Some(LinkEvent::Connected));

        write_frame(&mut peer, &[1]).await.unwrap();
        assert_eq!(event_rx.recv().await, Some(LinkEvent::Frame(vec![1])));

        // attach happens right after Connected is queued
        for _ in 0..50 {
            if sender.is_attached() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sender.send_frame(&[0x0D, 0x25, 1]);
        assert_eq!(read_frame(&mut peer).await.unwrap(), vec![0x0D, 0x25, 1]);

        drop(peer);
        assert_eq!(event_rx.recv().await, Some(LinkEvent::Disconnected));
        assert!(!sender.is_attached());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
