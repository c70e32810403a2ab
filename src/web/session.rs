// src/web/session.rs - One orchestrator connection
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::Envelope;
use crate::router::Router;

/// Frames queued for a peer that is not reading. A session that falls this
/// far behind is closed.
pub const OUTBOUND_CAPACITY: usize = 256;

/// A websocket session. Every outbound frame goes through a single queue
/// drained by one writer task, so responses and pushes never interleave.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    peer: SocketAddr,
    authorized: AtomicBool,
    outbound: mpsc::Sender<Message>,
    closed: watch::Sender<bool>,
}

/// Receiving ends owned by the session's I/O tasks.
#[derive(Debug)]
pub struct SessionIo {
    outbound: mpsc::Receiver<Message>,
    closed: watch::Receiver<bool>,
}

impl SessionIo {
    /// Take the next queued outbound frame without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.outbound.try_recv().ok()
    }
}

impl Session {
    pub fn new(peer: SocketAddr) -> (Arc<Self>, SessionIo) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (closed, closed_rx) = watch::channel(false);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            peer,
            authorized: AtomicBool::new(false),
            outbound,
            closed,
        });
        (session, SessionIo { outbound: outbound_rx, closed: closed_rx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::Release);
    }

    /// Queue an envelope. The timestamp is taken now, at send time.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if self.is_closed() {
            return false;
        }
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(session = %self.id, "Failed to encode envelope: {}", e);
                return false;
            }
        };
        match self.outbound.try_send(Message::Text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = %self.id, "Outbound queue to {} is full", self.peer);
                self.close();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stop both I/O tasks; the writer sends a close frame first.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!(session = %self.id, "Closing session with {}", self.peer);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Complete the websocket handshake and serve frames until the peer goes
    /// away or the session is closed.
    pub async fn run<S>(self: Arc<Self>, stream: S, io: SessionIo, router: Arc<Router>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(session = %self.id, "Handshake with {} failed: {}", self.peer, e);
                self.close();
                return;
            }
        };
        tracing::info!(session = %self.id, "Session open with {}", self.peer);

        let (mut sink, mut source) = ws.split();
        let SessionIo { mut outbound, mut closed } = io;
        let mut writer_closed = closed.clone();
        let id = self.id;

        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outbound.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = sink.send(message).await {
                            tracing::warn!(session = %id, "Write failed: {}", e);
                            break;
                        }
                    }
                    _ = closed_signal(&mut writer_closed) => {
                        while let Ok(message) = outbound.try_recv() {
                            if sink.send(message).await.is_err() {
                                break;
                            }
                        }
                        if let Err(e) = sink.send(Message::Close(None)).await {
                            tracing::debug!(session = %id, "Close frame not sent: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        loop {
            let frame = tokio::select! {
                frame = source.next() => frame,
                _ = closed_signal(&mut closed) => break,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = router.handle_frame(&text, self.is_authorized()).await {
                        self.send(&reply);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(session = %self.id, "Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(session = %self.id, "Read failed: {}", e);
                    break;
                }
            }
        }

        self.close();
        if let Err(e) = writer.await {
            tracing::error!(session = %self.id, "Writer task panicked: {}", e);
        }
        tracing::info!(session = %self.id, "Session with {} ended", self.peer);
    }
}

/// Resolves once the close flag is raised. The borrowed value is dropped
/// here so the session future stays `Send`.
async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_queues_text_frames_in_order() {
        let (session, mut io) = Session::new(peer());
        assert!(session.send(&Envelope::status("a", "", json!({}))));
        assert!(session.send(&Envelope::status("b", "", json!({}))));
        let first = io.outbound.recv().await.unwrap();
        let second = io.outbound.recv().await.unwrap();
        assert!(matches!(first, Message::Text(ref t) if t.contains("\"printer_id\":\"a\"")));
        assert!(matches!(second, Message::Text(ref t) if t.contains("\"printer_id\":\"b\"")));
    }

    #[tokio::test]
    async fn test_closed_session_drops_sends() {
        let (session, io) = Session::new(peer());
        session.close();
        assert!(session.is_closed());
        assert!(*io.closed.borrow());
        assert!(!session.send(&Envelope::status("a", "", json!({}))));
    }

    #[tokio::test]
    async fn test_slow_peer_is_closed_when_queue_fills() {
        let (session, mut io) = Session::new(peer());
        for _ in 0..OUTBOUND_CAPACITY {
            assert!(session.send(&Envelope::status("a", "", json!({}))));
        }
        assert!(!session.is_closed());

        assert!(!session.send(&Envelope::status("a", "", json!({}))));
        assert!(session.is_closed());
        // Already queued frames are still there for the writer to flush.
        assert!(io.outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_spawned_session_serves_and_closes() {
        use crate::config::ControlConfig;
        use crate::hardware::{Device, InMemoryDirectory, SimulatedPrinter};
        use crate::print_job::JobTracker;
        use crate::slicer::DirectoryPresetStore;
        use crate::web::SessionSlot;

        let presets = tempfile::tempdir().unwrap();
        let devices = Arc::new(InMemoryDirectory::new(vec![
            Arc::new(SimulatedPrinter::with_id("p1")) as Arc<dyn Device>,
        ]));
        let (job_tx, _job_rx) = mpsc::channel(1);
        let router = Arc::new(Router::new(
            devices,
            Arc::new(DirectoryPresetStore::new(presets.path())),
            JobTracker::new(),
            job_tx,
            SessionSlot::new(),
            ControlConfig::default(),
        ));

        let (server_end, client_end) = tokio::io::duplex(64 * 1024);
        let (session, io) = Session::new(peer());
        let task = tokio::spawn(session.clone().run(server_end, io, router));

        let (mut ws, _) = tokio_tungstenite::client_async("ws://127.0.0.1/", client_end).await.unwrap();
        ws.send(Message::Text("printago://h/printer_control/get_status?printer_id=p1".to_string()))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert!(matches!(reply, Message::Text(ref t) if t.contains("\"type\":\"status\"")));

        session.close();
        let close = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(close.is_ok());
        tokio::time::timeout(std::time::Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
