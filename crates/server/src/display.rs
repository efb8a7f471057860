//! C3 — the display WebSocket transport.
//!
//! A single display connection (the HTML player) holds the one display
//! slot; connecting again displaces whoever held it before with a normal
//! close. Any number of sender connections (mirroring/casting clients that
//! never speak CastV2 directly) register themselves under a session id via
//! their first message and stay addressable by that id for the life of the
//! connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use castbridge_protocol::signaling::{DisplayCommand, DisplayInbound, SenderMessage};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

/// Which slot a connection currently occupies, if any.
#[derive(Debug, Clone)]
enum Role {
    Display,
    Sender(String),
}

/// An inbound sender message, tagged with the session id it arrived under.
pub struct SenderEvent {
    pub session_id: String,
    pub message: SenderMessage,
}

struct ConnSink {
    id: u64,
    outbound: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Inner {
    display: Option<ConnSink>,
    senders: HashMap<String, ConnSink>,
}

pub struct DisplayTransport {
    inner: Mutex<Inner>,
    display_events_tx: mpsc::UnboundedSender<DisplayInbound>,
    sender_events_tx: mpsc::UnboundedSender<SenderEvent>,
    max_payload_bytes: usize,
    ping_interval: Duration,
    next_conn_id: AtomicU64,
}

impl DisplayTransport {
    pub fn new(
        max_payload_bytes: usize,
        ping_interval: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DisplayInbound>, mpsc::UnboundedReceiver<SenderEvent>) {
        let (display_events_tx, display_events_rx) = mpsc::unbounded_channel();
        let (sender_events_tx, sender_events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            display_events_tx,
            sender_events_tx,
            max_payload_bytes,
            ping_interval,
            next_conn_id: AtomicU64::new(1),
        });
        (transport, display_events_rx, sender_events_rx)
    }

    /// Push a command to the display. Silently dropped (just a debug log)
    /// if no display connection is currently attached.
    pub async fn send_command(&self, cmd: &DisplayCommand) {
        let text = match serde_json::to_string(cmd) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, "failed to serialize display command");
                return;
            }
        };
        let inner = self.inner.lock().await;
        match &inner.display {
            Some(sink) => {
                let _ = sink.outbound.send(Message::Text(text.into()));
            }
            None => tracing::debug!("no display attached; command dropped"),
        }
    }

    /// Push a JSON message to a sender connection by session id. Silently
    /// dropped if that sender is no longer connected.
    pub async fn send_to_sender(&self, session_id: &str, payload: &impl Serialize) {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, "failed to serialize sender message");
                return;
            }
        };
        let inner = self.inner.lock().await;
        match inner.senders.get(session_id) {
            Some(sink) => {
                let _ = sink.outbound.send(Message::Text(text.into()));
            }
            None => tracing::debug!(session_id, "no sender connection attached; message dropped"),
        }
    }

    async fn register_display(&self, conn: ConnSink) {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.display.replace(conn) {
            let _ = previous.outbound.send(Message::Close(None));
        }
    }

    async fn register_sender(&self, session_id: &str, conn: ConnSink) {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.senders.insert(session_id.to_string(), conn) {
            let _ = previous.outbound.send(Message::Close(None));
        }
    }

    async fn deregister(&self, role: &Role, conn_id: u64) {
        let mut inner = self.inner.lock().await;
        match role {
            Role::Display => {
                if inner.display.as_ref().is_some_and(|c| c.id == conn_id) {
                    inner.display = None;
                }
            }
            Role::Sender(session_id) => {
                if inner.senders.get(session_id).is_some_and(|c| c.id == conn_id) {
                    inner.senders.remove(session_id);
                }
            }
        }
    }

    async fn dispatch_inbound(
        &self,
        text: &str,
        role: Option<Role>,
        conn_id: u64,
        outbound: &mpsc::UnboundedSender<Message>,
    ) -> Option<Role> {
        if let Ok(sender_msg) = serde_json::from_str::<SenderMessage>(text) {
            let session_id = match &sender_msg {
                SenderMessage::SenderHello { session_id } => session_id.clone(),
                SenderMessage::WebrtcOffer { session_id, .. } => session_id.clone(),
                SenderMessage::IceCandidate { session_id, .. } => session_id.clone(),
            };
            self.register_sender(
                &session_id,
                ConnSink { id: conn_id, outbound: outbound.clone() },
            )
            .await;
            if !matches!(sender_msg, SenderMessage::SenderHello { .. }) {
                let _ = self.sender_events_tx.send(SenderEvent {
                    session_id: session_id.clone(),
                    message: sender_msg,
                });
            }
            return Some(Role::Sender(session_id));
        }

        if let Ok(display_msg) = serde_json::from_str::<DisplayInbound>(text) {
            let role = match role {
                Some(role) => role,
                None => {
                    self.register_display(ConnSink { id: conn_id, outbound: outbound.clone() }).await;
                    Role::Display
                }
            };
            let _ = self.display_events_tx.send(display_msg);
            return Some(role);
        }

        tracing::debug!("malformed display-transport payload, ignoring");
        role
    }
}

/// Run the display WebSocket accept loop until `shutdown` resolves.
pub async fn run(
    bind: String,
    port: u16,
    transport: Arc<DisplayTransport>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding display transport listener on {addr}"))?;
    tracing::info!(%addr, "display transport listener accepting connections");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(%err, "failed to accept display transport connection");
                        continue;
                    }
                };
                let transport = transport.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(socket, transport).await {
                        tracing::debug!(%peer_addr, %err, "display transport connection ended");
                    }
                });
            }
            _ = shutdown.changed() => {
                tracing::info!("display transport listener shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, transport: Arc<DisplayTransport>) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(socket)
        .await
        .context("WebSocket handshake failed")?;
    let conn_id = transport.next_conn_id.fetch_add(1, Ordering::Relaxed);
    let max_payload_bytes = transport.max_payload_bytes;
    let ping_interval = transport.ping_interval;
    run_connection_loop(ws, transport, conn_id, max_payload_bytes, ping_interval).await
}

async fn run_connection_loop(
    ws: WebSocketStream<TcpStream>,
    transport: Arc<DisplayTransport>,
    conn_id: u64,
    max_payload_bytes: usize,
    ping_interval: Duration,
) -> Result<()> {
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let mut role: Option<Role> = None;
    let mut last_pong = Instant::now();
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await; // discard the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if last_pong.elapsed() > ping_interval * 2 {
                    tracing::debug!("display transport connection is a zombie; closing");
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(Message::Close(frame)) => {
                        let _ = sink.send(Message::Close(frame)).await;
                        break;
                    }
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else { break };
                let incoming = match incoming {
                    Ok(incoming) => incoming,
                    Err(_) => break,
                };
                match incoming {
                    Message::Pong(_) => last_pong = Instant::now(),
                    Message::Close(_) => break,
                    Message::Text(text) => {
                        if text.len() > max_payload_bytes {
                            tracing::debug!("oversized display transport payload dropped");
                            continue;
                        }
                        role = transport.dispatch_inbound(&text, role, conn_id, &outbound_tx).await;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(role) = role {
        transport.deregister(&role, conn_id).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_is_dropped_silently_without_a_display() {
        let (transport, _display_rx, _sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        // No panics, no errors — just a debug log we don't assert on here.
        transport.send_command(&DisplayCommand::Play { request_id: 1 }).await;
    }

    #[tokio::test]
    async fn dispatch_sender_hello_registers_without_forwarding_event() {
        let (transport, _display_rx, mut sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        let (tx, _rx) = mpsc::unbounded_channel();
        let role = transport
            .dispatch_inbound(r#"{"type":"sender-hello","sessionId":"s1"}"#, None, 1, &tx)
            .await;
        assert!(matches!(role, Some(Role::Sender(ref id)) if id == "s1"));
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_sender_offer_forwards_event() {
        let (transport, _display_rx, mut sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        let (tx, _rx) = mpsc::unbounded_channel();
        let json = r#"{"type":"webrtc-offer","sessionId":"s1","sdp":"v=0\r\n"}"#;
        transport.dispatch_inbound(json, None, 1, &tx).await;
        let event = sender_rx.try_recv().expect("expected a forwarded sender event");
        assert_eq!(event.session_id, "s1");
    }

    #[tokio::test]
    async fn first_display_message_claims_the_slot() {
        let (transport, mut display_rx, _sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        let (tx, _rx) = mpsc::unbounded_channel();
        let role = transport
            .dispatch_inbound(r#"{"type":"PlayerStatus","state":"IDLE"}"#, None, 1, &tx)
            .await;
        assert!(matches!(role, Some(Role::Display)));
        assert!(display_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn displacing_the_display_closes_the_previous_connection() {
        let (transport, _display_rx, _sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        transport.register_display(ConnSink { id: 1, outbound: tx1 }).await;
        transport.register_display(ConnSink { id: 2, outbound: tx2 }).await;
        assert!(matches!(rx1.try_recv(), Ok(Message::Close(None))));
    }

    #[tokio::test]
    async fn deregister_ignores_an_already_displaced_connection() {
        let (transport, _display_rx, _sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        transport.register_display(ConnSink { id: 1, outbound: tx1 }).await;
        transport.register_display(ConnSink { id: 2, outbound: tx2 }).await;
        transport.deregister(&Role::Display, 1).await;
        // The newer connection (id 2) must still hold the slot.
        let inner = transport.inner.lock().await;
        assert!(inner.display.as_ref().is_some_and(|c| c.id == 2));
    }

    #[tokio::test]
    async fn malformed_payload_does_not_change_role() {
        let (transport, _display_rx, _sender_rx) = DisplayTransport::new(64 * 1024, Duration::from_secs(30));
        let (tx, _rx) = mpsc::unbounded_channel();
        let role = transport.dispatch_inbound("not json at all {", None, 1, &tx).await;
        assert!(role.is_none());
    }
}
