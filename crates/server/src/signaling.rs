//! C4 — the WebRTC signaling relay.
//!
//! A signaling session moves `(none) -> OFFERED -> ANSWERED -> closed`.
//! Sender-originated ICE candidates arriving before an answer are buffered
//! FIFO and flushed once the display answers; candidates and answers for an
//! unknown or already-closed session are dropped without error. A session
//! is reachable from two kinds of originator — a CastV2 connection's
//! `webrtc` namespace, or a sender WebSocket on the display transport —
//! both route through the same [`ReplyTarget`] abstraction so the relay
//! never needs to know which one it's talking to.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use castbridge_protocol::cast::{CastMessage, NS_WEBRTC};
use castbridge_protocol::signaling::DisplayCommand;
use tokio::sync::{Mutex, mpsc};

use crate::display::DisplayTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Offered,
    Answered,
}

/// Where a signaling session's answer and display-originated candidates go.
#[derive(Clone)]
pub enum ReplyTarget {
    /// A CastV2 connection's own write channel; source/destination are
    /// already the values this session needs on every outbound frame.
    CastV2 {
        tx: mpsc::UnboundedSender<CastMessage>,
        source_id: String,
        destination_id: String,
        seq_num: u64,
    },
    /// A sender connection on the display transport, looked up by session
    /// id at delivery time.
    DisplayTransportSender,
}

struct Session {
    state: SessionState,
    reply: ReplyTarget,
    pending_sender_candidates: VecDeque<serde_json::Value>,
    last_activity: Instant,
}

pub struct SignalingRelay {
    sessions: Mutex<HashMap<String, Session>>,
    display: Arc<DisplayTransport>,
    session_ttl: Duration,
}

impl SignalingRelay {
    pub fn new(display: Arc<DisplayTransport>, session_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            display,
            session_ttl,
        })
    }

    /// Record a fresh offer and forward it to the display. Any existing
    /// session under this id is replaced — a renegotiation starts clean.
    pub async fn handle_offer(&self, session_id: String, sdp: String, reply: ReplyTarget) {
        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(
                session_id.clone(),
                Session {
                    state: SessionState::Offered,
                    reply,
                    pending_sender_candidates: VecDeque::new(),
                    last_activity: Instant::now(),
                },
            );
        }
        self.display
            .send_command(&DisplayCommand::WebrtcOffer { session_id, sdp })
            .await;
    }

    /// A sender-originated ICE candidate. Buffered until the session is
    /// answered, then forwarded immediately. Dropped if the session is gone.
    pub async fn handle_sender_candidate(&self, session_id: &str, candidate: serde_json::Value) {
        let forward = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                tracing::debug!(session_id, "ICE candidate for unknown/closed signaling session dropped");
                return;
            };
            session.last_activity = Instant::now();
            match session.state {
                SessionState::Offered => {
                    session.pending_sender_candidates.push_back(candidate);
                    false
                }
                SessionState::Answered => true,
            }
        };
        if forward {
            self.display
                .send_command(&DisplayCommand::IceCandidate {
                    session_id: session_id.to_string(),
                    candidate,
                })
                .await;
        }
    }

    /// The display answered an offer: mark the session answered, deliver
    /// the answer to the originator, then flush any buffered candidates.
    pub async fn handle_display_answer(&self, session_id: &str, sdp: String) {
        let (reply, flushed) = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                tracing::debug!(session_id, "answer for unknown/closed signaling session dropped");
                return;
            };
            if session.state == SessionState::Answered {
                // A second answer for an already-answered session is a no-op —
                // there's no pending callback left to consume it.
                tracing::debug!(session_id, "duplicate answer for already-answered session ignored");
                return;
            }
            session.state = SessionState::Answered;
            session.last_activity = Instant::now();
            let flushed: Vec<_> = session.pending_sender_candidates.drain(..).collect();
            (session.reply.clone(), flushed)
        };

        self.deliver_answer(session_id, &sdp, &reply).await;

        for candidate in flushed {
            self.display
                .send_command(&DisplayCommand::IceCandidate {
                    session_id: session_id.to_string(),
                    candidate,
                })
                .await;
        }
    }

    /// A display-originated ICE candidate, forwarded to whichever sender
    /// opened this session.
    pub async fn handle_display_candidate(&self, session_id: &str, candidate: serde_json::Value) {
        let reply = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                tracing::debug!(session_id, "display ICE candidate for unknown/closed session dropped");
                return;
            };
            session.last_activity = Instant::now();
            session.reply.clone()
        };
        self.deliver_candidate(session_id, candidate, &reply).await;
    }

    pub async fn close_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    async fn deliver_answer(&self, session_id: &str, sdp: &str, reply: &ReplyTarget) {
        match reply {
            ReplyTarget::CastV2 { tx, source_id, destination_id, seq_num } => {
                let payload = serde_json::json!({"type": "ANSWER", "seqNum": seq_num, "answer": {"sdp": sdp}});
                let message = CastMessage::json(source_id, destination_id, NS_WEBRTC, &payload);
                let _ = tx.send(message);
            }
            ReplyTarget::DisplayTransportSender => {
                self.display
                    .send_to_sender(
                        session_id,
                        &serde_json::json!({"type": "webrtc-answer", "sessionId": session_id, "sdp": sdp}),
                    )
                    .await;
            }
        }
    }

    async fn deliver_candidate(&self, session_id: &str, candidate: serde_json::Value, reply: &ReplyTarget) {
        match reply {
            ReplyTarget::CastV2 { tx, source_id, destination_id, seq_num } => {
                let payload = serde_json::json!({"type": "ICE_CANDIDATE", "seqNum": seq_num, "candidate": candidate});
                let message = CastMessage::json(source_id, destination_id, NS_WEBRTC, &payload);
                let _ = tx.send(message);
            }
            ReplyTarget::DisplayTransportSender => {
                self.display
                    .send_to_sender(
                        session_id,
                        &serde_json::json!({"type": "ice-candidate", "sessionId": session_id, "candidate": candidate}),
                    )
                    .await;
            }
        }
    }
}

/// Sweep inactive signaling sessions every `interval`, reaping anything idle
/// longer than the relay's configured TTL and telling the display to stop
/// any in-progress mirroring for that session.
pub fn spawn_reaper(relay: Arc<SignalingRelay>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let expired: Vec<String> = {
                let sessions = relay.sessions.lock().await;
                sessions
                    .iter()
                    .filter(|(_, session)| session.last_activity.elapsed() >= relay.session_ttl)
                    .map(|(session_id, _)| session_id.clone())
                    .collect()
            };
            for session_id in expired {
                relay.sessions.lock().await.remove(&session_id);
                relay
                    .display
                    .send_command(&DisplayCommand::MirrorStop { session_id: session_id.clone() })
                    .await;
                tracing::info!(session_id, "signaling session reaped after inactivity");
            }
        }
    });
}
