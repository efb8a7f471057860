//! C7 — wires the display transport and the signaling relay together and
//! drains the event streams each produces.

use std::sync::Arc;

use castbridge_protocol::signaling::{DisplayCommand, DisplayInbound, SenderMessage};
use tokio::sync::mpsc;

use crate::display::{DisplayTransport, SenderEvent};
use crate::signaling::{ReplyTarget, SignalingRelay};

pub struct Orchestrator {
    display: Arc<DisplayTransport>,
    relay: Arc<SignalingRelay>,
}

impl Orchestrator {
    pub fn display(&self) -> Arc<DisplayTransport> {
        self.display.clone()
    }

    pub fn relay(&self) -> Arc<SignalingRelay> {
        self.relay.clone()
    }

    /// A CastV2 connection's `remoting` namespace reported mirroring has
    /// stopped: tell the display, then drop all relay state for the session.
    pub async fn mirroring_stop(&self, session_id: &str) {
        self.display
            .send_command(&DisplayCommand::MirrorStop { session_id: session_id.to_string() })
            .await;
        self.relay.close_session(session_id).await;
    }

    /// Build the orchestrator and spawn its two event-draining tasks.
    pub fn spawn(
        display: Arc<DisplayTransport>,
        relay: Arc<SignalingRelay>,
        display_events: mpsc::UnboundedReceiver<DisplayInbound>,
        sender_events: mpsc::UnboundedReceiver<SenderEvent>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self { display, relay });
        tokio::spawn(drain_display_events(orchestrator.relay.clone(), display_events));
        tokio::spawn(drain_sender_events(orchestrator.relay.clone(), sender_events));
        orchestrator
    }
}

async fn drain_display_events(relay: Arc<SignalingRelay>, mut events: mpsc::UnboundedReceiver<DisplayInbound>) {
    while let Some(event) = events.recv().await {
        match event {
            DisplayInbound::PlayerStatus { .. } => {
                tracing::debug!("display player status received");
            }
            DisplayInbound::WebrtcAnswer { session_id, sdp } => {
                relay.handle_display_answer(&session_id, sdp).await;
            }
            DisplayInbound::IceCandidate { session_id, candidate } => {
                relay.handle_display_candidate(&session_id, candidate).await;
            }
        }
    }
}

async fn drain_sender_events(relay: Arc<SignalingRelay>, mut events: mpsc::UnboundedReceiver<SenderEvent>) {
    while let Some(SenderEvent { session_id, message }) = events.recv().await {
        match message {
            SenderMessage::SenderHello { .. } => {}
            SenderMessage::WebrtcOffer { sdp, .. } => {
                relay.handle_offer(session_id, sdp, ReplyTarget::DisplayTransportSender).await;
            }
            SenderMessage::IceCandidate { candidate, .. } => {
                relay.handle_sender_candidate(&session_id, candidate).await;
            }
        }
    }
}
