//! C5 — the per-connection CastV2 session.
//!
//! One task per connection: a read loop drains the socket through a
//! [`FrameDecoder`], dispatching each decoded message by namespace; a write
//! task drains an mpsc channel and serializes replies back out. Other
//! components (the signaling relay) hold only that write channel plus the
//! source/destination ids they need, never the session itself — an answer
//! arriving minutes later doesn't keep this connection's state alive.

use std::sync::Arc;

use anyhow::{Context, Result};
use castbridge_protocol::cast::{
    CastMessage, ConnectionInbound, DEFAULT_MEDIA_RECEIVER_APP_ID, HeartbeatInbound, MediaInbound,
    MediaDescriptorOut, MediaStatusEntry, NS_CONNECTION, NS_DEBUGOVERLAY, NS_HEARTBEAT, NS_MEDIA, NS_RECEIVER,
    NS_REMOTING, NS_WEBRTC, NamespaceEntry, ReceiverApplication, ReceiverInbound, ReceiverStatusBody,
    RemotingInbound, SUPPORTED_MEDIA_COMMANDS, Volume, WebrtcInbound, decode_payload,
};
use castbridge_protocol::frame::{FrameDecoder, FrameError, FrameEvent, encode};
use castbridge_protocol::signaling::DisplayCommand;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::orchestrator::Orchestrator;
use crate::signaling::ReplyTarget;

const READ_CHUNK_SIZE: usize = 16 * 1024;

struct State {
    session_id: String,
    transport_id: String,
    volume: Volume,
    media: MediaStatusEntry,
    next_media_session_id: i64,
}

/// Fresh media state for a connection that hasn't loaded anything yet, or
/// has just been stopped — never an absent/empty status.
fn idle_media_status(volume: Volume) -> MediaStatusEntry {
    MediaStatusEntry {
        media_session_id: 0,
        playback_rate: 1.0,
        player_state: "IDLE".to_string(),
        current_time: 0.0,
        supported_media_commands: SUPPORTED_MEDIA_COMMANDS,
        volume,
        media: None,
    }
}

impl State {
    fn new() -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let transport_id = format!("transport-{}", &session_id[..8]);
        let volume = Volume::default();
        Self {
            session_id,
            transport_id,
            media: idle_media_status(volume.clone()),
            volume,
            next_media_session_id: 1,
        }
    }
}

/// Drive one CastV2 connection to completion.
pub async fn run(
    stream: tokio_rustls::server::TlsStream<TcpStream>,
    orchestrator: Arc<Orchestrator>,
    max_frame_len: usize,
) -> Result<()> {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<CastMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = write_rx.recv().await {
            let bytes = encode(&message);
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut state = State::new();
    let mut decoder = FrameDecoder::with_max_len(max_frame_len);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let result = 'outer: loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break 'outer Ok(()),
            Ok(n) => n,
            Err(err) => break 'outer Err(err).context("reading from CastV2 socket"),
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_next() {
                Ok(Some(FrameEvent::Message(message))) => {
                    dispatch(message, &mut state, &write_tx, &orchestrator).await;
                }
                Ok(Some(FrameEvent::Skipped)) => {
                    tracing::debug!(session_id = %state.session_id, "skipped malformed CastMessage frame");
                }
                Ok(None) => break,
                Err(FrameError::LengthExceeded { declared, max }) => {
                    break 'outer Err(anyhow::anyhow!(
                        "frame length {declared} exceeds the {max}-byte cap; closing connection"
                    ));
                }
            }
        }
    };

    orchestrator.relay().close_session(&state.session_id).await;
    drop(write_tx);
    let _ = writer.await;
    result
}

async fn dispatch(message: CastMessage, state: &mut State, write_tx: &mpsc::UnboundedSender<CastMessage>, orchestrator: &Arc<Orchestrator>) {
    let value = message.payload_value();
    match message.namespace.as_str() {
        NS_CONNECTION => match decode_payload::<ConnectionInbound>(value) {
            ConnectionInbound::Connect { request_id } => {
                let reply = CastMessage::reply(&message, NS_CONNECTION, &serde_json::json!({"type": "CONNECTED", "requestId": request_id}));
                let _ = write_tx.send(reply);
            }
            ConnectionInbound::Close => tracing::debug!(session_id = %state.session_id, "sender closed connection"),
            ConnectionInbound::Unknown => tracing::debug!(namespace = NS_CONNECTION, "unrecognized connection message"),
        },
        NS_HEARTBEAT => match decode_payload::<HeartbeatInbound>(value) {
            HeartbeatInbound::Ping => {
                let reply = CastMessage::reply(&message, NS_HEARTBEAT, &serde_json::json!({"type": "PONG"}));
                let _ = write_tx.send(reply);
            }
            HeartbeatInbound::Unknown => tracing::debug!(namespace = NS_HEARTBEAT, "unrecognized heartbeat message"),
        },
        NS_RECEIVER => dispatch_receiver(message, value, state, write_tx, orchestrator).await,
        NS_MEDIA => dispatch_media(message, value, state, write_tx, orchestrator).await,
        NS_WEBRTC => dispatch_webrtc(message, value, state, write_tx, orchestrator).await,
        NS_REMOTING => dispatch_remoting(message, value, state, write_tx, orchestrator).await,
        other => tracing::debug!(namespace = other, "unrecognized namespace, no reply"),
    }
}

/// Namespaces advertised on the fictitious Default Media Receiver application.
fn default_receiver_namespaces() -> Vec<NamespaceEntry> {
    [NS_MEDIA, NS_WEBRTC, NS_REMOTING, NS_DEBUGOVERLAY]
        .into_iter()
        .map(|name| NamespaceEntry { name: name.to_string() })
        .collect()
}

async fn dispatch_receiver(
    message: CastMessage,
    value: serde_json::Value,
    state: &mut State,
    write_tx: &mpsc::UnboundedSender<CastMessage>,
    orchestrator: &Arc<Orchestrator>,
) {
    match decode_payload::<ReceiverInbound>(value) {
        ReceiverInbound::GetStatus { request_id } => {
            send_receiver_status(&message, state, request_id, write_tx);
        }
        ReceiverInbound::Launch { request_id, .. } => {
            send_receiver_status(&message, state, request_id, write_tx);
        }
        ReceiverInbound::Stop { request_id } => {
            state.media = idle_media_status(state.volume.clone());
            orchestrator.display().send_command(&DisplayCommand::Stop { request_id }).await;
            send_receiver_status(&message, state, request_id, write_tx);
        }
        ReceiverInbound::Unknown => tracing::debug!(namespace = NS_RECEIVER, "unrecognized receiver message"),
    }
}

/// The fictitious Default Media Receiver application, reported identically
/// on every `RECEIVER_STATUS` regardless of prior `LAUNCH`/`STOP` traffic.
fn current_application(state: &State) -> ReceiverApplication {
    ReceiverApplication {
        app_id: DEFAULT_MEDIA_RECEIVER_APP_ID.to_string(),
        session_id: state.session_id.clone(),
        transport_id: state.transport_id.clone(),
        namespaces: default_receiver_namespaces(),
    }
}

fn send_receiver_status(request: &CastMessage, state: &State, request_id: i64, write_tx: &mpsc::UnboundedSender<CastMessage>) {
    let status = ReceiverStatusBody {
        applications: vec![current_application(state)],
        volume: state.volume.clone(),
    };
    let payload = serde_json::json!({"type": "RECEIVER_STATUS", "requestId": request_id, "status": status});
    let reply = CastMessage::reply(request, NS_RECEIVER, &payload);
    let _ = write_tx.send(reply);
}

async fn dispatch_media(
    message: CastMessage,
    value: serde_json::Value,
    state: &mut State,
    write_tx: &mpsc::UnboundedSender<CastMessage>,
    orchestrator: &Arc<Orchestrator>,
) {
    let display = orchestrator.display();
    match decode_payload::<MediaInbound>(value) {
        MediaInbound::GetStatus { request_id } => send_media_status(&message, state, request_id, write_tx),
        MediaInbound::Load { request_id, media, current_time } => {
            let media_session_id = state.next_media_session_id;
            state.next_media_session_id += 1;
            let current_time = current_time.unwrap_or(0.0);
            let descriptor = MediaDescriptorOut::from(&media);
            display
                .send_command(&DisplayCommand::Load {
                    url: descriptor.content_id.clone(),
                    content_type: descriptor.content_type.clone(),
                    stream_type: descriptor.stream_type.clone(),
                    current_time,
                    request_id,
                })
                .await;
            state.media = MediaStatusEntry {
                media_session_id,
                playback_rate: 1.0,
                player_state: "PLAYING".to_string(),
                current_time,
                supported_media_commands: SUPPORTED_MEDIA_COMMANDS,
                volume: state.volume.clone(),
                media: Some(descriptor),
            };
            send_media_status(&message, state, request_id, write_tx);
        }
        MediaInbound::Play { request_id } => {
            display.send_command(&DisplayCommand::Play { request_id }).await;
            state.media.player_state = "PLAYING".to_string();
            send_media_status(&message, state, request_id, write_tx);
        }
        MediaInbound::Pause { request_id } => {
            display.send_command(&DisplayCommand::Pause { request_id }).await;
            state.media.player_state = "PAUSED".to_string();
            send_media_status(&message, state, request_id, write_tx);
        }
        MediaInbound::Seek { request_id, current_time } => {
            let current_time = current_time.unwrap_or(0.0);
            display.send_command(&DisplayCommand::Seek { current_time, request_id }).await;
            state.media.current_time = current_time;
            send_media_status(&message, state, request_id, write_tx);
        }
        MediaInbound::Stop { request_id } => {
            display.send_command(&DisplayCommand::Stop { request_id }).await;
            state.media = idle_media_status(state.volume.clone());
            send_media_status(&message, state, request_id, write_tx);
        }
        MediaInbound::SetVolume { request_id, volume } | MediaInbound::Volume { request_id, volume } => {
            if let Some(level) = volume.level {
                state.volume.level = level;
            }
            if let Some(muted) = volume.muted {
                state.volume.muted = muted;
            }
            state.media.volume = state.volume.clone();
            display.send_command(&DisplayCommand::Volume { volume: state.volume.level, request_id }).await;
            send_media_status(&message, state, request_id, write_tx);
        }
        MediaInbound::Unknown => tracing::debug!(namespace = NS_MEDIA, "unrecognized media message"),
    }
}

fn send_media_status(request: &CastMessage, state: &State, request_id: i64, write_tx: &mpsc::UnboundedSender<CastMessage>) {
    let payload = serde_json::json!({"type": "MEDIA_STATUS", "requestId": request_id, "status": [&state.media]});
    let reply = CastMessage::reply(request, NS_MEDIA, &payload);
    let _ = write_tx.send(reply);
}

async fn dispatch_webrtc(
    message: CastMessage,
    value: serde_json::Value,
    state: &mut State,
    write_tx: &mpsc::UnboundedSender<CastMessage>,
    orchestrator: &Arc<Orchestrator>,
) {
    match decode_payload::<WebrtcInbound>(value) {
        WebrtcInbound::Offer { seq_num, offer } => {
            let reply = ReplyTarget::CastV2 {
                tx: write_tx.clone(),
                source_id: message.destination_id.clone(),
                destination_id: message.source_id.clone(),
                seq_num,
            };
            orchestrator.relay().handle_offer(state.session_id.clone(), offer.sdp, reply).await;
        }
        WebrtcInbound::IceCandidate { candidate, .. } => {
            if let Some(candidate) = candidate {
                orchestrator.relay().handle_sender_candidate(&state.session_id, candidate).await;
            }
        }
        WebrtcInbound::Unknown => tracing::debug!(namespace = NS_WEBRTC, "unrecognized webrtc message"),
    }
}

async fn dispatch_remoting(
    message: CastMessage,
    value: serde_json::Value,
    state: &State,
    write_tx: &mpsc::UnboundedSender<CastMessage>,
    orchestrator: &Arc<Orchestrator>,
) {
    let reply_type = match decode_payload::<RemotingInbound>(value) {
        RemotingInbound::Setup => "SETUP_OK",
        RemotingInbound::Start => "START_OK",
        RemotingInbound::Stop => {
            orchestrator.mirroring_stop(&state.session_id).await;
            "STOP_OK"
        }
        RemotingInbound::Unknown => {
            tracing::debug!(namespace = NS_REMOTING, "unrecognized remoting message");
            return;
        }
    };
    let reply = CastMessage::reply(&message, NS_REMOTING, &serde_json::json!({"type": reply_type}));
    let _ = write_tx.send(reply);
}

#[cfg(test)]
mod tests {
    use super::*;
    use castbridge_protocol::cast::{NS_MEDIA, PayloadType, ProtocolVersion};

    fn request(namespace: &str, payload: serde_json::Value) -> CastMessage {
        CastMessage {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: "sender-0".to_string(),
            destination_id: "receiver-0".to_string(),
            namespace: namespace.to_string(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(payload.to_string()),
            payload_binary: None,
        }
    }

    #[test]
    fn new_state_starts_idle_with_no_loaded_media() {
        let state = State::new();
        assert_eq!(state.media.player_state, "IDLE");
        assert!(state.media.media.is_none());
        assert_eq!(state.next_media_session_id, 1);
    }

    #[test]
    fn transport_id_is_derived_from_the_first_eight_hex_chars_of_session_id() {
        let state = State::new();
        assert_eq!(state.transport_id, format!("transport-{}", &state.session_id[..8]));
    }

    #[tokio::test]
    async fn connect_replies_with_connected_echoing_request_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();
        let message = request(NS_CONNECTION, serde_json::json!({"type": "CONNECT", "requestId": 7}));
        dispatch(message, &mut state, &tx, &orchestrator).await;
        let reply = rx.try_recv().expect("expected a CONNECTED reply");
        assert_eq!(reply.source_id, "receiver-0");
        assert_eq!(reply.destination_id, "sender-0");
        assert_eq!(reply.payload_value()["type"], "CONNECTED");
        assert_eq!(reply.payload_value()["requestId"], 7);
    }

    #[tokio::test]
    async fn heartbeat_ping_replies_with_pong_swapping_source_and_destination() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let message = request(NS_HEARTBEAT, serde_json::json!({"type": "PING"}));
        let orchestrator = test_orchestrator();
        dispatch(message, &mut state, &tx, &orchestrator).await;
        let reply = rx.try_recv().expect("expected a PONG reply");
        assert_eq!(reply.source_id, "receiver-0");
        assert_eq!(reply.destination_id, "sender-0");
        assert_eq!(reply.payload_value()["type"], "PONG");
    }

    #[tokio::test]
    async fn receiver_get_status_without_launch_reports_the_fictitious_application() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();

        let get_status = request(NS_RECEIVER, serde_json::json!({"type": "GET_STATUS", "requestId": 1}));
        dispatch(get_status, &mut state, &tx, &orchestrator).await;
        let status = rx.try_recv().unwrap();
        assert_eq!(status.payload_value()["status"]["applications"][0]["appId"], "CC1AD845");
        let namespaces = status.payload_value()["status"]["applications"][0]["namespaces"].clone();
        assert_eq!(namespaces.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn receiver_stop_still_reports_the_fictitious_application_but_resets_media() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();

        let launch = request(NS_RECEIVER, serde_json::json!({"type": "LAUNCH", "requestId": 1, "appId": "CC1AD845"}));
        dispatch(launch, &mut state, &tx, &orchestrator).await;
        rx.try_recv().unwrap();

        let stop = request(NS_RECEIVER, serde_json::json!({"type": "STOP", "requestId": 2}));
        dispatch(stop, &mut state, &tx, &orchestrator).await;
        let status = rx.try_recv().unwrap();
        assert_eq!(status.payload_value()["status"]["applications"][0]["appId"], "CC1AD845");
        assert_eq!(state.media.player_state, "IDLE");
    }

    #[tokio::test]
    async fn media_load_assigns_monotonically_increasing_session_ids() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();

        let load_payload = serde_json::json!({
            "type": "LOAD", "requestId": 1,
            "media": {"contentId": "a", "contentType": "video/mp4", "streamType": "BUFFERED"},
        });
        dispatch(request(NS_MEDIA, load_payload.clone()), &mut state, &tx, &orchestrator).await;
        rx.try_recv().unwrap();
        let first_id = state.media.media_session_id;

        dispatch(request(NS_MEDIA, load_payload), &mut state, &tx, &orchestrator).await;
        rx.try_recv().unwrap();
        let second_id = state.media.media_session_id;

        assert!(second_id > first_id);
    }

    #[tokio::test]
    async fn media_get_status_before_any_load_reports_one_idle_entry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();
        let message = request(NS_MEDIA, serde_json::json!({"type": "GET_STATUS", "requestId": 1}));
        dispatch(message, &mut state, &tx, &orchestrator).await;
        let status = rx.try_recv().unwrap();
        let entries = status.payload_value()["status"].as_array().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["playerState"], "IDLE");
    }

    #[tokio::test]
    async fn media_load_reply_echoes_request_id_and_content_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();
        let load_payload = serde_json::json!({
            "type": "LOAD", "requestId": 10,
            "media": {"contentId": "http://example.com/v.mp4", "contentType": "video/mp4", "streamType": "BUFFERED"},
        });
        dispatch(request(NS_MEDIA, load_payload), &mut state, &tx, &orchestrator).await;
        let status = rx.try_recv().unwrap();
        assert_eq!(status.payload_value()["requestId"], 10);
        assert_eq!(status.payload_value()["status"][0]["playerState"], "PLAYING");
        assert_eq!(status.payload_value()["status"][0]["media"]["contentId"], "http://example.com/v.mp4");
    }

    #[tokio::test]
    async fn unknown_namespace_produces_no_reply() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();
        let message = request("urn:x-cast:com.example.unknown", serde_json::json!({"type": "ANYTHING"}));
        dispatch(message, &mut state, &tx, &orchestrator).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ice_candidate_without_a_candidate_field_is_dropped_without_panic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();
        let message = request(NS_WEBRTC, serde_json::json!({"type": "ICE_CANDIDATE", "seqNum": 1}));
        dispatch(message, &mut state, &tx, &orchestrator).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remoting_setup_start_stop_reply_with_ok_statuses() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = State::new();
        let orchestrator = test_orchestrator();

        dispatch(request(NS_REMOTING, serde_json::json!({"type": "SETUP"})), &mut state, &tx, &orchestrator).await;
        assert_eq!(rx.try_recv().unwrap().payload_value()["type"], "SETUP_OK");

        dispatch(request(NS_REMOTING, serde_json::json!({"type": "START"})), &mut state, &tx, &orchestrator).await;
        assert_eq!(rx.try_recv().unwrap().payload_value()["type"], "START_OK");

        dispatch(request(NS_REMOTING, serde_json::json!({"type": "STOP"})), &mut state, &tx, &orchestrator).await;
        assert_eq!(rx.try_recv().unwrap().payload_value()["type"], "STOP_OK");
    }

    fn test_orchestrator() -> Arc<Orchestrator> {
        let (display, display_rx, sender_rx) =
            crate::display::DisplayTransport::new(64 * 1024, std::time::Duration::from_secs(30));
        let relay = crate::signaling::SignalingRelay::new(display.clone(), std::time::Duration::from_secs(60));
        Orchestrator::spawn(display, relay, display_rx, sender_rx)
    }
}
