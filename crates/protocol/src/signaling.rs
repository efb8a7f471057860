//! JSON messages exchanged with the display transport WebSocket.
//!
//! Three tagged-union shapes: what a sender (the in-page mirroring client)
//! sends, what the display (the HTML player) sends back, and what this
//! bridge pushes to the display. All use an externally-visible `"type"`
//! field so the relay and the display page can dispatch on it directly.

use serde::{Deserialize, Serialize};

/// A message from a sender connection on the display WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SenderMessage {
    /// Reclassifies this connection from "unclassified" to "sender" for a
    /// given signaling session, once it's known which session it belongs to.
    SenderHello {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    WebrtcOffer {
        #[serde(rename = "sessionId")]
        session_id: String,
        sdp: String,
    },
    IceCandidate {
        #[serde(rename = "sessionId")]
        session_id: String,
        candidate: serde_json::Value,
    },
}

/// A message from the single display connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DisplayInbound {
    #[serde(rename = "PlayerStatus")]
    PlayerStatus {
        #[serde(flatten)]
        status: serde_json::Value,
    },
    #[serde(rename = "webrtc-answer")]
    WebrtcAnswer {
        #[serde(rename = "sessionId")]
        session_id: String,
        sdp: String,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        #[serde(rename = "sessionId")]
        session_id: String,
        candidate: serde_json::Value,
    },
}

/// A command pushed from this bridge down to the display connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DisplayCommand {
    Load {
        url: String,
        #[serde(rename = "contentType")]
        content_type: String,
        #[serde(rename = "streamType")]
        stream_type: String,
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "requestId")]
        request_id: i64,
    },
    Play {
        #[serde(rename = "requestId")]
        request_id: i64,
    },
    Pause {
        #[serde(rename = "requestId")]
        request_id: i64,
    },
    Seek {
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "requestId")]
        request_id: i64,
    },
    Stop {
        #[serde(rename = "requestId")]
        request_id: i64,
    },
    Volume {
        volume: f64,
        #[serde(rename = "requestId")]
        request_id: i64,
    },
    WebrtcOffer {
        #[serde(rename = "sessionId")]
        session_id: String,
        sdp: String,
    },
    IceCandidate {
        #[serde(rename = "sessionId")]
        session_id: String,
        candidate: serde_json::Value,
    },
    MirrorStop {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}
