//! CastV2 wire types: the protobuf envelope and the per-namespace JSON
//! payloads carried inside it.
//!
//! The JSON payload is intentionally schemaless at the protobuf layer —
//! each namespace below models its own known `type` values as an enum
//! variant and falls through to `Unknown` for anything else, so a
//! namespace dispatcher never has to guess at a shared "any" shape.

use serde::{Deserialize, Serialize};

/// `urn:x-cast:com.google.cast.tp.connection`
pub const NS_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
/// `urn:x-cast:com.google.cast.tp.heartbeat`
pub const NS_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
/// `urn:x-cast:com.google.cast.receiver`
pub const NS_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
/// `urn:x-cast:com.google.cast.media`
pub const NS_MEDIA: &str = "urn:x-cast:com.google.cast.media";
/// `urn:x-cast:com.google.cast.webrtc`
pub const NS_WEBRTC: &str = "urn:x-cast:com.google.cast.webrtc";
/// `urn:x-cast:com.google.cast.remoting`
pub const NS_REMOTING: &str = "urn:x-cast:com.google.cast.remoting";
/// `urn:x-cast:com.google.cast.debugoverlay`
pub const NS_DEBUGOVERLAY: &str = "urn:x-cast:com.google.cast.debugoverlay";

/// App id of the fictitious Default Media Receiver every generic sender targets.
pub const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

/// Frames declaring a length above this are rejected and the connection destroyed.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Castv210 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    String = 0,
    Binary = 1,
}

/// The single protobuf envelope exchanged on the CastV2 stream.
#[derive(Clone, Debug, PartialEq, prost::Message)]
pub struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", tag = "1")]
    pub protocol_version: i32,
    #[prost(string, tag = "2")]
    pub source_id: String,
    #[prost(string, tag = "3")]
    pub destination_id: String,
    #[prost(string, tag = "4")]
    pub namespace: String,
    #[prost(enumeration = "PayloadType", tag = "5")]
    pub payload_type: i32,
    #[prost(string, optional, tag = "6")]
    pub payload_utf8: Option<String>,
    #[prost(bytes, optional, tag = "7")]
    pub payload_binary: Option<Vec<u8>>,
}

impl CastMessage {
    /// Build a STRING-payload CastMessage carrying `payload` as JSON.
    pub fn json(source_id: &str, destination_id: &str, namespace: &str, payload: &impl Serialize) -> Self {
        let payload_utf8 = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
        Self {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: source_id.to_string(),
            destination_id: destination_id.to_string(),
            namespace: namespace.to_string(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(payload_utf8),
            payload_binary: None,
        }
    }

    /// A reply swaps source and destination relative to the request it answers.
    pub fn reply(request: &CastMessage, namespace: &str, payload: &impl Serialize) -> Self {
        Self::json(&request.destination_id, &request.source_id, namespace, payload)
    }

    /// Parse `payload_utf8` as JSON, falling back to an empty object on malformed input.
    pub fn payload_value(&self) -> serde_json::Value {
        self.payload_utf8
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// Decode a namespace payload into a concrete inbound variant, defaulting to
/// `T::default_unknown()`-shaped behavior via `#[serde(other)]` — malformed
/// JSON, a missing `type` tag, or an unrecognized `type` all land on the
/// catch-all variant rather than erroring the dispatcher.
pub fn decode_payload<T: for<'de> Deserialize<'de> + Default>(value: serde_json::Value) -> T
where
    T: DecodeOrUnknown,
{
    serde_json::from_value(value).unwrap_or_default()
}

/// Marker trait for inbound payload enums whose `Default` is the `Unknown` variant.
pub trait DecodeOrUnknown {}

fn default_request_id() -> i64 {
    0
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionInbound {
    #[serde(rename = "CONNECT")]
    Connect {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(rename = "CLOSE")]
    Close,
    #[serde(other)]
    #[default]
    Unknown,
}
impl DecodeOrUnknown for ConnectionInbound {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type")]
pub enum HeartbeatInbound {
    #[serde(rename = "PING")]
    Ping,
    #[serde(other)]
    #[default]
    Unknown,
}
impl DecodeOrUnknown for HeartbeatInbound {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReceiverInbound {
    #[serde(rename = "GET_STATUS")]
    GetStatus {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(rename = "LAUNCH")]
    Launch {
        #[serde(default = "default_request_id")]
        request_id: i64,
        #[serde(default)]
        app_id: Option<String>,
    },
    #[serde(rename = "STOP")]
    Stop {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(other)]
    #[default]
    Unknown,
}
impl DecodeOrUnknown for ReceiverInbound {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    pub content_id: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub stream_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePatch {
    pub level: Option<f64>,
    pub muted: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MediaInbound {
    #[serde(rename = "GET_STATUS")]
    GetStatus {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(rename = "LOAD")]
    Load {
        #[serde(default = "default_request_id")]
        request_id: i64,
        media: MediaDescriptor,
        #[serde(default)]
        current_time: Option<f64>,
    },
    #[serde(rename = "PLAY")]
    Play {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(rename = "PAUSE")]
    Pause {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(rename = "SEEK")]
    Seek {
        #[serde(default = "default_request_id")]
        request_id: i64,
        #[serde(default)]
        current_time: Option<f64>,
    },
    #[serde(rename = "STOP")]
    Stop {
        #[serde(default = "default_request_id")]
        request_id: i64,
    },
    #[serde(rename = "SET_VOLUME")]
    SetVolume {
        #[serde(default = "default_request_id")]
        request_id: i64,
        #[serde(default)]
        volume: VolumePatch,
    },
    #[serde(rename = "VOLUME")]
    Volume {
        #[serde(default = "default_request_id")]
        request_id: i64,
        #[serde(default)]
        volume: VolumePatch,
    },
    #[serde(other)]
    #[default]
    Unknown,
}
impl DecodeOrUnknown for MediaInbound {}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferPayload {
    pub sdp: String,
}

fn default_seq_num() -> u64 {
    0
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WebrtcInbound {
    #[serde(rename = "OFFER")]
    Offer {
        #[serde(default = "default_seq_num")]
        seq_num: u64,
        offer: OfferPayload,
    },
    #[serde(rename = "ICE_CANDIDATE")]
    IceCandidate {
        #[serde(default = "default_seq_num")]
        seq_num: u64,
        candidate: Option<serde_json::Value>,
    },
    #[serde(other)]
    #[default]
    Unknown,
}
impl DecodeOrUnknown for WebrtcInbound {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type")]
pub enum RemotingInbound {
    #[serde(rename = "SETUP")]
    Setup,
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(other)]
    #[default]
    Unknown,
}
impl DecodeOrUnknown for RemotingInbound {}

/// Volume block advertised by the receiver and by media status entries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub control_type: String,
    pub level: f64,
    pub muted: bool,
    pub step_interval: f64,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            control_type: "attenuation".to_string(),
            level: 1.0,
            muted: false,
            step_interval: 0.05,
        }
    }
}

/// The fictitious "currently running" Default Media Receiver application.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverApplication {
    pub app_id: String,
    pub session_id: String,
    pub transport_id: String,
    pub namespaces: Vec<NamespaceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceEntry {pub name: String}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStatusBody {
    pub applications: Vec<ReceiverApplication>,
    pub volume: Volume,
}

/// Per-connection media state entry, the sole element of a `MEDIA_STATUS` array.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatusEntry {
    pub media_session_id: i64,
    pub playback_rate: f64,
    pub player_state: String,
    pub current_time: f64,
    pub supported_media_commands: i64,
    pub volume: Volume,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptorOut>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptorOut {
    pub content_id: String,
    pub content_type: String,
    pub stream_type: String,
}

impl From<&MediaDescriptor> for MediaDescriptorOut {
    fn from(d: &MediaDescriptor) -> Self {
        Self {
            content_id: d.content_id.clone(),
            content_type: d.content_type.clone(),
            stream_type: d.stream_type.clone(),
        }
    }
}

/// Bitmask of supported media commands; the core always reports the full set.
pub const SUPPORTED_MEDIA_COMMANDS: i64 = 0x7F;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_message_reply_swaps_source_and_destination() {
        let request = CastMessage::json("sender-0", "receiver-0", NS_HEARTBEAT, &serde_json::json!({"type":"PING"}));
        let reply = CastMessage::reply(&request, NS_HEARTBEAT, &serde_json::json!({"type":"PONG"}));
        assert_eq!(reply.source_id, "receiver-0");
        assert_eq!(reply.destination_id, "sender-0");
    }

    #[test]
    fn payload_value_falls_back_to_empty_object_on_malformed_json() {
        let msg = CastMessage {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: "a".into(),
            destination_id: "b".into(),
            namespace: NS_RECEIVER.into(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some("not json at all {".to_string()),
            payload_binary: None,
        };
        assert_eq!(msg.payload_value(), serde_json::json!({}));
    }

    #[test]
    fn receiver_inbound_unknown_type_falls_through() {
        let value = serde_json::json!({"type": "SOMETHING_ELSE"});
        let decoded: ReceiverInbound = decode_payload(value);
        assert!(matches!(decoded, ReceiverInbound::Unknown));
    }

    #[test]
    fn receiver_inbound_missing_type_falls_through() {
        let decoded: ReceiverInbound = decode_payload(serde_json::json!({}));
        assert!(matches!(decoded, ReceiverInbound::Unknown));
    }

    #[test]
    fn receiver_inbound_get_status_defaults_request_id() {
        let decoded: ReceiverInbound = decode_payload(serde_json::json!({"type":"GET_STATUS"}));
        match decoded {
            ReceiverInbound::GetStatus { request_id } => assert_eq!(request_id, 0),
            other => panic!("expected GetStatus, got {other:?}"),
        }
    }

    #[test]
    fn media_inbound_load_parses_media_descriptor() {
        let value = serde_json::json!({
            "type": "LOAD",
            "requestId": 10,
            "currentTime": 3.5,
            "media": {
                "contentId": "http://example.com/v.mp4",
                "contentType": "video/mp4",
                "streamType": "BUFFERED"
            }
        });
        let decoded: MediaInbound = decode_payload(value);
        match decoded {
            MediaInbound::Load { request_id, media, current_time } => {
                assert_eq!(request_id, 10);
                assert_eq!(media.content_id, "http://example.com/v.mp4");
                assert_eq!(current_time, Some(3.5));
            }
            other => panic!("expected Load, got {other:?}"),
        }
    }

    #[test]
    fn media_inbound_load_without_media_falls_through() {
        // LOAD with a missing required `media` field can't be a well-formed Load
        // variant; it must land on Unknown rather than erroring the dispatcher.
        let decoded: MediaInbound = decode_payload(serde_json::json!({"type":"LOAD","requestId":1}));
        assert!(matches!(decoded, MediaInbound::Unknown));
    }

    #[test]
    fn webrtc_inbound_offer_defaults_seq_num() {
        let value = serde_json::json!({"type":"OFFER","offer":{"sdp":"v=0\r\n"}});
        let decoded: WebrtcInbound = decode_payload(value);
        match decoded {
            WebrtcInbound::Offer { seq_num, offer } => {
                assert_eq!(seq_num, 0);
                assert_eq!(offer.sdp, "v=0\r\n");
            }
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn volume_default_matches_spec() {
        let v = Volume::default();
        assert_eq!(v.control_type, "attenuation");
        assert_eq!(v.level, 1.0);
        assert!(!v.muted);
        assert_eq!(v.step_interval, 0.05);
    }
}
