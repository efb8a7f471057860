use serde::{Deserialize, Serialize};

/// Top-level configuration for the bridge process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub castv2: CastV2Config,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
}

/// The TLS listener that speaks CastV2 to senders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastV2Config {
    /// Bind address for the CastV2 TLS listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port for the CastV2 TLS listener (8009 is the real protocol's port).
    #[serde(default = "default_castv2_port")]
    pub port: u16,
    /// Interval between `tp.heartbeat` PING messages sent to a connected sender.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Maximum accepted frame length, in bytes. Never goes below
    /// [`MIN_FRAME_LEN_FLOOR`] regardless of configuration.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// The plaintext WebSocket transport that speaks to the display page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Bind address for the display WebSocket listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port for the display WebSocket listener.
    #[serde(default = "default_display_port")]
    pub port: u16,
    /// Maximum accepted WebSocket message size, in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Interval between WebSocket ping frames.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

/// The WebRTC signaling relay's session bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// How often the reaper sweeps for inactive signaling sessions.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// A signaling session with no activity for this long is reaped.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

/// Below this, a configured `max_frame_len` is rejected outright: it isn't
/// enough room for even a minimal CastMessage envelope.
pub const MIN_FRAME_LEN_FLOOR: usize = 4096;

impl Default for CastV2Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_castv2_port(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_display_port(),
            max_payload_bytes: default_max_payload_bytes(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval_secs(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl BridgeConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal, server should not start) or
    /// "WARNING:" (advisory, server can start but the config is likely wrong).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.castv2.port == 0 {
            issues.push("ERROR: castv2.port must be between 1 and 65535, got 0.".to_string());
        }
        if self.display.port == 0 {
            issues.push("ERROR: display.port must be between 1 and 65535, got 0.".to_string());
        }
        if self.castv2.port == self.display.port {
            issues.push(format!(
                "ERROR: castv2.port and display.port are both {} — they must differ.",
                self.castv2.port
            ));
        }

        if self.castv2.max_frame_len < MIN_FRAME_LEN_FLOOR {
            issues.push(format!(
                "ERROR: castv2.max_frame_len must be at least {MIN_FRAME_LEN_FLOOR} bytes, got {}.",
                self.castv2.max_frame_len
            ));
        }
        if self.castv2.max_frame_len > 1024 * 1024 {
            issues.push(format!(
                "WARNING: castv2.max_frame_len is {} bytes, above the 1 MiB the real protocol allows.",
                self.castv2.max_frame_len
            ));
        }

        if self.castv2.heartbeat_interval_secs == 0 {
            issues.push("ERROR: castv2.heartbeat_interval_secs must be positive.".to_string());
        }
        if self.display.ping_interval_secs == 0 {
            issues.push("ERROR: display.ping_interval_secs must be positive.".to_string());
        }
        if self.signaling.reap_interval_secs == 0 {
            issues.push("ERROR: signaling.reap_interval_secs must be positive.".to_string());
        }
        if self.signaling.session_ttl_secs == 0 {
            issues.push("ERROR: signaling.session_ttl_secs must be positive.".to_string());
        }
        if self.signaling.session_ttl_secs > 0
            && self.signaling.reap_interval_secs > self.signaling.session_ttl_secs
        {
            issues.push(format!(
                "WARNING: signaling.reap_interval_secs ({}) is larger than session_ttl_secs ({}); \
                 reaped sessions will linger longer than the configured TTL implies.",
                self.signaling.reap_interval_secs, self.signaling.session_ttl_secs
            ));
        }

        if self.display.max_payload_bytes < 1024 {
            issues.push(format!(
                "ERROR: display.max_payload_bytes must be at least 1024, got {}.",
                self.display.max_payload_bytes
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_castv2_port() -> u16 {
    8009
}
fn default_display_port() -> u16 {
    8010
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_max_frame_len() -> usize {
    1024 * 1024
}
fn default_max_payload_bytes() -> usize {
    64 * 1024
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_reap_interval_secs() -> u64 {
    15
}
fn default_session_ttl_secs() -> u64 {
    60
}
