//! Configuration types for WebRTC network adapters

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default public STUN server
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Smallest accepted signal frame limit (1 KiB)
const MIN_SIGNAL_FRAME_BYTES: usize = 1024;

/// Largest accepted signal frame limit (16 MiB)
const MAX_SIGNAL_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Configuration shared by dialers, listeners and packet connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Label of the single data channel (default: "data")
    pub channel_label: String,

    /// Inbound message queue depth per connection (default: 100)
    pub read_queue_capacity: usize,

    /// Negotiated connections buffered by a listener (default: 16)
    pub accept_queue_capacity: usize,

    /// Largest signal frame accepted from a carrier (default: 64 KiB)
    pub max_signal_frame_bytes: usize,

    /// Offer/answer exchange timeout in milliseconds (default: 30000, None disables)
    pub handshake_timeout_ms: Option<u64>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel mode
///
/// Determines the reliability of message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChannelMode {
    /// Reliable, ordered delivery
    ///
    /// Used by stream connections.
    Reliable,
    /// Unreliable, unordered delivery
    ///
    /// Used by packet connections to approximate datagram semantics.
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,      // Unlimited retransmits
            DataChannelMode::Unreliable => Some(0), // No retransmits
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: Vec::new(),
            channel_label: "data".to_string(),
            read_queue_capacity: 100,
            accept_queue_capacity: 16,
            max_signal_frame_bytes: 64 * 1024,
            handshake_timeout_ms: Some(30_000),
        }
    }
}

impl NetConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a STUN URL does not start with `stun:` or `stuns:`
    /// - a TURN URL does not start with `turn:` or `turns:`
    /// - `channel_label` is empty
    /// - a queue capacity is zero
    /// - `max_signal_frame_bytes` is not in range 1 KiB - 16 MiB
    /// - `handshake_timeout_ms` is `Some(0)`
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "channel_label must not be empty".to_string(),
            ));
        }

        if self.read_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "read_queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.accept_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "accept_queue_capacity must be at least 1".to_string(),
            ));
        }

        if self.max_signal_frame_bytes < MIN_SIGNAL_FRAME_BYTES
            || self.max_signal_frame_bytes > MAX_SIGNAL_FRAME_BYTES
        {
            return Err(Error::InvalidConfig(format!(
                "max_signal_frame_bytes must be in range {}-{}, got {}",
                MIN_SIGNAL_FRAME_BYTES, MAX_SIGNAL_FRAME_BYTES, self.max_signal_frame_bytes
            )));
        }

        if self.handshake_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "handshake_timeout_ms must be positive (use None to disable)".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration without any NAT-traversal servers
    ///
    /// Only host candidates are gathered, which is enough for loopback and
    /// LAN peers and keeps gathering fast.
    ///
    /// # Example
    ///
    /// ```
    /// use webrtc_net::NetConfig;
    ///
    /// let config = NetConfig::local_only();
    /// assert!(config.stun_servers.is_empty());
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn local_only() -> Self {
        Self {
            stun_servers: Vec::new(),
            ..Default::default()
        }
    }

    /// Replace the STUN servers
    pub fn with_stun_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stun_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Add TURN servers to this configuration
    ///
    /// # Example
    ///
    /// ```
    /// use webrtc_net::config::{NetConfig, TurnServerConfig};
    ///
    /// let config = NetConfig::default().with_turn_servers(vec![TurnServerConfig {
    ///     url: "turn:turn.example.com:3478".to_string(),
    ///     username: "user".to_string(),
    ///     credential: "pass".to_string(),
    /// }]);
    /// assert_eq!(config.turn_servers.len(), 1);
    /// ```
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set the handshake timeout (`None` waits forever)
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Set the data channel label
    pub fn with_channel_label(mut self, label: &str) -> Self {
        self.channel_label = label.to_string();
        self
    }

    /// Set the inbound message queue depth
    pub fn with_read_queue_capacity(mut self, capacity: usize) -> Self {
        self.read_queue_capacity = capacity;
        self
    }

    /// Set how many negotiated connections may wait for `accept`
    pub fn with_accept_queue_capacity(mut self, capacity: usize) -> Self {
        self.accept_queue_capacity = capacity;
        self
    }

    /// Set the largest accepted signaling frame
    pub fn with_max_signal_frame_bytes(mut self, limit: usize) -> Self {
        self.max_signal_frame_bytes = limit;
        self
    }

    /// Handshake timeout as a `Duration`
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }
}
