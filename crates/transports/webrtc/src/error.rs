//! Error types for WebRTC network adapters

use std::sync::Arc;

/// Result type alias using the adapter Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on adapters, listeners and the signaling handshake
///
/// Errors are cheap to clone so a single terminal failure can be handed to
/// every caller blocked on the same connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Operation attempted during or after teardown, or the scope was cancelled
    #[error("connection closed")]
    ConnectionClosed,

    /// Address could not be parsed or is not usable
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A read or write deadline elapsed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Offer/answer exchange failed; the connection will never open
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Signaling carrier misbehaved (unexpected message, early EOF)
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Signal frame larger than the configured limit
    #[error("signal frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Announced or actual frame size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error from a carrier or listener
    #[error("I/O error: {0}")]
    IoError(#[source] Arc<std::io::Error>),
}

impl Error {
    /// Check if this error means the connection is gone for good
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::HandshakeFailed(_))
    }

    /// Check if this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::DeadlineExceeded)
    }

    /// Check if this error came out of the offer/answer exchange
    pub fn is_signaling_error(&self) -> bool {
        matches!(
            self,
            Error::HandshakeFailed(_)
                | Error::SignalingError(_)
                | Error::FrameTooLarge { .. }
                | Error::SdpError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            Error::ConnectionClosed => ErrorKind::NotConnected,
            Error::HandshakeFailed(_) => ErrorKind::ConnectionAborted,
            Error::DeadlineExceeded => ErrorKind::TimedOut,
            Error::InvalidAddress(_) | Error::InvalidConfig(_) => ErrorKind::InvalidInput,
            Error::FrameTooLarge { .. } | Error::SerializationError(_) => ErrorKind::InvalidData,
            Error::IoError(io) => io.kind(),
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
