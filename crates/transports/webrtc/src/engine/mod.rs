//! Peer-connection engine contract
//!
//! The adapters only need a narrow slice of a WebRTC stack: create a peer,
//! open one data channel, trade offer/answer, close. This module names that
//! slice so the adapters can run over webrtc-rs ([`rtc::WebRtcEngine`]) or an
//! in-process pair ([`memory::MemoryEngine`]).

pub mod memory;
pub mod rtc;

use crate::channels::DataChannelState;
use crate::config::{DataChannelMode, NetConfig};
use crate::signaling::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Callback for open/close events
pub type EventHandler = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback for inbound messages
pub type MessageHandler = Box<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback for channels opened by the remote side
pub type ChannelHandler = Box<dyn Fn(Arc<dyn DataLink>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback for peer connection state changes
pub type StateHandler = Box<dyn Fn(PeerState) -> BoxFuture<'static, ()> + Send + Sync>;

/// Peer connection state as seen by the adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Not yet negotiating
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Transport established
    Connected,
    /// Connectivity lost, may still recover
    Disconnected,
    /// Transport could not be established or was lost for good
    Failed,
    /// Peer connection closed
    Closed,
}

impl PeerState {
    /// Whether the peer connection can never carry traffic again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }
}

/// Factory for peer sessions
#[async_trait]
pub trait PeerEngine: Send + Sync + 'static {
    /// Create a new peer connection using the configured ICE servers
    async fn new_session(&self, config: &NetConfig) -> Result<Arc<dyn PeerSession>>;
}

/// One peer connection
#[async_trait]
pub trait PeerSession: Send + Sync + 'static {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// Create a locally-initiated data channel
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataLink>>;

    /// Register the handler for remotely-initiated data channels
    fn on_data_channel(&self, handler: ChannelHandler);

    /// Register the handler for peer connection state changes
    ///
    /// Replaces any earlier handler.
    fn on_state_change(&self, handler: StateHandler);

    /// Generate an offer (does not apply it)
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Generate an answer to the applied remote offer (does not apply it)
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    ///
    /// Returns once the description is complete enough to be sent in a single
    /// message, i.e. after candidate gathering for non-trickle engines.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// The applied local description
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Apply the remote peer's description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Close the peer connection and every channel on it
    async fn close(&self) -> Result<()>;
}

/// One data channel
#[async_trait]
pub trait DataLink: Send + Sync + 'static {
    /// Channel label
    fn label(&self) -> &str;

    /// Current ready state
    fn state(&self) -> DataChannelState;

    /// Register the open handler
    fn on_open(&self, handler: EventHandler);

    /// Register the close handler
    fn on_close(&self, handler: EventHandler);

    /// Register the message handler
    fn on_message(&self, handler: MessageHandler);

    /// Send one message
    async fn send(&self, data: &Bytes) -> Result<usize>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}
