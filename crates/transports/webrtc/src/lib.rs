//! WebRTC data channels as ordinary network connections
//!
//! This crate lets code written against stream, datagram and listener
//! interfaces run over a NAT-traversing WebRTC data channel. The caller
//! supplies an already-connected carrier (a TCP stream, a UDP socket, ...)
//! which is used once to trade offer and answer; after that all traffic
//! flows over the peer-to-peer channel.
//!
//! # Features
//!
//! - **Stream connections** ([`RtcConn`]): one ordered, reliable data channel;
//!   each write is one message, each read consumes one message
//! - **Datagram connections** ([`RtcPacketConn`]): one unordered channel with
//!   zero retransmits and per-datagram sender tags
//! - **Listeners** ([`RtcListener`]): negotiate every connection accepted by
//!   an ordinary listener and hand them out through `accept`
//! - **Deadlines**: one-shot read/write deadlines on every connection
//! - **Surfaced handshake failures**: a failed offer/answer exchange becomes
//!   the connection's terminal error instead of a silent hang
//! - **Pluggable engine**: webrtc-rs by default, or an in-process engine
//!   for tests
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Application (Conn / PacketConn / Listener)            │
//! │  ↓                                                     │
//! │  WebRtcNet (NetConfig + PeerEngine)                    │
//! │  ├─ RtcConn / RtcPacketConn / RtcListener              │
//! │  │   ├─ Lifecycle (cancel scope, close-once)           │
//! │  │   └─ DataChannel (bounded inbound queue)            │
//! │  ├─ signaling (length-prefixed JSON offer/answer)      │
//! │  │   ↕ carrier: TcpStream / UdpSocket / DuplexStream   │
//! │  └─ engine: WebRtcEngine (webrtc-rs) | MemoryEngine    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Limitations
//!
//! Message boundaries are preserved: a read with a buffer smaller than the
//! next message returns the prefix and drops the remainder. Only one data
//! channel is used per connection.
//!
//! # Example
//!
//! ```
//! use webrtc_net::NetConfig;
//!
//! let config = NetConfig::local_only().with_channel_label("tunnel");
//! assert!(config.validate().is_ok());
//! assert!(config.stun_servers.is_empty());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use tokio::net::{TcpListener, TcpStream};
//! use webrtc_net::{NetConfig, WebRtcNet};
//!
//! # async fn example() -> webrtc_net::Result<()> {
//! let net = WebRtcNet::new(NetConfig::default())?;
//!
//! // Listening side
//! let listener = net.listen(TcpListener::bind("0.0.0.0:7000").await?);
//!
//! // Dialing side
//! let conn = net.dial(TcpStream::connect("127.0.0.1:7000").await?).await?;
//! conn.write(b"ping").await?;
//!
//! let accepted = listener.accept().await?;
//! let mut buf = [0u8; 1024];
//! let n = accepted.read(&mut buf).await?;
//! assert_eq!(&buf[..n], b"ping");
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

// Public modules
pub mod carrier;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod net;
pub mod signaling;

// Adapters
mod conn;
mod deadline;
mod lifecycle;
mod listener;
mod packet;
mod transport;

// Re-exports for public API
pub use carrier::{PacketCarrier, SignalCarrier, SignalListener};
pub use channels::{DataChannelState, DataChannelStats};
pub use config::{DataChannelMode, NetConfig, TurnServerConfig};
pub use conn::RtcConn;
pub use engine::memory::MemoryEngine;
pub use engine::PeerState;
pub use engine::rtc::WebRtcEngine;
pub use error::{Error, Result};
pub use lifecycle::LifecycleState;
pub use listener::RtcListener;
pub use net::{Conn, Listener, PacketConn};
pub use packet::RtcPacketConn;
pub use signaling::{SdpType, SessionDescription};
pub use transport::WebRtcNet;

use std::net::SocketAddr;

/// Dial over `carrier` with the default configuration and webrtc-rs
pub async fn dial<C>(carrier: C) -> Result<RtcConn>
where
    C: SignalCarrier,
{
    WebRtcNet::new(NetConfig::default())?.dial(carrier).await
}

/// Listen on `listener` with the default configuration and webrtc-rs
pub fn listen<L>(listener: L) -> Result<RtcListener>
where
    L: SignalListener,
{
    Ok(WebRtcNet::new(NetConfig::default())?.listen(listener))
}

/// Open a datagram connection to `remote` with the default configuration
///
/// # Errors
///
/// Returns `InvalidAddress` if `remote` is not a socket address.
pub async fn dial_packet<P>(carrier: P, remote: &str) -> Result<RtcPacketConn>
where
    P: PacketCarrier,
{
    let remote = parse_addr(remote)?;
    WebRtcNet::new(NetConfig::default())?
        .dial_packet(carrier, remote)
        .await
}

/// Answer one datagram offer on `carrier` with the default configuration
pub async fn accept_packet<P>(carrier: P) -> Result<RtcPacketConn>
where
    P: PacketCarrier,
{
    WebRtcNet::new(NetConfig::default())?
        .accept_packet(carrier)
        .await
}

fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))
}

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
