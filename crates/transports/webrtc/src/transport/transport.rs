//! WebRTC network entry point

use crate::{
    carrier::{PacketCarrier, SignalCarrier, SignalListener},
    config::NetConfig,
    conn::RtcConn,
    engine::{rtc::WebRtcEngine, PeerEngine},
    listener::RtcListener,
    packet::RtcPacketConn,
    Result,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Dialer, listener and packet factory sharing one configuration
///
/// Cheap to clone; clones share the engine.
#[derive(Clone)]
pub struct WebRtcNet {
    /// Adapter configuration
    config: NetConfig,

    /// Engine creating the peer connections
    engine: Arc<dyn PeerEngine>,
}

impl WebRtcNet {
    /// Create a network backed by webrtc-rs
    ///
    /// # Arguments
    ///
    /// * `config` - Adapter configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid or the WebRTC API cannot be
    /// built.
    pub fn new(config: NetConfig) -> Result<Self> {
        let engine = WebRtcEngine::new()?;
        Self::with_engine(config, Arc::new(engine))
    }

    /// Create a network over a custom engine, e.g. the in-process
    /// [`MemoryEngine`](crate::engine::memory::MemoryEngine)
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn with_engine(config: NetConfig, engine: Arc<dyn PeerEngine>) -> Result<Self> {
        config.validate()?;

        info!(
            stun_servers = config.stun_servers.len(),
            turn_servers = config.turn_servers.len(),
            "Creating WebRTC network"
        );

        Ok(Self { config, engine })
    }

    /// Dial over an already-connected signaling carrier
    ///
    /// Returns before the handshake completes; reads and writes wait for
    /// the data channel to open.
    pub async fn dial<C>(&self, carrier: C) -> Result<RtcConn>
    where
        C: SignalCarrier,
    {
        RtcConn::dial(self.engine.as_ref(), &self.config, carrier).await
    }

    /// Accept WebRTC connections negotiated over `listener`
    ///
    /// Must be called within a tokio runtime: the accept loop is spawned.
    pub fn listen<L>(&self, listener: L) -> RtcListener
    where
        L: SignalListener,
    {
        RtcListener::listen(Arc::clone(&self.engine), self.config.clone(), listener)
    }

    /// Answer a single dialer on an already-accepted carrier
    ///
    /// This is the per-connection half of [`listen`](Self::listen) for
    /// callers running their own accept loop. Waits for the whole exchange.
    pub async fn accept_stream<C>(&self, carrier: C) -> Result<RtcConn>
    where
        C: SignalCarrier,
    {
        RtcConn::accept(self.engine.as_ref(), &self.config, carrier).await
    }

    /// Open a datagram connection to `remote`, signaling over `carrier`
    pub async fn dial_packet<P>(&self, carrier: P, remote: SocketAddr) -> Result<RtcPacketConn>
    where
        P: PacketCarrier,
    {
        RtcPacketConn::dial(self.engine.as_ref(), &self.config, carrier, remote).await
    }

    /// Wait for one datagram offer on `carrier` and answer it
    pub async fn accept_packet<P>(&self, carrier: P) -> Result<RtcPacketConn>
    where
        P: PacketCarrier,
    {
        RtcPacketConn::accept(self.engine.as_ref(), &self.config, carrier).await
    }

    /// Get the configuration
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Get the engine
    pub fn engine(&self) -> &Arc<dyn PeerEngine> {
        &self.engine
    }
}

impl std::fmt::Debug for WebRtcNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcNet")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    #[test]
    fn test_invalid_config_rejected() {
        let config = NetConfig::default().with_channel_label("");
        let result = WebRtcNet::with_engine(config, Arc::new(MemoryEngine::new()));
        assert!(result.unwrap_err().is_config_error());
    }

    #[tokio::test]
    async fn test_dial_and_listen_share_config() {
        let engine = MemoryEngine::new();
        let net = WebRtcNet::with_engine(
            NetConfig::local_only().with_channel_label("tunnel"),
            Arc::new(engine.clone()),
        )
        .unwrap();

        let (dial_side, listen_side) = tokio::io::duplex(4096);
        let accepting = {
            let net = net.clone();
            tokio::spawn(async move { net.accept_stream(listen_side).await })
        };

        let dialed = net.dial(dial_side).await.unwrap();
        let accepted = accepting.await.unwrap().unwrap();

        dialed.write(b"hi").await.unwrap();
        let mut buf = [0u8; 8];
        let n = accepted.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(engine.session_count(), 2);
    }
}
