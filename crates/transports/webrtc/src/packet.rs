//! Datagram connection over one unordered, unreliable data channel

use crate::carrier::PacketCarrier;
use crate::channels::{DataChannel, DataChannelStats};
use crate::config::{DataChannelMode, NetConfig};
use crate::deadline::Deadline;
use crate::engine::{PeerEngine, PeerSession};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::signaling::exchange::{answer_over_packets, offer_over_packets, within_handshake_limit};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Message-oriented connection to a single remote peer
///
/// Every inbound datagram is tagged with the address the offer/answer
/// exchange happened with; the destination given to `write_to` is not used
/// for routing.
pub struct RtcPacketConn {
    id: String,
    peer: Arc<dyn PeerSession>,
    channel: Arc<DataChannel>,
    lifecycle: Arc<Lifecycle>,
    local_addr: Option<SocketAddr>,
    remote_addr: SocketAddr,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl RtcPacketConn {
    fn new(
        peer: Arc<dyn PeerSession>,
        config: &NetConfig,
        local_addr: Option<SocketAddr>,
        remote_addr: SocketAddr,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let lifecycle = Arc::new(Lifecycle::new(id.clone()));
        let channel = DataChannel::new(
            &config.channel_label,
            DataChannelMode::Unreliable,
            config.read_queue_capacity,
            Arc::clone(&lifecycle),
        );
        channel.watch_session(peer.as_ref());

        Self {
            id,
            peer,
            channel,
            lifecycle,
            local_addr,
            remote_addr,
            read_deadline: Deadline::new(),
            write_deadline: Deadline::new(),
        }
    }

    /// Dial `remote` by sending it an offer datagram over `carrier`
    ///
    /// Returns immediately; the exchange runs in the background.
    pub(crate) async fn dial<P>(
        engine: &dyn PeerEngine,
        config: &NetConfig,
        carrier: P,
        remote: SocketAddr,
    ) -> Result<Self>
    where
        P: PacketCarrier,
    {
        let peer = engine.new_session(config).await?;
        let link = match peer
            .create_data_channel(&config.channel_label, DataChannelMode::Unreliable)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                let _ = peer.close().await;
                return Err(e);
            }
        };

        let conn = Self::new(peer, config, carrier.local_addr(), remote);
        conn.channel.attach(link);

        let lifecycle = Arc::clone(&conn.lifecycle);
        let peer = Arc::clone(&conn.peer);
        let timeout = config.handshake_timeout();
        let limit = config.max_signal_frame_bytes;
        let id = conn.id.clone();

        tokio::spawn(async move {
            let exchange = within_handshake_limit(
                timeout,
                offer_over_packets(peer.as_ref(), &carrier, remote, limit),
            );

            tokio::select! {
                biased;
                _ = lifecycle.cancelled() => {
                    debug!(conn = %id, "handshake abandoned");
                }
                result = exchange => match result {
                    Ok(()) => debug!(conn = %id, %remote, "packet handshake complete"),
                    Err(e) => {
                        warn!(conn = %id, error = %e, "packet handshake failed");
                        lifecycle.fail(e);
                    }
                },
            }
        });

        info!(conn = %conn.id, %remote, "dialing packet connection");
        Ok(conn)
    }

    /// Wait for an offer datagram on `carrier` and answer its sender
    pub(crate) async fn accept<P>(
        engine: &dyn PeerEngine,
        config: &NetConfig,
        carrier: P,
    ) -> Result<Self>
    where
        P: PacketCarrier,
    {
        let peer = engine.new_session(config).await?;

        // The sender is only known once the offer arrives.
        let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut conn = Self::new(peer, config, carrier.local_addr(), unspecified);
        conn.channel.accept_from(conn.peer.as_ref());

        let result = within_handshake_limit(
            config.handshake_timeout(),
            answer_over_packets(conn.peer.as_ref(), &carrier, config.max_signal_frame_bytes),
        )
        .await;

        match result {
            Ok(from) => {
                conn.remote_addr = from;
                info!(conn = %conn.id, remote = %from, "accepted packet connection");
                Ok(conn)
            }
            Err(e) => {
                let _ = conn.close().await;
                Err(e)
            }
        }
    }

    /// Read one datagram into `buf`
    ///
    /// Returns the number of bytes copied and the sender tag. Bytes beyond
    /// `buf.len()` are dropped.
    pub async fn read_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let msg = self.channel.recv(&self.read_deadline).await?;

        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        Ok((n, self.remote_addr))
    }

    /// Send `buf` as one datagram
    ///
    /// Does not wait for the channel: fails with `ConnectionClosed` unless it
    /// is open, and with `DeadlineExceeded` once the write deadline passed.
    pub async fn write_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize> {
        self.lifecycle.check()?;
        if !self.channel.is_open() {
            return Err(Error::ConnectionClosed);
        }
        if self.write_deadline.is_expired() {
            return Err(Error::DeadlineExceeded);
        }
        if dest != self.remote_addr {
            debug!(
                conn = %self.id,
                %dest,
                remote = %self.remote_addr,
                "destination ignored, sending to the connected peer"
            );
        }

        tokio::select! {
            biased;
            _ = self.lifecycle.cancelled() => Err(self.lifecycle.terminal_error()),
            sent = self.channel.send(buf) => sent.map(|_| buf.len()),
            _ = self.write_deadline.expired() => Err(Error::DeadlineExceeded),
        }
    }

    /// Close the channel and the peer connection
    ///
    /// Idempotent; every call returns the result of the first.
    pub async fn close(&self) -> Result<()> {
        self.lifecycle
            .close_once(|| async {
                let channel = self.channel.close().await;
                let peer = self.peer.close().await;
                channel.and(peer)
            })
            .await
    }

    /// Wait until the data channel is open
    pub async fn ready(&self) -> Result<()> {
        self.lifecycle.check()?;
        self.channel.wait_open(None).await
    }

    /// Address of the packet carrier
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address of the remote peer, used as the tag of every inbound datagram
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Set both deadlines
    pub fn set_deadline(&self, at: Option<Instant>) {
        self.read_deadline.set(at);
        self.write_deadline.set(at);
    }

    /// Set the read deadline (`None` clears it)
    pub fn set_read_deadline(&self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    /// Set the write deadline (`None` clears it)
    pub fn set_write_deadline(&self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    /// Connection identifier used in logs
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Traffic counters of the data channel
    pub fn stats(&self) -> DataChannelStats {
        self.channel.stats()
    }
}

impl Drop for RtcPacketConn {
    fn drop(&mut self) {
        if self.lifecycle.state() != LifecycleState::Open {
            return;
        }

        self.lifecycle.cancel();
        let channel = Arc::clone(&self.channel);
        let peer = Arc::clone(&self.peer);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = channel.close().await;
                let _ = peer.close().await;
            });
        }
    }
}

impl std::fmt::Debug for RtcPacketConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcPacketConn")
            .field("id", &self.id)
            .field("state", &self.lifecycle.state())
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    async fn pair(engine: &MemoryEngine) -> (RtcPacketConn, RtcPacketConn) {
        let config = NetConfig::local_only();
        let listen_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listen_socket.local_addr().unwrap();
        let dial_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let accepting = {
            let engine = engine.clone();
            let config = config.clone();
            tokio::spawn(
                async move { RtcPacketConn::accept(&engine, &config, listen_socket).await },
            )
        };

        let dialed = RtcPacketConn::dial(engine, &config, dial_socket, listen_addr)
            .await
            .unwrap();
        let accepted = accepting.await.unwrap().unwrap();
        dialed.ready().await.unwrap();
        accepted.ready().await.unwrap();
        (dialed, accepted)
    }

    #[tokio::test]
    async fn test_datagrams_are_tagged() {
        let engine = MemoryEngine::new();
        let (dialed, accepted) = pair(&engine).await;

        dialed
            .write_to(b"hello", dialed.remote_addr())
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = accepted.read_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(Some(from), dialed.local_addr());
    }

    #[tokio::test]
    async fn test_past_read_deadline_fails_immediately() {
        let engine = MemoryEngine::new();
        let (dialed, _accepted) = pair(&engine).await;

        dialed.set_read_deadline(Some(Instant::now()));
        let mut buf = [0u8; 4];
        let err = tokio::time::timeout(Duration::from_millis(50), dialed.read_from(&mut buf))
            .await
            .expect("should not block")
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));

        dialed.set_read_deadline(None);
        let result = tokio::time::timeout(Duration::from_millis(50), dialed.read_from(&mut buf)).await;
        assert!(result.is_err(), "cleared deadline must block");
    }

    #[tokio::test]
    async fn test_write_deadline() {
        let engine = MemoryEngine::new();
        let (dialed, _accepted) = pair(&engine).await;

        dialed.set_write_deadline(Some(Instant::now()));
        let err = dialed
            .write_to(b"x", dialed.remote_addr())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_write_before_open_fails() {
        let engine = MemoryEngine::new();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let nowhere: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let conn = RtcPacketConn::dial(&engine, &NetConfig::local_only(), socket, nowhere)
            .await
            .unwrap();
        // Closed, or failed if the offer was already refused.
        let err = conn.write_to(b"x", nowhere).await.unwrap_err();
        assert!(err.is_closed());
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_twice() {
        let engine = MemoryEngine::new();
        let (dialed, _accepted) = pair(&engine).await;

        dialed.close().await.unwrap();
        dialed.close().await.unwrap();

        let mut buf = [0u8; 4];
        assert!(matches!(
            dialed.read_from(&mut buf).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(matches!(
            dialed.write_to(b"x", dialed.remote_addr()).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
