//! Stream connection over one ordered data channel
//!
//! Each `write` becomes one data-channel message and each `read` consumes one
//! message. A read buffer smaller than the message keeps the prefix and
//! drops the rest.

use crate::carrier::SignalCarrier;
use crate::channels::{DataChannel, DataChannelStats};
use crate::config::{DataChannelMode, NetConfig};
use crate::deadline::Deadline;
use crate::engine::{PeerEngine, PeerSession};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::signaling::exchange::{answer_over_stream, offer_over_stream, within_handshake_limit};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Byte-stream connection backed by a reliable data channel
pub struct RtcConn {
    id: String,
    peer: Arc<dyn PeerSession>,
    channel: Arc<DataChannel>,
    lifecycle: Arc<Lifecycle>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    read_deadline: Deadline,
    write_deadline: Deadline,
}

impl RtcConn {
    fn new(
        peer: Arc<dyn PeerSession>,
        config: &NetConfig,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let lifecycle = Arc::new(Lifecycle::new(id.clone()));
        let channel = DataChannel::new(
            &config.channel_label,
            DataChannelMode::Reliable,
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

    /// Dial over `carrier`
    ///
    /// Returns as soon as the peer and its channel exist. The offer/answer
    /// exchange runs in the background; a failure there is reported by every
    /// later operation as `HandshakeFailed`.
    pub(crate) async fn dial<C>(
        engine: &dyn PeerEngine,
        config: &NetConfig,
        mut carrier: C,
    ) -> Result<Self>
    where
        C: SignalCarrier,
    {
        let peer = engine.new_session(config).await?;
        let link = match peer
            .create_data_channel(&config.channel_label, DataChannelMode::Reliable)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                let _ = peer.close().await;
                return Err(e);
            }
        };

        let conn = Self::new(peer, config, carrier.local_addr(), carrier.peer_addr());
        conn.channel.attach(link);

        let lifecycle = Arc::clone(&conn.lifecycle);
        let peer = Arc::clone(&conn.peer);
        let timeout = config.handshake_timeout();
        let limit = config.max_signal_frame_bytes;
        let id = conn.id.clone();

        tokio::spawn(async move {
            let exchange = within_handshake_limit(
                timeout,
                offer_over_stream(peer.as_ref(), &mut carrier, limit),
            );

            tokio::select! {
                biased;
                _ = lifecycle.cancelled() => {
                    debug!(conn = %id, "handshake abandoned");
                }
                result = exchange => match result {
                    Ok(()) => debug!(conn = %id, "dial handshake complete"),
                    Err(e) => {
                        warn!(conn = %id, error = %e, "dial handshake failed");
                        lifecycle.fail(e);
                    }
                },
            }
        });

        info!(conn = %conn.id, "dialing");
        Ok(conn)
    }

    /// Answer the offer arriving on `carrier`
    ///
    /// Unlike dialing this waits for the whole exchange; on failure the peer
    /// is torn down and the error returned.
    pub(crate) async fn accept<C>(
        engine: &dyn PeerEngine,
        config: &NetConfig,
        mut carrier: C,
    ) -> Result<Self>
    where
        C: SignalCarrier,
    {
        let peer = engine.new_session(config).await?;
        let conn = Self::new(peer, config, carrier.local_addr(), carrier.peer_addr());
        conn.channel.accept_from(conn.peer.as_ref());

        let result = within_handshake_limit(
            config.handshake_timeout(),
            answer_over_stream(conn.peer.as_ref(), &mut carrier, config.max_signal_frame_bytes),
        )
        .await;

        if let Err(e) = result {
            let _ = conn.close().await;
            return Err(e);
        }

        info!(conn = %conn.id, remote = ?conn.remote_addr, "accepted");
        Ok(conn)
    }

    /// Read one message into `buf`
    ///
    /// Waits for a message, the read deadline, or the connection to close
    /// or fail. Returns the number of bytes copied.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let msg = self.channel.recv(&self.read_deadline).await?;

        let n = msg.len().min(buf.len());
        buf[..n].copy_from_slice(&msg[..n]);
        if n < msg.len() {
            debug!(
                conn = %self.id,
                discarded = msg.len() - n,
                "message truncated to read buffer"
            );
        }
        Ok(n)
    }

    /// Send `buf` as one message
    ///
    /// Waits for the channel to open first, bounded by the write deadline.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.lifecycle.check()?;
        if self.write_deadline.is_expired() {
            return Err(Error::DeadlineExceeded);
        }

        self.channel.wait_open(Some(&self.write_deadline)).await?;

        tokio::select! {
            biased;
            _ = self.lifecycle.cancelled() => Err(self.lifecycle.terminal_error()),
            sent = self.channel.send(buf) => sent.map(|_| buf.len()),
            _ = self.write_deadline.expired() => Err(Error::DeadlineExceeded),
        }
    }

    /// Close the channel and the peer connection
    ///
    /// Safe to call repeatedly and concurrently. Every call returns the
    /// result of the first.
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

    /// Address of the signaling carrier on this side
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Address of the signaling peer, if the carrier knew it
    pub fn remote_addr(&self) -> Option<SocketAddr> {
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

impl Drop for RtcConn {
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
        debug!(conn = %self.id, "dropped without close");
    }
}

impl std::fmt::Debug for RtcConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcConn")
            .field("id", &self.id)
            .field("state", &self.lifecycle.state())
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
