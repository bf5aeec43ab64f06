//! Data channel binding
//!
//! Connects one engine [`DataLink`] to an adapter: tracks the ready state,
//! funnels inbound messages into a bounded queue and counts traffic.

use crate::config::DataChannelMode;
use crate::deadline::Deadline;
use crate::engine::{DataLink, PeerSession, PeerState};
use crate::lifecycle::Lifecycle;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

/// Data channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    /// Channel is being created
    Connecting,
    /// Channel is open and ready for messages
    Open,
    /// Channel is closing
    Closing,
    /// Channel is closed
    Closed,
}

/// Channel statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataChannelStats {
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Messages sent count
    pub messages_sent: u64,
    /// Messages received count
    pub messages_received: u64,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

/// The single data channel owned by a connection adapter
///
/// The engine link is bound once, either right after creation (dial side)
/// or when the remote channel shows up (accept side). Until then the
/// channel reports `Connecting`.
pub struct DataChannel {
    label: String,
    mode: DataChannelMode,
    link: OnceLock<Arc<dyn DataLink>>,
    state: watch::Sender<DataChannelState>,
    inbound_tx: mpsc::Sender<Bytes>,
    inbound_rx: Mutex<mpsc::Receiver<Bytes>>,
    lifecycle: Arc<Lifecycle>,
    counters: Counters,
}

impl DataChannel {
    pub(crate) fn new(
        label: &str,
        mode: DataChannelMode,
        queue_capacity: usize,
        lifecycle: Arc<Lifecycle>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_capacity);
        let (state, _) = watch::channel(DataChannelState::Connecting);

        Arc::new(Self {
            label: label.to_string(),
            mode,
            link: OnceLock::new(),
            state,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            lifecycle,
            counters: Counters::default(),
        })
    }

    /// Bind the engine link and register its handlers
    ///
    /// Handlers only hold a weak reference, so a dropped adapter is not kept
    /// alive by its engine.
    pub(crate) fn attach(self: &Arc<Self>, link: Arc<dyn DataLink>) {
        if self.link.set(Arc::clone(&link)).is_err() {
            warn!(label = %link.label(), "ignoring additional data channel");
            return;
        }

        let weak = Arc::downgrade(self);
        link.on_open(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(channel) = weak.upgrade() {
                    channel.set_state(DataChannelState::Open);
                }
            })
        }));

        let weak = Arc::downgrade(self);
        link.on_close(Box::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(channel) = weak.upgrade() {
                    channel.set_state(DataChannelState::Closed);
                    channel.lifecycle.fail(Error::ConnectionClosed);
                }
            })
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        link.on_message(Box::new(move |data: Bytes| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(channel) = weak.upgrade() {
                    channel.enqueue(data).await;
                }
            })
        }));

        // The link may have opened before the handler was in place.
        if link.state() == DataChannelState::Open {
            self.set_state(DataChannelState::Open);
        }
    }

    /// Bind the first channel the remote peer opens on `session`
    pub(crate) fn accept_from(self: &Arc<Self>, session: &dyn PeerSession) {
        let weak = Arc::downgrade(self);
        session.on_data_channel(Box::new(move |link: Arc<dyn DataLink>| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(channel) = weak.upgrade() {
                    debug!(label = %link.label(), "remote data channel arrived");
                    channel.attach(link);
                }
            })
        }));
    }

    /// Follow the peer connection and fail the adapter once it is gone
    ///
    /// A transport that fails before the channel opened is reported as a
    /// handshake failure; afterwards both outcomes read as a closed
    /// connection.
    pub(crate) fn watch_session(self: &Arc<Self>, session: &dyn PeerSession) {
        let weak = Arc::downgrade(self);
        session.on_state_change(Box::new(move |state: PeerState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    return;
                };
                if !state.is_terminal() {
                    return;
                }

                let err = if state == PeerState::Failed && !channel.is_open() {
                    Error::HandshakeFailed(
                        "peer connection failed before the data channel opened".to_string(),
                    )
                } else {
                    Error::ConnectionClosed
                };
                debug!(label = %channel.label, ?state, error = %err, "peer connection ended");

                // Fail first so waiters woken by the state change see the reason.
                channel.lifecycle.fail(err);
                channel.set_state(DataChannelState::Closed);
            })
        }));
    }

    fn set_state(&self, state: DataChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(label = %self.label, ?previous, ?state, "data channel state changed");
        }
    }

    /// Queue one inbound message, waiting for room unless the adapter goes away
    async fn enqueue(&self, data: Bytes) {
        self.counters
            .bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            biased;
            _ = self.lifecycle.cancelled() => {
                debug!(label = %self.label, "dropping inbound message after cancellation");
            }
            _ = self.inbound_tx.send(data) => {}
        }
    }

    /// Wait for the channel to open
    ///
    /// Fails with the terminal error if the adapter is cancelled, with
    /// `ConnectionClosed` if the channel closes without opening and with
    /// `DeadlineExceeded` if `deadline` passes first.
    pub(crate) async fn wait_open(&self, deadline: Option<&Deadline>) -> Result<()> {
        let mut rx = self.state.subscribe();
        let settled = async move {
            rx.wait_for(|state| *state != DataChannelState::Connecting)
                .await
                .map(|state| *state)
        };

        tokio::select! {
            biased;
            _ = self.lifecycle.cancelled() => Err(self.lifecycle.terminal_error()),
            state = settled => match state {
                Ok(DataChannelState::Open) => Ok(()),
                _ => Err(Error::ConnectionClosed),
            },
            _ = wait_deadline(deadline) => Err(Error::DeadlineExceeded),
        }
    }

    /// Take the next inbound message
    ///
    /// Messages that arrived before the remote side closed are still
    /// returned; only a local close stops delivery at once.
    pub(crate) async fn recv(&self, deadline: &Deadline) -> Result<Bytes> {
        self.lifecycle.check_not_closed()?;
        if deadline.is_expired() {
            return Err(Error::DeadlineExceeded);
        }

        tokio::select! {
            biased;
            msg = async { self.inbound_rx.lock().await.recv().await } => {
                msg.ok_or_else(|| self.lifecycle.terminal_error())
            }
            _ = self.lifecycle.cancelled() => Err(self.lifecycle.terminal_error()),
            _ = deadline.expired() => Err(Error::DeadlineExceeded),
        }
    }

    /// Send one message on the bound link
    pub(crate) async fn send(&self, data: &[u8]) -> Result<usize> {
        let link = self.link.get().ok_or(Error::ConnectionClosed)?;

        let sent = link.send(&Bytes::copy_from_slice(data)).await?;

        self.counters
            .bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(sent)
    }

    /// Close the bound link, if any
    pub(crate) async fn close(&self) -> Result<()> {
        self.set_state(DataChannelState::Closing);
        let result = match self.link.get() {
            Some(link) => link.close().await,
            None => Ok(()),
        };
        self.set_state(DataChannelState::Closed);
        result
    }

    /// Get the channel label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the channel mode
    pub fn mode(&self) -> DataChannelMode {
        self.mode
    }

    /// Get current state
    pub fn state(&self) -> DataChannelState {
        *self.state.borrow()
    }

    /// Check if channel is open
    pub fn is_open(&self) -> bool {
        self.state() == DataChannelState::Open
    }

    /// Get channel statistics
    pub fn stats(&self) -> DataChannelStats {
        DataChannelStats {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
        }
    }
}

async fn wait_deadline(deadline: Option<&Deadline>) {
    match deadline {
        Some(deadline) => deadline.expired().await,
        None => std::future::pending().await,
    }
}
