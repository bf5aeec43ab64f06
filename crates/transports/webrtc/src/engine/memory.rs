//! In-process engine
//!
//! Pairs sessions created by the same [`MemoryEngine`] without any network.
//! A description body is just `memory:<session id>`; applying the answer on
//! the offering side wires each of its channels to a fresh channel on the
//! answering side, fires the answerer's data-channel handler and opens both
//! ends. Messages are delivered in order, one handler call at a time.

use super::{
    ChannelHandler, DataLink, EventHandler, MessageHandler, PeerEngine, PeerSession, PeerState,
    StateHandler,
};
use crate::channels::DataChannelState;
use crate::config::{DataChannelMode, NetConfig};
use crate::signaling::{SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

const SDP_PREFIX: &str = "memory:";

type Registry = Arc<Mutex<HashMap<String, Weak<MemorySession>>>>;

/// Engine whose sessions only reach other sessions of the same engine
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use webrtc_net::{MemoryEngine, NetConfig, WebRtcNet};
///
/// tokio_test::block_on(async {
///     let net = WebRtcNet::with_engine(NetConfig::local_only(), Arc::new(MemoryEngine::new()))?;
///     let (dial_side, listen_side) = tokio::io::duplex(4096);
///
///     let (dialed, accepted) = tokio::join!(net.dial(dial_side), net.accept_stream(listen_side));
///     let (dialed, accepted) = (dialed?, accepted?);
///
///     dialed.write(b"hi").await?;
///     let mut buf = [0u8; 8];
///     let n = accepted.read(&mut buf).await?;
///     assert_eq!(&buf[..n], b"hi");
///     Ok::<_, webrtc_net::Error>(())
/// })
/// .unwrap();
/// ```
#[derive(Clone, Default)]
pub struct MemoryEngine {
    registry: Registry,
    unreachable: Arc<AtomicBool>,
}

impl MemoryEngine {
    /// Create an engine with an empty session registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions that applied a local description and are not closed
    pub fn session_count(&self) -> usize {
        self.registry
            .lock()
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    /// Make later negotiations fail at the transport level
    ///
    /// Descriptions are still exchanged, but applying the answer reports
    /// [`PeerState::Failed`] on both sessions instead of opening channels,
    /// the way an ICE failure does.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Release);
    }
}

#[async_trait]
impl PeerEngine for MemoryEngine {
    async fn new_session(&self, _config: &NetConfig) -> Result<Arc<dyn PeerSession>> {
        let id = uuid::Uuid::new_v4().to_string();
        debug!(session = %id, "created memory session");

        let registry = Arc::clone(&self.registry);
        let session = Arc::new_cyclic(|me| MemorySession {
            id,
            me: me.clone(),
            registry,
            unreachable: Arc::clone(&self.unreachable),
            channels: Mutex::new(Vec::new()),
            channel_handler: Mutex::new(None),
            state_handler: Mutex::new(None),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        Ok(session)
    }
}

/// One in-process peer
pub struct MemorySession {
    id: String,
    me: Weak<MemorySession>,
    registry: Registry,
    unreachable: Arc<AtomicBool>,
    channels: Mutex<Vec<Arc<MemoryLink>>>,
    channel_handler: Mutex<Option<Arc<ChannelHandler>>>,
    state_handler: Mutex<Option<Arc<StateHandler>>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::PeerConnectionError(format!(
                "memory session {} is closed",
                self.id
            )))
        } else {
            Ok(())
        }
    }

    fn lookup(&self, desc: &SessionDescription) -> Result<Arc<MemorySession>> {
        let peer_id = desc.sdp.strip_prefix(SDP_PREFIX).ok_or_else(|| {
            Error::SdpError(format!("not a memory session description: {:?}", desc.sdp))
        })?;

        self.registry
            .lock()
            .get(peer_id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::SdpError(format!("unknown memory session {}", peer_id)))
    }

    async fn notify_state(&self, state: PeerState) {
        let handler = self.state_handler.lock().clone();
        if let Some(handler) = handler {
            handler(state).await;
        }
    }

    /// Pair every local channel with a new channel on `peer`
    async fn connect(&self, peer: Arc<MemorySession>) -> Result<()> {
        peer.ensure_open()?;

        if self.unreachable.load(Ordering::Acquire) {
            debug!(offerer = %self.id, answerer = %peer.id, "memory transport unreachable");
            self.notify_state(PeerState::Failed).await;
            peer.notify_state(PeerState::Failed).await;
            return Ok(());
        }

        let channels = self.channels.lock().clone();
        let handler = peer.channel_handler.lock().clone();

        for local in channels {
            let remote = MemoryLink::new(&local.label);
            MemoryLink::pair(&local, &remote);
            peer.channels.lock().push(Arc::clone(&remote));

            if let Some(handler) = &handler {
                let link: Arc<dyn DataLink> = remote.clone();
                handler(link).await;
            }

            local.open().await;
            remote.open().await;
            debug!(offerer = %self.id, answerer = %peer.id, label = %local.label, "memory channel open");
        }

        self.notify_state(PeerState::Connected).await;
        peer.notify_state(PeerState::Connected).await;
        Ok(())
    }
}

#[async_trait]
impl PeerSession for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataLink>> {
        self.ensure_open()?;
        trace!(session = %self.id, label, ?mode, "memory channels ignore the reliability mode");

        let link = MemoryLink::new(label);
        self.channels.lock().push(Arc::clone(&link));
        Ok(link)
    }

    fn on_data_channel(&self, handler: ChannelHandler) {
        *self.channel_handler.lock() = Some(Arc::new(handler));
    }

    fn on_state_change(&self, handler: StateHandler) {
        *self.state_handler.lock() = Some(Arc::new(handler));
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        Ok(SessionDescription::offer(format!("{}{}", SDP_PREFIX, self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        match self.remote.lock().as_ref() {
            Some(remote) if remote.sdp_type == SdpType::Offer => {}
            _ => {
                return Err(Error::SdpError(
                    "cannot answer without a remote offer".to_string(),
                ))
            }
        }
        Ok(SessionDescription::answer(format!(
            "{}{}",
            SDP_PREFIX, self.id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        *self.local.lock() = Some(desc);

        let mut registry = self.registry.lock();
        registry.retain(|_, session| session.strong_count() > 0);
        registry.insert(self.id.clone(), self.me.clone());
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        let peer = self.lookup(&desc)?;
        let sdp_type = desc.sdp_type;
        *self.remote.lock() = Some(desc);

        match sdp_type {
            SdpType::Offer => Ok(()),
            SdpType::Answer => self.connect(peer).await,
            other => Err(Error::SdpError(format!(
                "{} descriptions are not supported",
                other
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let channels: Vec<_> = self.channels.lock().drain(..).collect();
        for link in channels {
            link.close().await?;
        }
        self.registry.lock().remove(&self.id);
        debug!(session = %self.id, "memory session closed");
        self.notify_state(PeerState::Closed).await;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// One end of an in-process data channel
pub struct MemoryLink {
    label: String,
    state: Mutex<DataChannelState>,
    peer: Mutex<Weak<MemoryLink>>,
    inbox: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    open_handler: Mutex<Option<Arc<EventHandler>>>,
    close_handler: Mutex<Option<Arc<EventHandler>>>,
    message_handler: Mutex<Option<Arc<MessageHandler>>>,
    handler_ready: Arc<Notify>,
}

impl MemoryLink {
    fn new(label: &str) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            label: label.to_string(),
            state: Mutex::new(DataChannelState::Connecting),
            peer: Mutex::new(Weak::new()),
            inbox: Mutex::new(Some(tx)),
            open_handler: Mutex::new(None),
            close_handler: Mutex::new(None),
            message_handler: Mutex::new(None),
            handler_ready: Arc::new(Notify::new()),
        });

        tokio::spawn(deliver(
            Arc::downgrade(&link),
            Arc::clone(&link.handler_ready),
            rx,
        ));
        link
    }

    fn pair(a: &Arc<MemoryLink>, b: &Arc<MemoryLink>) {
        *a.peer.lock() = Arc::downgrade(b);
        *b.peer.lock() = Arc::downgrade(a);
    }

    fn is_inbox_closed(&self) -> bool {
        self.inbox.lock().is_none()
    }

    async fn open(&self) {
        {
            let mut state = self.state.lock();
            if *state != DataChannelState::Connecting {
                return;
            }
            *state = DataChannelState::Open;
        }

        let handler = self.open_handler.lock().clone();
        if let Some(handler) = handler {
            handler().await;
        }
    }

    fn enqueue(&self, data: Bytes) -> Result<()> {
        match self.inbox.lock().as_ref() {
            Some(tx) => tx
                .send(data)
                .map_err(|_| Error::DataChannelError("remote end is gone".to_string())),
            None => Err(Error::DataChannelError("remote end is closed".to_string())),
        }
    }
}

/// Per-link delivery loop
///
/// Ends once the inbox sender is dropped and the backlog is drained, then
/// fires the close handler.
async fn deliver(
    link: Weak<MemoryLink>,
    ready: Arc<Notify>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(data) = rx.recv().await {
        let handler = loop {
            let notified = ready.notified();
            {
                let Some(link) = link.upgrade() else { return };
                let handler = link.message_handler.lock().clone();
                if handler.is_some() {
                    break handler;
                }
                if link.is_inbox_closed() {
                    break None;
                }
            }
            notified.await;
        };

        match handler {
            Some(handler) => handler(data).await,
            None => {
                // Closed before anyone listened.
                while rx.recv().await.is_some() {}
                break;
            }
        }
    }

    let Some(link) = link.upgrade() else { return };
    let handler = link.close_handler.lock().take();
    if let Some(handler) = handler {
        handler().await;
    }
}

#[async_trait]
impl DataLink for MemoryLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn on_open(&self, handler: EventHandler) {
        let handler = Arc::new(handler);
        *self.open_handler.lock() = Some(Arc::clone(&handler));

        if self.state() == DataChannelState::Open {
            tokio::spawn(async move { handler().await });
        }
    }

    fn on_close(&self, handler: EventHandler) {
        *self.close_handler.lock() = Some(Arc::new(handler));
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.message_handler.lock() = Some(Arc::new(handler));
        self.handler_ready.notify_one();
    }

    async fn send(&self, data: &Bytes) -> Result<usize> {
        if self.state() != DataChannelState::Open {
            return Err(Error::DataChannelError("data channel is not open".to_string()));
        }

        let peer = self
            .peer
            .lock()
            .upgrade()
            .ok_or_else(|| Error::DataChannelError("remote end is gone".to_string()))?;
        peer.enqueue(data.clone())?;
        Ok(data.len())
    }

    async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == DataChannelState::Closed {
                return Ok(());
            }
            *state = DataChannelState::Closed;
        }

        self.inbox.lock().take();
        self.handler_ready.notify_one();

        let peer = self.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.close().await?;
        }
        Ok(())
    }
}
