//! webrtc-rs engine
//!
//! Descriptions are exchanged in one shot, so the local description is only
//! reported after ICE gathering completes and carries every candidate.

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
use std::sync::Arc;
use tracing::{debug, info, instrument};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Engine backed by webrtc-rs
pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    /// Build the webrtc-rs API with the default interceptors
    ///
    /// No codecs are registered: sessions only ever carry data channels.
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self { api })
    }
}

fn ice_servers(config: &NetConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    #[instrument(skip_all)]
    async fn new_session(&self, config: &NetConfig) -> Result<Arc<dyn PeerSession>> {
        let id = uuid::Uuid::new_v4().to_string();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let session_id = id.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let session_id = session_id.clone();
            Box::pin(async move {
                debug!(session = %session_id, "peer connection state: {}", s);
            })
        }));

        info!(session = %id, "created webrtc peer connection");
        Ok(Arc::new(RtcSession { id, pc }))
    }
}

/// One webrtc-rs peer connection
pub struct RtcSession {
    id: String,
    pc: Arc<RTCPeerConnection>,
}

impl RtcSession {
    /// Get the underlying RTCPeerConnection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let sdp_type = desc.sdp_type;
    let parsed = match sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(Error::SdpError(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    parsed.map_err(|e| Error::SdpError(format!("Invalid {} SDP: {}", sdp_type, e)))
}

fn peer_state(state: RTCPeerConnectionState) -> Option<PeerState> {
    match state {
        RTCPeerConnectionState::New => Some(PeerState::New),
        RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
        RTCPeerConnectionState::Connected => Some(PeerState::Connected),
        RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
        RTCPeerConnectionState::Failed => Some(PeerState::Failed),
        RTCPeerConnectionState::Closed => Some(PeerState::Closed),
        _ => None,
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::SdpError("unspecified SDP type".to_string()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl PeerSession for RtcSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<Arc<dyn DataLink>> {
        let init = RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        };

        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel: {}", e))
            })?;

        debug!(session = %self.id, label, ?mode, "created data channel");
        Ok(Arc::new(RtcLink::new(dc)))
    }

    fn on_data_channel(&self, handler: ChannelHandler) {
        let handler = Arc::new(handler);
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let link: Arc<dyn DataLink> = Arc::new(RtcLink::new(dc));
            handler(link)
        }));
    }

    fn on_state_change(&self, handler: StateHandler) {
        let handler = Arc::new(handler);
        let session_id = self.id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                debug!(session = %session_id, "peer connection state: {}", s);
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    if let Some(state) = peer_state(s) {
                        handler(state).await;
                    }
                })
            }));
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc(desc)?;

        // Subscribe before applying so the completion signal cannot be missed.
        let mut gathering_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let _ = gathering_complete.recv().await;
        debug!(session = %self.id, "ICE gathering complete");
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc
            .local_description()
            .await
            .and_then(|desc| from_rtc(desc).ok())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!(session = %self.id, "closing peer connection");
        self.pc.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

/// One webrtc-rs data channel
pub struct RtcLink {
    label: String,
    dc: Arc<RTCDataChannel>,
}

impl RtcLink {
    fn new(dc: Arc<RTCDataChannel>) -> Self {
        let label = dc.label().to_string();
        Self { label, dc }
    }

    /// Get the underlying RTCDataChannel
    pub fn rtc_channel(&self) -> &Arc<RTCDataChannel> {
        &self.dc
    }
}

#[async_trait]
impl DataLink for RtcLink {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> DataChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => DataChannelState::Open,
            RTCDataChannelState::Closing => DataChannelState::Closing,
            RTCDataChannelState::Closed => DataChannelState::Closed,
            _ => DataChannelState::Connecting,
        }
    }

    fn on_open(&self, handler: EventHandler) {
        self.dc.on_open(Box::new(move || handler()));
    }

    fn on_close(&self, handler: EventHandler) {
        self.dc.on_close(Box::new(move || handler()));
    }

    fn on_message(&self, handler: MessageHandler) {
        self.dc
            .on_message(Box::new(move |msg: DataChannelMessage| handler(msg.data)));
    }

    async fn send(&self, data: &Bytes) -> Result<usize> {
        self.dc
            .send(data)
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send message: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close channel: {}", e)))
    }
}
