//! WebRTC peer connection backed by webrtc-rs

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::mdns::{default_mdns_host_name, mdns_mode, mdns_mode_label};
use super::signaling::SessionDescription;
use super::state::{IceConnectionState, IceGatheringState, SignalingState};
use super::transport::{ChannelEvent, ChannelReadyState, DataChannelLink, PeerConnector, PeerEvent, PeerTransport};
use crate::config::DataChannelMode;
use crate::error::{AppError, Result};
use crate::media::{MediaKind, MediaTrack};

fn map_signaling(state: RTCSignalingState) -> Option<SignalingState> {
    match state {
        RTCSignalingState::Stable => Some(SignalingState::Stable),
        RTCSignalingState::HaveLocalOffer => Some(SignalingState::HaveLocalOffer),
        RTCSignalingState::HaveRemotePranswer => Some(SignalingState::HaveRemoteAnswer),
        RTCSignalingState::Closed => Some(SignalingState::Closed),
        _ => None,
    }
}

fn map_gathering(state: RTCIceGathererState) -> Option<IceGatheringState> {
    match state {
        RTCIceGathererState::New => Some(IceGatheringState::New),
        RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
        RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
        _ => None,
    }
}

fn map_connection(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

fn map_ready_state(state: RTCDataChannelState) -> ChannelReadyState {
    match state {
        RTCDataChannelState::Open => ChannelReadyState::Open,
        RTCDataChannelState::Closing => ChannelReadyState::Closing,
        RTCDataChannelState::Closed => ChannelReadyState::Closed,
        _ => ChannelReadyState::Connecting,
    }
}

fn data_channel_init(mode: DataChannelMode) -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(mode.ordered()),
        max_retransmits: mode.max_retransmits(),
        max_packet_life_time: mode.max_packet_lifetime_ms(),
        protocol: None,
        negotiated: None,
    }
}

/// Text frames become channel messages; binary frames are not part of the protocol
fn message_event(msg: &DataChannelMessage) -> Option<ChannelEvent> {
    if !msg.is_string {
        debug!("Ignoring {} byte binary data channel message", msg.data.len());
        return None;
    }
    Some(ChannelEvent::Message(
        String::from_utf8_lossy(&msg.data).into_owned(),
    ))
}

/// Creates webrtc-rs peer connections
#[derive(Debug, Default)]
pub struct RtcConnector;

impl RtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(
        &self,
        ice_servers: Vec<String>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let peer = RtcPeer::new(ice_servers, events).await?;
        Ok(Arc::new(peer))
    }
}

/// A webrtc-rs peer connection
pub struct RtcPeer {
    id: String,
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    pub async fn new(ice_servers: Vec<String>, events: mpsc::UnboundedSender<PeerEvent>) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode();
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(default_mdns_host_name(&id));
        }
        debug!("WebRTC mDNS mode: {} (peer {})", mdns_mode_label(mode), id);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|url| RTCIceServer {
                    urls: vec![url],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        info!(
            "Creating peer connection {} with {} ICE server(s)",
            id,
            rtc_config.ice_servers.len()
        );

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let peer = Self { id, pc: Arc::new(pc) };
        peer.setup_event_handlers(events);
        Ok(peer)
    }

    fn setup_event_handlers(&self, events: mpsc::UnboundedSender<PeerEvent>) {
        let tx = events.clone();
        self.pc.on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
            if let Some(state) = map_signaling(s) {
                let _ = tx.send(PeerEvent::Signaling(state));
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                if let Some(state) = map_gathering(s) {
                    let _ = tx.send(PeerEvent::IceGathering(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                if let Some(state) = map_connection(s) {
                    let _ = tx.send(PeerEvent::IceConnection(state));
                }
                Box::pin(async {})
            }));

        let tx = events;
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                if let Some(kind) = MediaKind::from_codec_type(track.kind()) {
                    let _ = tx.send(PeerEvent::RemoteTrack {
                        kind,
                        track_id: track.id(),
                    });
                }
                Box::pin(async {})
            },
        ));
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let sender = self
            .pc
            .add_track(track.as_track_local())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add {} track: {}", track.kind(), e)))?;

        // Drain RTCP so the interceptors keep running
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: &MediaTrack) -> Result<bool> {
        for sender in self.pc.get_senders().await {
            let current_kind = sender
                .track()
                .await
                .and_then(|t| MediaKind::from_codec_type(t.kind()));
            if current_kind != Some(kind) {
                continue;
            }

            sender
                .replace_track(Some(track.as_track_local()))
                .await
                .map_err(|e| AppError::WebRtcError(format!("Failed to replace {} track: {}", kind, e)))?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<(Arc<dyn DataChannelLink>, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let dc = self
            .pc
            .create_data_channel(label, Some(data_channel_init(mode)))
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create data channel: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let open_tx = tx.clone();
        dc.on_open(Box::new(move || {
            let _ = open_tx.send(ChannelEvent::Open);
            Box::pin(async {})
        }));

        let message_tx = tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if let Some(event) = message_event(&msg) {
                let _ = message_tx.send(event);
            }
            Box::pin(async {})
        }));

        dc.on_close(Box::new(move || {
            let _ = tx.send(ChannelEvent::Close);
            Box::pin(async {})
        }));

        info!("Data channel '{}' created ({})", label, mode);
        let link: Arc<dyn DataChannelLink> = Arc::new(RtcDataChannel { dc, mode });
        Ok((link, rx))
    }

    async fn create_offer(&self) -> Result<()> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        Ok(())
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::InvalidState("No local description".to_string()))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn set_remote_description(&self, answer: &SessionDescription) -> Result<()> {
        let sdp = RTCSessionDescription::answer(answer.sdp.clone())
            .map_err(|e| AppError::Signaling(format!("Invalid SDP answer: {}", e)))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }

    async fn stop_transceivers(&self) -> usize {
        let mut stopped = 0;
        for transceiver in self.pc.get_transceivers().await {
            let sender = transceiver.sender().await;
            if let Err(e) = sender.replace_track(None).await {
                debug!("Failed to detach sender track: {}", e);
            }
            match transceiver.stop().await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("Failed to stop transceiver: {}", e),
            }
        }
        stopped
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        info!("Peer connection {} closed", self.id);
        Ok(())
    }
}

/// A webrtc-rs data channel
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
    mode: DataChannelMode,
}

#[async_trait]
impl DataChannelLink for RtcDataChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn mode(&self) -> DataChannelMode {
        self.mode
    }

    fn ready_state(&self) -> ChannelReadyState {
        map_ready_state(self.dc.ready_state())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.dc
            .send_text(text.to_string())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to send on '{}': {}", self.dc.label(), e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close data channel: {}", e)))
    }
}
