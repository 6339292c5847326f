//! In-memory collaborators for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::DataChannelMode;
use crate::error::{AppError, Result};
use crate::media::{CameraInfo, CaptureRequest, CaptureStream, MediaDevices, MediaKind, MediaTrack};
use crate::webrtc::signaling::{OfferRequest, SessionDescription, SignalingClient};
use crate::webrtc::state::{IceConnectionState, IceGatheringState, SignalingState};
use crate::webrtc::transport::{
    ChannelEvent, ChannelReadyState, DataChannelLink, PeerConnector, PeerEvent, PeerTransport,
};

pub const FAKE_OFFER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0 8\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 102\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:102 H264/90000\r\n\
m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
a=candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host\r\n";

pub const FAKE_ANSWER: &str = "v=0\r\no=- 9 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// Cameras by id; audio is always available
pub struct FakeDevices {
    cameras: Vec<String>,
    acquired: Mutex<Vec<MediaTrack>>,
    hang: AtomicBool,
    calls: AtomicUsize,
}

impl FakeDevices {
    pub fn new(cameras: &[&str]) -> Self {
        Self {
            cameras: cameras.iter().map(|c| c.to_string()).collect(),
            acquired: Mutex::new(Vec::new()),
            hang: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// `get_user_media` never completes
    pub fn hanging(cameras: &[&str]) -> Self {
        let devices = Self::new(cameras);
        devices.hang.store(true, Ordering::SeqCst);
        devices
    }

    /// Every track handed out so far
    pub fn acquired(&self) -> Vec<MediaTrack> {
        self.acquired.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>> {
        Ok(self
            .cameras
            .iter()
            .map(|id| CameraInfo {
                device_id: id.clone(),
                label: format!("Fake {}", id),
            })
            .collect())
    }

    async fn get_user_media(&self, request: &CaptureRequest) -> Result<CaptureStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let video = match &request.video {
            Some(constraints) => {
                let id = match constraints.device_id.as_deref() {
                    Some(id) if self.cameras.iter().any(|c| c == id) => id.to_string(),
                    Some(id) => return Err(AppError::media(id, "device not found")),
                    None => self
                        .cameras
                        .first()
                        .cloned()
                        .ok_or_else(|| AppError::media("camera", "no camera available"))?,
                };
                Some(MediaTrack::new(MediaKind::Video, id, "fake-stream"))
            }
            None => None,
        };
        let audio = request
            .audio
            .then(|| MediaTrack::new(MediaKind::Audio, "default", "fake-stream"));

        let stream = CaptureStream::new(audio, video);
        self.acquired.lock().extend(stream.tracks().cloned());
        Ok(stream)
    }
}

/// Data channel recording what was sent
pub struct FakeChannel {
    label: String,
    mode: DataChannelMode,
    state: Mutex<ChannelReadyState>,
    sent: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl FakeChannel {
    pub fn new(label: &str, mode: DataChannelMode) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            mode,
            state: Mutex::new(ChannelReadyState::Connecting),
            sent: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    pub fn with_events(label: &str, mode: DataChannelMode) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let channel = Self::new(label, mode);
        let (tx, rx) = mpsc::unbounded_channel();
        *channel.events.lock() = Some(tx);
        (channel, rx)
    }

    fn emit(&self, event: ChannelEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn open(&self) {
        *self.state.lock() = ChannelReadyState::Open;
        self.emit(ChannelEvent::Open);
    }

    /// Deliver a message from the remote side
    pub fn receive(&self, text: &str) {
        self.emit(ChannelEvent::Message(text.to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DataChannelLink for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn mode(&self) -> DataChannelMode {
        self.mode
    }

    fn ready_state(&self) -> ChannelReadyState {
        *self.state.lock()
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if *self.state.lock() == ChannelReadyState::Closed {
            return Err(AppError::WebRtcError("data channel closed".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let was = std::mem::replace(&mut *self.state.lock(), ChannelReadyState::Closed);
        if was != ChannelReadyState::Closed {
            self.emit(ChannelEvent::Close);
            // Sender dropped like a real channel's handlers
            self.events.lock().take();
        }
        Ok(())
    }
}

/// Peer connection that walks through the usual state sequence
pub struct FakeTransport {
    events: Option<mpsc::UnboundedSender<PeerEvent>>,
    gather_delay: Duration,
    senders: Mutex<Vec<(MediaKind, Option<MediaTrack>)>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    offers: AtomicUsize,
    transceivers_stopped: AtomicBool,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::build(None, Duration::from_millis(10))
    }

    pub fn with_events(events: mpsc::UnboundedSender<PeerEvent>, gather_delay: Duration) -> Self {
        Self::build(Some(events), gather_delay)
    }

    fn build(events: Option<mpsc::UnboundedSender<PeerEvent>>, gather_delay: Duration) -> Self {
        Self {
            events,
            gather_delay,
            senders: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            offers: AtomicUsize::new(0),
            transceivers_stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: PeerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// `(kind, track id)` of every sender that has a track
    pub fn senders(&self) -> Vec<(MediaKind, String)> {
        self.senders
            .lock()
            .iter()
            .filter_map(|(kind, track)| track.as_ref().map(|t| (*kind, t.id().to_string())))
            .collect()
    }

    pub fn sender_track(&self, kind: MediaKind) -> Option<String> {
        self.senders
            .lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, t)| t.as_ref().map(|t| t.id().to_string()))
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().clone()
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn transceivers_stopped(&self) -> bool {
        self.transceivers_stopped.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the remote side announcing a track
    pub fn remote_track(&self, kind: MediaKind, track_id: &str) {
        self.emit(PeerEvent::RemoteTrack {
            kind,
            track_id: track_id.to_string(),
        });
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        self.senders.lock().push((track.kind(), Some(track.clone())));
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: &MediaTrack) -> Result<bool> {
        let mut senders = self.senders.lock();
        match senders.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, slot)) => {
                *slot = Some(track.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<(Arc<dyn DataChannelLink>, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let (channel, rx) = FakeChannel::with_events(label, mode);
        self.channels.lock().push(channel.clone());
        let link: Arc<dyn DataChannelLink> = channel;
        Ok((link, rx))
    }

    async fn create_offer(&self) -> Result<()> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        *self.local.lock() = Some(SessionDescription::offer(FAKE_OFFER));
        self.emit(PeerEvent::Signaling(SignalingState::HaveLocalOffer));
        self.emit(PeerEvent::IceGathering(IceGatheringState::Gathering));

        if let Some(tx) = self.events.clone() {
            let delay = self.gather_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(PeerEvent::IceGathering(IceGatheringState::Complete));
            });
        }
        Ok(())
    }

    async fn local_description(&self) -> Result<SessionDescription> {
        self.local
            .lock()
            .clone()
            .ok_or_else(|| AppError::InvalidState("No local description".to_string()))
    }

    async fn set_remote_description(&self, answer: &SessionDescription) -> Result<()> {
        *self.remote.lock() = Some(answer.clone());
        self.emit(PeerEvent::Signaling(SignalingState::Stable));
        self.emit(PeerEvent::IceConnection(IceConnectionState::Checking));
        self.emit(PeerEvent::IceConnection(IceConnectionState::Connected));
        for channel in self.channels() {
            channel.open();
        }
        Ok(())
    }

    async fn stop_transceivers(&self) -> usize {
        self.transceivers_stopped.store(true, Ordering::SeqCst);
        let mut senders = self.senders.lock();
        for (_, track) in senders.iter_mut() {
            track.take();
        }
        senders.len()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for channel in self.channels() {
            let _ = channel.close().await;
        }
        self.emit(PeerEvent::Signaling(SignalingState::Closed));
        self.emit(PeerEvent::IceConnection(IceConnectionState::Closed));
        Ok(())
    }
}

/// Hands out `FakeTransport`s and remembers them
pub struct FakeConnector {
    gather_delay: Duration,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    ice_servers: Mutex<Vec<Vec<String>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_gather_delay(Duration::from_millis(10))
    }

    /// Gathering completes `delay` after the offer; `Duration::MAX` never completes
    pub fn with_gather_delay(delay: Duration) -> Self {
        Self {
            gather_delay: delay,
            transports: Mutex::new(Vec::new()),
            ice_servers: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Option<Arc<FakeTransport>> {
        self.transports.lock().last().cloned()
    }

    pub fn connections(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn ice_servers(&self) -> Vec<Vec<String>> {
        self.ice_servers.lock().clone()
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        ice_servers: Vec<String>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(FakeTransport::with_events(events, self.gather_delay));
        self.transports.lock().push(transport.clone());
        self.ice_servers.lock().push(ice_servers);
        let transport: Arc<dyn PeerTransport> = transport;
        Ok(transport)
    }
}

enum SignalingBehaviour {
    Answer,
    Fail,
    Hang,
}

/// Signaling endpoint that answers, fails or never responds
pub struct FakeSignaling {
    behaviour: SignalingBehaviour,
    requests: Mutex<Vec<OfferRequest>>,
}

impl FakeSignaling {
    fn build(behaviour: SignalingBehaviour) -> Self {
        Self {
            behaviour,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answering() -> Self {
        Self::build(SignalingBehaviour::Answer)
    }

    pub fn failing() -> Self {
        Self::build(SignalingBehaviour::Fail)
    }

    pub fn hanging() -> Self {
        Self::build(SignalingBehaviour::Hang)
    }

    pub fn requests(&self) -> Vec<OfferRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SignalingClient for FakeSignaling {
    async fn exchange(&self, request: &OfferRequest) -> Result<SessionDescription> {
        self.requests.lock().push(request.clone());
        match self.behaviour {
            SignalingBehaviour::Answer => Ok(SessionDescription::answer(FAKE_ANSWER)),
            SignalingBehaviour::Fail => Err(AppError::Signaling("connection refused".to_string())),
            SignalingBehaviour::Hang => std::future::pending().await,
        }
    }
}
