//! The live session
//!
//! A `Session` owns everything created for one `start`: the connection
//! object, the three state axes, the local media, the auxiliary channel with
//! its keep-alive, and the descriptions exchanged. It is created and torn
//! down by the `SessionController` only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gathering::IceGatheringBarrier;
use super::keepalive::{ChannelLog, KeepAlive};
use super::signaling::SessionDescription;
use super::state::{
    IceConnectionState, IceGatheringState, SessionStates, SignalingState, StateAxis, StateTracker,
};
use super::transport::{ChannelReadyState, DataChannelLink, PeerEvent, PeerTransport};
use crate::config::{DataChannelMode, SessionOptions};
use crate::error::Result;
use crate::events::{EventBus, SessionEvent};
use crate::media::{MediaDevices, MediaKind, MediaTrackManager};

/// Label of the auxiliary data channel
pub const AUX_CHANNEL_LABEL: &str = "chat";

/// Track announced by the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrackInfo {
    pub kind: MediaKind,
    pub track_id: String,
}

/// Auxiliary channel and the keep-alive wired to it
pub struct AuxiliaryChannel {
    link: Arc<dyn DataChannelLink>,
    keepalive: Arc<KeepAlive>,
    task: JoinHandle<()>,
}

impl AuxiliaryChannel {
    pub fn link(&self) -> &Arc<dyn DataChannelLink> {
        &self.link
    }

    pub fn keepalive(&self) -> &Arc<KeepAlive> {
        &self.keepalive
    }
}

/// Data channel part of a status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub label: String,
    pub mode: String,
    pub ready_state: ChannelReadyState,
    pub last_rtt_ms: Option<i64>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub signaling_state: SignalingState,
    pub ice_gathering_state: IceGatheringState,
    pub ice_connection_state: IceConnectionState,
    /// Rendered transition logs (` -> a -> b`)
    pub signaling_log: String,
    pub ice_gathering_log: String,
    pub ice_connection_log: String,
    pub datachannel: Option<ChannelStatus>,
    pub channel_log: Vec<String>,
    pub audio_device: Option<String>,
    pub video_device: Option<String>,
    pub remote_tracks: Vec<RemoteTrackInfo>,
    pub offer: Option<String>,
    pub answer: Option<String>,
}

/// A live negotiation session
pub struct Session {
    id: String,
    options: SessionOptions,
    created_at: DateTime<Utc>,
    transport: Arc<dyn PeerTransport>,
    states: Arc<Mutex<SessionStates>>,
    media: MediaTrackManager,
    channel: Mutex<Option<AuxiliaryChannel>>,
    channel_log: ChannelLog,
    offer: Mutex<Option<SessionDescription>>,
    answer: Mutex<Option<SessionDescription>>,
    remote_tracks: Arc<Mutex<Vec<RemoteTrackInfo>>>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
    events: Arc<EventBus>,
    stopped: AtomicBool,
}

impl Session {
    /// Create the session and start applying `peer_events` to its state axes
    pub fn new(
        id: String,
        options: SessionOptions,
        transport: Arc<dyn PeerTransport>,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        devices: Arc<dyn MediaDevices>,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let states = Arc::new(Mutex::new(SessionStates::default()));
        let remote_tracks = Arc::new(Mutex::new(Vec::new()));

        let pump = tokio::spawn(pump_peer_events(
            id.clone(),
            peer_events,
            states.clone(),
            remote_tracks.clone(),
            events.clone(),
        ));

        Arc::new(Self {
            id,
            options,
            created_at: Utc::now(),
            transport,
            states,
            media: MediaTrackManager::new(devices),
            channel: Mutex::new(None),
            channel_log: ChannelLog::new(),
            offer: Mutex::new(None),
            answer: Mutex::new(None),
            remote_tracks,
            cancel,
            pump: Mutex::new(Some(pump)),
            events,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn media(&self) -> &MediaTrackManager {
        &self.media
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.states.lock().signaling.current()
    }

    pub fn ice_gathering_state(&self) -> IceGatheringState {
        self.states.lock().gathering.current()
    }

    pub fn ice_connection_state(&self) -> IceConnectionState {
        self.states.lock().connection.current()
    }

    /// Barrier on this session's gathering state
    pub fn gathering_barrier(&self) -> IceGatheringBarrier {
        IceGatheringBarrier::new(self.states.lock().gathering.watch())
    }

    /// Create the auxiliary channel and wire the keep-alive to it
    pub async fn open_channel(&self, mode: DataChannelMode, keepalive_interval: Duration) -> Result<()> {
        let (link, channel_events) = self
            .transport
            .create_data_channel(AUX_CHANNEL_LABEL, mode)
            .await?;

        let keepalive = Arc::new(KeepAlive::new(
            self.id.clone(),
            link.clone(),
            self.channel_log.clone(),
            keepalive_interval,
            self.events.clone(),
        ));
        let task = keepalive.clone().spawn(channel_events);

        let previous = self.channel.lock().replace(AuxiliaryChannel { link, keepalive, task });
        if let Some(previous) = previous {
            warn!("Session {} replaced an existing data channel", self.id);
            previous.keepalive.on_close();
            previous.task.abort();
        }
        Ok(())
    }

    pub fn channel_link(&self) -> Option<Arc<dyn DataChannelLink>> {
        self.channel.lock().as_ref().map(|c| c.link.clone())
    }

    pub fn keepalive(&self) -> Option<Arc<KeepAlive>> {
        self.channel.lock().as_ref().map(|c| c.keepalive.clone())
    }

    pub fn channel_log(&self) -> &ChannelLog {
        &self.channel_log
    }

    pub fn record_offer(&self, offer: SessionDescription) {
        self.events.publish(SessionEvent::LocalOffer {
            session_id: self.id.clone(),
            sdp: offer.sdp.clone(),
        });
        *self.offer.lock() = Some(offer);
    }

    pub fn record_answer(&self, answer: SessionDescription) {
        self.events.publish(SessionEvent::RemoteAnswer {
            session_id: self.id.clone(),
            sdp: answer.sdp.clone(),
        });
        *self.answer.lock() = Some(answer);
    }

    pub fn offer(&self) -> Option<SessionDescription> {
        self.offer.lock().clone()
    }

    pub fn answer(&self) -> Option<SessionDescription> {
        self.answer.lock().clone()
    }

    pub fn remote_tracks(&self) -> Vec<RemoteTrackInfo> {
        self.remote_tracks.lock().clone()
    }

    /// Move the outbound video to another camera without renegotiating
    pub async fn switch_camera(&self, device_id: &str) -> Result<()> {
        self.media.switch_video(device_id, self.transport.as_ref()).await?;
        self.events.publish(SessionEvent::CameraSwitched {
            session_id: self.id.clone(),
            device_id: device_id.to_string(),
        });
        Ok(())
    }

    pub async fn status(&self) -> SessionStatus {
        let bundle = self.media.bundle().await;

        let (signaling, gathering, connection) = {
            let states = self.states.lock();
            (
                snapshot(&states.signaling),
                snapshot(&states.gathering),
                snapshot(&states.connection),
            )
        };

        let datachannel = self.channel.lock().as_ref().map(|c| ChannelStatus {
            label: c.link.label().to_string(),
            mode: c.link.mode().to_string(),
            ready_state: c.link.ready_state(),
            last_rtt_ms: self.channel_log.last_rtt(),
        });

        SessionStatus {
            id: self.id.clone(),
            created_at: self.created_at,
            signaling_state: signaling.0,
            ice_gathering_state: gathering.0,
            ice_connection_state: connection.0,
            signaling_log: signaling.1,
            ice_gathering_log: gathering.1,
            ice_connection_log: connection.1,
            datachannel,
            channel_log: self
                .channel_log
                .entries()
                .iter()
                .map(|e| e.to_string())
                .collect(),
            audio_device: bundle.audio.map(|t| t.device_id().to_string()),
            video_device: bundle.video.map(|t| t.device_id().to_string()),
            remote_tracks: self.remote_tracks(),
            offer: self.offer().map(|d| d.sdp),
            answer: self.answer().map(|d| d.sdp),
        }
    }

    /// Tear the session down
    ///
    /// Interrupts any pipeline step still running, closes the channel and
    /// its timer, stops local tracks, transceivers and senders, then closes
    /// the connection object after `grace` in the background. Safe to call
    /// at any point and more than once; only the first call does anything.
    pub async fn shutdown(&self, grace: Duration) -> Option<JoinHandle<()>> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.cancel.cancel();

        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.keepalive.cancel_timer();
            if let Err(e) = channel.link.close().await {
                warn!("Failed to close data channel: {}", e);
            }
            channel.keepalive.on_close();
            channel.task.abort();
        }

        let released = self.media.release().await;
        let stopped = self.transport.stop_transceivers().await;
        debug!(
            "Session {} released {} track(s), stopped {} transceiver(s)",
            self.id, released, stopped
        );

        self.events.publish(SessionEvent::SessionStopped {
            session_id: self.id.clone(),
        });
        info!("Session {} stopped, closing connection in {:?}", self.id, grace);

        let transport = self.transport.clone();
        let session_id = self.id.clone();
        Some(tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            if let Err(e) = transport.close().await {
                warn!("Failed to close connection for session {}: {}", session_id, e);
            }
        }))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("options", &self.options)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

fn snapshot<S: StateAxis>(tracker: &StateTracker<S>) -> (S, String) {
    (tracker.current(), tracker.log().render())
}

fn observe<S: StateAxis>(tracker: &mut StateTracker<S>, observed: S, session_id: &str, events: &EventBus) {
    match tracker.observe(observed) {
        Some(record) => {
            debug!("[{}] {} state: {} -> {}", session_id, S::AXIS, record.from, record.to);
            events.publish(SessionEvent::StateChanged {
                session_id: session_id.to_string(),
                axis: S::AXIS.to_string(),
                from: record.from.to_string(),
                to: record.to.to_string(),
            });
        }
        None => debug!(
            "[{}] {} report '{}' ignored in state '{}'",
            session_id,
            S::AXIS,
            observed,
            tracker.current()
        ),
    }
}

async fn pump_peer_events(
    session_id: String,
    mut rx: mpsc::UnboundedReceiver<PeerEvent>,
    states: Arc<Mutex<SessionStates>>,
    remote_tracks: Arc<Mutex<Vec<RemoteTrackInfo>>>,
    events: Arc<EventBus>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            PeerEvent::Signaling(state) => {
                observe(&mut states.lock().signaling, state, &session_id, &events);
            }
            PeerEvent::IceGathering(state) => {
                observe(&mut states.lock().gathering, state, &session_id, &events);
            }
            PeerEvent::IceConnection(state) => {
                if state == IceConnectionState::Failed {
                    warn!("[{}] ICE connection failed", session_id);
                }
                observe(&mut states.lock().connection, state, &session_id, &events);
            }
            PeerEvent::RemoteTrack { kind, track_id } => {
                info!("[{}] Remote {} track: {}", session_id, kind, track_id);
                remote_tracks.lock().push(RemoteTrackInfo {
                    kind,
                    track_id: track_id.clone(),
                });
                events.publish(SessionEvent::RemoteTrack {
                    session_id: session_id.clone(),
                    kind: kind.to_string(),
                    track_id,
                });
            }
        }
    }
    debug!("[{}] Peer event stream ended", session_id);
}
