//! Session lifecycle
//!
//! `SessionController` is the only entry point that creates, negotiates and
//! tears down a [`Session`]. At most one session exists at a time.
//!
//! ```text
//! start ──> connect ──> data channel ──> media ──> negotiate
//!                                                    │
//!   create_offer ─> gathering barrier ─> codec filter ─> POST /offer ─> answer
//! ```
//!
//! Every step races the session's cancellation token, so `stop()` can be
//! called at any point and abandons whatever is in flight.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::sdp::filter_codec;
use super::session::{Session, SessionStatus};
use super::signaling::{OfferRequest, SignalingClient};
use super::transport::PeerConnector;
use crate::config::{ClientConfig, SessionOptions};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::{CameraInfo, CaptureRequest, MediaDevices, MediaKind};
use crate::utils::{cancellable, with_deadline};

enum Slot {
    Idle,
    /// Waiting for the connection object
    Connecting { id: String, cancel: CancellationToken },
    Active(Arc<Session>),
}

/// Owns the current session and drives its lifecycle
pub struct SessionController {
    config: ClientConfig,
    connector: Arc<dyn PeerConnector>,
    signaling: Arc<dyn SignalingClient>,
    devices: Arc<dyn MediaDevices>,
    events: Arc<EventBus>,
    slot: Mutex<Slot>,
    selected_camera: Mutex<Option<String>>,
    last_close: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn PeerConnector>,
        signaling: Arc<dyn SignalingClient>,
        devices: Arc<dyn MediaDevices>,
        events: Arc<EventBus>,
    ) -> Self {
        let selected_camera = config.session.video.device_id.clone();
        Self {
            config,
            connector,
            signaling,
            devices,
            events,
            slot: Mutex::new(Slot::Idle),
            selected_camera: Mutex::new(selected_camera),
            last_close: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Create a session and negotiate it with the remote peer
    ///
    /// On failure the session stays in place (nothing is rolled back) and
    /// the caller is expected to `stop()`.
    pub async fn start(&self, mut options: SessionOptions) -> Result<Arc<Session>> {
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Idle) {
                return Err(AppError::InvalidState(
                    "A session is already running, stop it first".to_string(),
                ));
            }
            *slot = Slot::Connecting {
                id: session_id.clone(),
                cancel: cancel.clone(),
            };
        }

        if options.video.device_id.is_none() {
            options.video.device_id = self.selected_camera.lock().clone();
        }
        let ice_servers = if options.use_stun {
            self.config.stun_servers.clone()
        } else {
            Vec::new()
        };

        info!(
            "Starting session {} (datachannel: {}, audio: {}, video: {}, stun: {})",
            session_id, options.use_datachannel, options.use_audio, options.use_video, options.use_stun
        );

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let transport = match cancellable("connect", &cancel, self.connector.connect(ice_servers, peer_tx)).await {
            Ok(transport) => transport,
            Err(e) => {
                self.clear_connecting(&session_id);
                if !e.is_cancelled() {
                    error!("Failed to create peer connection: {}", e);
                }
                return Err(e);
            }
        };

        let session = Session::new(
            session_id.clone(),
            options,
            transport,
            peer_rx,
            self.devices.clone(),
            self.events.clone(),
            cancel,
        );

        if !self.install(&session) {
            // stop() ran while we were connecting
            if let Some(handle) = session.shutdown(self.config.close_grace()).await {
                self.keep_close_handle(handle);
            }
            return Err(AppError::Cancelled(format!(
                "Session {} stopped while connecting",
                session_id
            )));
        }

        self.events.publish(SessionEvent::SessionStarted {
            session_id: session_id.clone(),
            datachannel: session
                .options()
                .use_datachannel
                .then(|| session.options().datachannel_mode.to_string()),
        });

        match self.run_start_pipeline(&session).await {
            Ok(()) => {
                info!("Session {} negotiated", session_id);
                Ok(session)
            }
            Err(e) if e.is_cancelled() => {
                info!("Session {} start interrupted: {}", session_id, e);
                Err(e)
            }
            Err(e) => {
                error!("Session {} failed to start: {}", session_id, e);
                self.events.publish(SessionEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_start_pipeline(&self, session: &Session) -> Result<()> {
        let options = session.options();
        let cancel = session.cancel_token();

        if options.use_datachannel {
            cancellable(
                "data channel setup",
                cancel,
                session.open_channel(options.datachannel_mode, self.config.keepalive_interval()),
            )
            .await?;
        }

        if options.wants_media() {
            let request = CaptureRequest {
                audio: options.use_audio,
                video: options.use_video.then(|| options.video.clone()),
            };
            cancellable(
                "media acquisition",
                cancel,
                session.media().acquire(&request, session.transport().as_ref()),
            )
            .await?;
        }

        self.negotiate_session(session).await
    }

    /// Negotiate the active session if it has not sent an offer yet
    pub async fn negotiate(&self) -> Result<()> {
        let session = self
            .session()
            .ok_or_else(|| AppError::InvalidState("No active session".to_string()))?;
        if session.offer().is_some() {
            return Err(AppError::InvalidState(format!(
                "Session {} is already negotiated",
                session.id()
            )));
        }
        self.negotiate_session(&session).await
    }

    async fn negotiate_session(&self, session: &Session) -> Result<()> {
        let cancel = session.cancel_token();
        let transport = session.transport();
        let options = session.options();
        let deadlines = self.config.deadlines;

        let barrier = session.gathering_barrier();
        cancellable("offer creation", cancel, transport.create_offer()).await?;
        cancellable("ICE gathering", cancel, barrier.wait(deadlines.gathering())).await?;

        let mut offer = cancellable("offer creation", cancel, transport.local_description()).await?;
        offer.sdp = apply_codec_preferences(options, &offer.sdp);
        session.record_offer(offer.clone());

        let request = OfferRequest::new(&offer, options.video_transform);
        debug!("Sending offer for session {} ({} bytes)", session.id(), request.sdp.len());
        let answer = cancellable(
            "signaling exchange",
            cancel,
            with_deadline(
                "signaling exchange",
                deadlines.signaling(),
                self.signaling.exchange(&request),
            ),
        )
        .await?;

        session.record_answer(answer.clone());
        cancellable(
            "remote description",
            cancel,
            transport.set_remote_description(&answer),
        )
        .await
    }

    /// Tear down the current session, if any
    ///
    /// Never fails. The connection object is closed in the background after
    /// the configured grace delay; `wait_closed` waits for it.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Idle);
        match previous {
            Slot::Idle => debug!("stop: no session running"),
            Slot::Connecting { id, cancel } => {
                info!("Cancelling session {} before it connected", id);
                cancel.cancel();
            }
            Slot::Active(session) => {
                info!("Stopping session {}", session.id());
                if let Some(handle) = session.shutdown(self.config.close_grace()).await {
                    self.keep_close_handle(handle);
                }
            }
        }
    }

    /// Wait for the background close of the last stopped session
    pub async fn wait_closed(&self) {
        let handle = self.last_close.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Connection close task failed: {}", e);
            }
        }
    }

    /// Send video from another camera
    ///
    /// The selection is remembered for future starts even when no session
    /// is running. Returns `false` if the live switch did not happen.
    pub async fn switch_camera(&self, device_id: &str) -> bool {
        *self.selected_camera.lock() = Some(device_id.to_string());

        let Some(session) = self.session() else {
            info!("No active session, camera {} will be used on next start", device_id);
            return false;
        };

        match session.switch_camera(device_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to switch camera to {}: {}", device_id, e);
                false
            }
        }
    }

    /// List cameras, selecting the first one if nothing is selected yet
    pub async fn cameras(&self) -> Result<Vec<CameraInfo>> {
        let cameras = self.devices.enumerate_cameras().await?;
        let mut selected = self.selected_camera.lock();
        if selected.is_none() {
            if let Some(first) = cameras.first() {
                debug!("Selecting default camera {}", first.device_id);
                *selected = Some(first.device_id.clone());
            }
        }
        Ok(cameras)
    }

    pub fn selected_camera(&self) -> Option<String> {
        self.selected_camera.lock().clone()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        match &*self.slot.lock() {
            Slot::Active(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Idle)
    }

    pub async fn status(&self) -> Option<SessionStatus> {
        let session = self.session()?;
        Some(session.status().await)
    }

    fn install(&self, session: &Arc<Session>) -> bool {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Connecting { id, .. } if id == session.id() => {
                *slot = Slot::Active(session.clone());
                true
            }
            _ => false,
        }
    }

    fn clear_connecting(&self, session_id: &str) {
        let mut slot = self.slot.lock();
        if matches!(&*slot, Slot::Connecting { id, .. } if id == session_id) {
            *slot = Slot::Idle;
        }
    }

    fn keep_close_handle(&self, handle: JoinHandle<()>) {
        // An older close still pending keeps running detached
        *self.last_close.lock() = Some(handle);
    }
}

/// Restrict the offer to the preferred audio then video codec
fn apply_codec_preferences(options: &SessionOptions, sdp: &str) -> String {
    let mut sdp = sdp.to_string();
    for (kind, choice) in [
        (MediaKind::Audio, &options.audio_codec),
        (MediaKind::Video, &options.video_codec),
    ] {
        if let Some(codec) = choice.codec() {
            let filtered = filter_codec(kind, codec, &sdp);
            if filtered == sdp {
                debug!("{} section left as offered for codec {}", kind, codec);
            }
            sdp = filtered;
        }
    }
    sdp
}
