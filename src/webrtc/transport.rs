//! Connection object seams
//!
//! The orchestration only talks to the peer connection through these traits.
//! `peer::RtcConnector` implements them on top of webrtc-rs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::signaling::SessionDescription;
use super::state::{IceConnectionState, IceGatheringState, SignalingState};
use crate::config::DataChannelMode;
use crate::error::Result;
use crate::media::{MediaKind, MediaTrack};

/// Notifications from the connection object, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Signaling(SignalingState),
    IceGathering(IceGatheringState),
    IceConnection(IceConnectionState),
    /// The remote side added a track
    RemoteTrack { kind: MediaKind, track_id: String },
}

/// Notifications from a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Close,
}

/// Data channel ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for ChannelReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelReadyState::Connecting => write!(f, "connecting"),
            ChannelReadyState::Open => write!(f, "open"),
            ChannelReadyState::Closing => write!(f, "closing"),
            ChannelReadyState::Closed => write!(f, "closed"),
        }
    }
}

/// An auxiliary data channel
#[async_trait]
pub trait DataChannelLink: Send + Sync {
    fn label(&self) -> &str;

    /// Ordering/reliability mode the channel was created with
    fn mode(&self) -> DataChannelMode;

    fn ready_state(&self) -> ChannelReadyState;

    async fn send_text(&self, text: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Add a local track on a new sender
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    /// Put `track` on the existing sender of `kind`.
    ///
    /// Returns `false` when there is no sender of that kind.
    async fn replace_track(&self, kind: MediaKind, track: &MediaTrack) -> Result<bool>;

    /// Create a data channel; its events arrive on the returned receiver
    async fn create_data_channel(
        &self,
        label: &str,
        mode: DataChannelMode,
    ) -> Result<(Arc<dyn DataChannelLink>, mpsc::UnboundedReceiver<ChannelEvent>)>;

    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, answer: &SessionDescription) -> Result<()>;

    /// Stop every transceiver and detach every sender's track.
    ///
    /// Returns the number of transceivers stopped.
    async fn stop_transceivers(&self) -> usize;

    async fn close(&self) -> Result<()>;
}

/// Factory for peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a connection using `ice_servers` (empty for host candidates only).
    /// State changes are delivered on `events`.
    async fn connect(
        &self,
        ice_servers: Vec<String>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerTransport>>;
}
