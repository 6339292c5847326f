//! WebRTC session negotiation
//!
//! This module drives a single peer connection through offer/answer with a
//! remote signaling endpoint:
//! - Local offer with optional codec restriction per media kind
//! - ICE gathering barrier (the full offer is sent, no trickle)
//! - HTTP offer/answer exchange
//! - Auxiliary data channel with ping/pong keep-alive
//! - Camera switching without renegotiation
//!
//! Architecture:
//! ```text
//! SessionController
//!        |
//!        v
//! Session ---- MediaTrackManager (local tracks)
//!   |    \
//!   |     +--- AuxiliaryChannel + KeepAlive ("chat")
//!   v
//! PeerTransport (RtcPeer) <------ SDP Exchange ------> SignalingClient (POST /offer)
//!   |
//!   +--- PeerEvent stream --> StateTracker (signaling / ice-gathering / ice-connection)
//! ```

pub mod controller;
pub mod gathering;
pub mod keepalive;
pub mod mdns;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod state;
pub mod transport;

pub use controller::SessionController;
pub use gathering::IceGatheringBarrier;
pub use keepalive::{ChannelLog, ChannelLogEntry, KeepAlive};
pub use peer::{RtcConnector, RtcPeer};
pub use sdp::filter_codec;
pub use session::{Session, SessionStatus};
pub use signaling::{HttpSignaling, OfferRequest, SdpType, SessionDescription, SignalingClient};
pub use state::{IceConnectionState, IceGatheringState, SignalingState};
pub use transport::{ChannelReadyState, DataChannelLink, PeerConnector, PeerTransport};
