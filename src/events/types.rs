//! Session event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// Session event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "session_id": "...", "axis": "signaling", "from": "stable", "to": "have-local-offer" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// A session was created and is negotiating
    #[serde(rename = "session.started")]
    SessionStarted {
        session_id: String,
        /// Data channel mode, if a channel was requested
        datachannel: Option<String>,
    },

    /// The session was torn down
    #[serde(rename = "session.stopped")]
    SessionStopped { session_id: String },

    /// One of the state axes moved
    #[serde(rename = "session.state_changed")]
    StateChanged {
        session_id: String,
        /// "signaling", "ice-gathering" or "ice-connection"
        axis: String,
        from: String,
        to: String,
    },

    /// Offer as sent to the signaling endpoint (after codec filtering)
    #[serde(rename = "sdp.offer")]
    LocalOffer { session_id: String, sdp: String },

    /// Answer received from the signaling endpoint
    #[serde(rename = "sdp.answer")]
    RemoteAnswer { session_id: String, sdp: String },

    /// The remote peer announced a track
    #[serde(rename = "media.remote_track")]
    RemoteTrack {
        session_id: String,
        /// "audio" or "video"
        kind: String,
        track_id: String,
    },

    /// The outbound video track now comes from another camera
    #[serde(rename = "media.camera_switched")]
    CameraSwitched { session_id: String, device_id: String },

    /// Line appended to the auxiliary channel log
    #[serde(rename = "channel.log")]
    ChannelLog { session_id: String, line: String },

    /// Round-trip time measured from a pong
    #[serde(rename = "channel.rtt")]
    RttSample { session_id: String, rtt_ms: i64 },

    /// Non-fatal error notification
    #[serde(rename = "error")]
    Error {
        /// Error message
        message: String,
    },
}

impl SessionEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session.started",
            Self::SessionStopped { .. } => "session.stopped",
            Self::StateChanged { .. } => "session.state_changed",
            Self::LocalOffer { .. } => "sdp.offer",
            Self::RemoteAnswer { .. } => "sdp.answer",
            Self::RemoteTrack { .. } => "media.remote_track",
            Self::CameraSwitched { .. } => "media.camera_switched",
            Self::ChannelLog { .. } => "channel.log",
            Self::RttSample { .. } => "channel.rtt",
            Self::Error { .. } => "error",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `channel.*` matches all channel events
    /// - `channel.rtt` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = SessionEvent::RttSample {
            session_id: "s".to_string(),
            rtt_ms: 50,
        };
        assert_eq!(event.event_name(), "channel.rtt");

        let event = SessionEvent::StateChanged {
            session_id: "s".to_string(),
            axis: "signaling".to_string(),
            from: "stable".to_string(),
            to: "have-local-offer".to_string(),
        };
        assert_eq!(event.event_name(), "session.state_changed");
    }

    #[test]
    fn test_matches_topic() {
        let event = SessionEvent::ChannelLog {
            session_id: "s".to_string(),
            line: "- open".to_string(),
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("channel.*"));
        assert!(event.matches_topic("channel.log"));
        assert!(!event.matches_topic("chan.*"));
        assert!(!event.matches_topic("session.*"));
        assert!(!event.matches_topic("channel.rtt"));
    }

    #[test]
    fn test_serialization() {
        let event = SessionEvent::RemoteTrack {
            session_id: "abc".to_string(),
            kind: "video".to_string(),
            track_id: "t1".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("media.remote_track"));
        assert!(json.contains("\"kind\":\"video\""));

        let deserialized: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(deserialized, SessionEvent::RemoteTrack { .. }));
    }
}
