use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Default signaling endpoint (the `/offer` path is appended by the client)
pub const DEFAULT_SIGNALING_URL: &str = "http://localhost:8080";

/// Public STUN server used when `use_stun` is set
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the signaling endpoint
    pub signaling_url: String,
    /// STUN server URLs (only used when the session enables STUN)
    pub stun_servers: Vec<String>,
    /// Deadlines for the negotiation pipeline
    pub deadlines: NegotiationDeadlines,
    /// Keep-alive ping period in milliseconds
    pub keepalive_interval_ms: u64,
    /// Delay before the peer connection is closed on stop, in milliseconds
    pub close_grace_ms: u64,
    /// Default options for `start`
    pub session: SessionOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            deadlines: NegotiationDeadlines::default(),
            keepalive_interval_ms: 1000,
            close_grace_ms: 500,
            session: SessionOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms.max(1))
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Deadlines for the two waits of the negotiation pipeline.
///
/// A value of 0 disables the deadline and the wait is unbounded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NegotiationDeadlines {
    /// ICE candidate gathering timeout (ms)
    pub gathering_timeout_ms: u64,
    /// Signaling request/response timeout (ms)
    pub signaling_timeout_ms: u64,
}

impl Default for NegotiationDeadlines {
    fn default() -> Self {
        Self {
            gathering_timeout_ms: 5000,
            signaling_timeout_ms: 30000,
        }
    }
}

impl NegotiationDeadlines {
    /// No deadlines at all
    pub fn unbounded() -> Self {
        Self {
            gathering_timeout_ms: 0,
            signaling_timeout_ms: 0,
        }
    }

    pub fn gathering(&self) -> Option<Duration> {
        non_zero_millis(self.gathering_timeout_ms)
    }

    pub fn signaling(&self) -> Option<Duration> {
        non_zero_millis(self.signaling_timeout_ms)
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Options consumed by a single `start`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionOptions {
    /// Create the auxiliary data channel
    pub use_datachannel: bool,
    /// Ordering/reliability of the auxiliary data channel
    pub datachannel_mode: DataChannelMode,
    /// Capture and send audio
    pub use_audio: bool,
    /// Capture and send video
    pub use_video: bool,
    /// Video capture constraints
    pub video: VideoConstraints,
    /// Preferred audio codec
    pub audio_codec: CodecChoice,
    /// Preferred video codec
    pub video_codec: CodecChoice,
    /// Transform label forwarded to the remote side
    pub video_transform: VideoTransform,
    /// Use the configured STUN servers
    pub use_stun: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            use_datachannel: true,
            datachannel_mode: DataChannelMode::OrderedReliable,
            use_audio: false,
            use_video: true,
            video: VideoConstraints::default(),
            audio_codec: CodecChoice::Default,
            video_codec: CodecChoice::Default,
            video_transform: VideoTransform::None,
            use_stun: false,
        }
    }
}

impl SessionOptions {
    /// Whether any local capture is requested
    pub fn wants_media(&self) -> bool {
        self.use_audio || self.use_video
    }
}

/// Data channel ordering and reliability mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DataChannelMode {
    /// Ordered, reliable delivery
    #[default]
    OrderedReliable,
    /// Unordered, no retransmission
    UnorderedNoRetransmit,
    /// Unordered, retransmitted only within a packet lifetime
    UnorderedTimeLimited { lifetime_ms: u16 },
}

impl DataChannelMode {
    pub fn ordered(&self) -> bool {
        matches!(self, DataChannelMode::OrderedReliable)
    }

    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::UnorderedNoRetransmit => Some(0),
            _ => None,
        }
    }

    pub fn max_packet_lifetime_ms(&self) -> Option<u16> {
        match self {
            DataChannelMode::UnorderedTimeLimited { lifetime_ms } => Some(*lifetime_ms),
            _ => None,
        }
    }
}

impl std::str::FromStr for DataChannelMode {
    type Err = AppError;

    /// Accepts `ordered-reliable`, `unordered-no-retransmit`,
    /// `unordered-time-limited` (500 ms) and `unordered-time-limited=<ms>`.
    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "ordered-reliable" | "ordered" | "reliable" => Ok(DataChannelMode::OrderedReliable),
            "unordered-no-retransmit" | "unreliable" => Ok(DataChannelMode::UnorderedNoRetransmit),
            "unordered-time-limited" => Ok(DataChannelMode::UnorderedTimeLimited { lifetime_ms: 500 }),
            other => {
                let lifetime = other
                    .strip_prefix("unordered-time-limited=")
                    .ok_or_else(|| AppError::Config(format!("Unknown data channel mode: {}", s)))?;
                let lifetime_ms = lifetime.parse::<u16>().map_err(|e| {
                    AppError::Config(format!("Invalid packet lifetime '{}': {}", lifetime, e))
                })?;
                Ok(DataChannelMode::UnorderedTimeLimited { lifetime_ms })
            }
        }
    }
}

impl std::fmt::Display for DataChannelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataChannelMode::OrderedReliable => write!(f, "ordered-reliable"),
            DataChannelMode::UnorderedNoRetransmit => write!(f, "unordered-no-retransmit"),
            DataChannelMode::UnorderedTimeLimited { lifetime_ms } => {
                write!(f, "unordered-time-limited={}", lifetime_ms)
            }
        }
    }
}

/// Codec preference for one media kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CodecChoice {
    /// Keep whatever the offer lists
    #[default]
    Default,
    /// Restrict to a codec identifier such as `opus/48000/2` or `VP8/90000`
    Codec(String),
}

impl CodecChoice {
    pub fn codec(&self) -> Option<&str> {
        match self {
            CodecChoice::Default => None,
            CodecChoice::Codec(id) => Some(id),
        }
    }
}

impl From<String> for CodecChoice {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            CodecChoice::Default
        } else {
            CodecChoice::Codec(trimmed.to_string())
        }
    }
}

impl From<&str> for CodecChoice {
    fn from(value: &str) -> Self {
        CodecChoice::from(value.to_string())
    }
}

impl From<CodecChoice> for String {
    fn from(value: CodecChoice) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for CodecChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecChoice::Default => write!(f, "default"),
            CodecChoice::Codec(id) => write!(f, "{}", id),
        }
    }
}

/// Transform the remote side should apply to our video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoTransform {
    #[default]
    None,
    Detect,
}

impl std::str::FromStr for VideoTransform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(VideoTransform::None),
            "detect" => Ok(VideoTransform::Detect),
            other => Err(AppError::Config(format!("Unknown video transform: {}", other))),
        }
    }
}

impl std::fmt::Display for VideoTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoTransform::None => write!(f, "none"),
            VideoTransform::Detect => write!(f, "detect"),
        }
    }
}

/// Video capture constraints
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VideoConstraints {
    /// Camera device id (e.g., /dev/video0)
    pub device_id: Option<String>,
    /// Requested width
    pub width: Option<u32>,
    /// Requested height
    pub height: Option<u32>,
}

impl VideoConstraints {
    /// Apply a `WIDTHxHEIGHT` resolution string; an empty string clears it
    pub fn set_resolution(&mut self, resolution: &str) -> Result<()> {
        match parse_resolution(resolution)? {
            Some((width, height)) => {
                self.width = Some(width);
                self.height = Some(height);
            }
            None => {
                self.width = None;
                self.height = None;
            }
        }
        Ok(())
    }
}

/// Parse `640x480` into `(640, 480)`; empty input means "default resolution"
pub fn parse_resolution(s: &str) -> Result<Option<(u32, u32)>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }

    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| AppError::Config(format!("Invalid resolution: {}", s)))?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|e| AppError::Config(format!("Invalid resolution width '{}': {}", w, e)))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|e| AppError::Config(format!("Invalid resolution height '{}': {}", h, e)))?;

    if width == 0 || height == 0 {
        return Err(AppError::Config(format!("Invalid resolution: {}", s)));
    }

    Ok(Some((width, height)))
}
