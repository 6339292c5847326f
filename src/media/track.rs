//! Local media tracks and the capture streams they belong to

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::VideoConstraints;

/// Media kind of a track or SDP media section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn codec_type(&self) -> RTPCodecType {
        match self {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        }
    }

    pub fn from_codec_type(codec_type: RTPCodecType) -> Option<Self> {
        match codec_type {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Create RTP codec capability for a local video track (VP8)
pub fn video_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Create RTP codec capability for a local audio track (Opus)
pub fn audio_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    device_id: String,
    local: Arc<TrackLocalStaticSample>,
    live: AtomicBool,
}

/// A local capture track
///
/// Cheap to clone; all clones share the same live flag, so stopping any
/// clone stops the track.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create a live track bound to a capture device
    pub fn new(kind: MediaKind, device_id: impl Into<String>, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let capability = match kind {
            MediaKind::Audio => audio_codec_capability(),
            MediaKind::Video => video_codec_capability(),
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            stream_id.to_string(),
        ));

        Self {
            inner: Arc::new(TrackInner {
                id,
                kind,
                device_id: device_id.into(),
                local,
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Stop the track. Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        let was_live = self.inner.live.swap(false, Ordering::AcqRel);
        if was_live {
            debug!("Stopped {} track {} ({})", self.kind(), self.id(), self.device_id());
        }
        was_live
    }

    /// The track as handed to the peer connection
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.local.clone()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("device_id", &self.inner.device_id)
            .field("live", &self.is_live())
            .finish()
    }
}

/// What to capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Capture from the default microphone
    pub audio: bool,
    /// Capture video with these constraints
    pub video: Option<VideoConstraints>,
}

impl CaptureRequest {
    pub fn is_empty(&self) -> bool {
        !self.audio && self.video.is_none()
    }

    /// Video-only request bound to a specific camera
    pub fn camera(device_id: &str) -> Self {
        Self {
            audio: false,
            video: Some(VideoConstraints {
                device_id: Some(device_id.to_string()),
                ..Default::default()
            }),
        }
    }
}

/// Tracks produced by one capture request
#[derive(Debug, Clone)]
pub struct CaptureStream {
    pub id: String,
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

impl CaptureStream {
    pub fn new(audio: Option<MediaTrack>, video: Option<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            audio,
            video,
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.audio.iter().chain(self.video.iter())
    }

    /// Stop every track of the stream, returning how many were still live
    pub fn stop_all(&self) -> usize {
        self.tracks().filter(|t| t.stop()).count()
    }
}
