//! Local media ownership for a session
//!
//! The manager is the only owner of the capture stream. Tracks are attached
//! to the peer connection on acquisition, released on stop, and the video
//! track can be swapped on its sender without renegotiation.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::device::MediaDevices;
use super::track::{CaptureRequest, CaptureStream, MediaKind, MediaTrack};
use crate::error::{AppError, Result};
use crate::webrtc::transport::PeerTransport;

/// Tracks currently owned by the session
#[derive(Debug, Clone, Default)]
pub struct LocalMediaBundle {
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

impl LocalMediaBundle {
    fn from_stream(stream: CaptureStream) -> Self {
        Self {
            audio: stream.audio,
            video: stream.video,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for track in self.audio.take().into_iter().chain(self.video.take()) {
            if track.stop() {
                stopped += 1;
            }
        }
        stopped
    }
}

/// Capture stream not yet owned by the bundle; stopped if dropped
struct PendingStream(Option<CaptureStream>);

impl PendingStream {
    fn tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.0.iter().flat_map(|s| s.tracks())
    }

    fn take(mut self) -> CaptureStream {
        match self.0.take() {
            Some(stream) => stream,
            None => unreachable!("pending stream taken twice"),
        }
    }
}

impl Drop for PendingStream {
    fn drop(&mut self) {
        if let Some(stream) = self.0.take() {
            let stopped = stream.stop_all();
            debug!("Dropped unclaimed capture stream {} ({} track(s) stopped)", stream.id, stopped);
        }
    }
}

/// Acquires, attaches and releases local tracks
pub struct MediaTrackManager {
    devices: Arc<dyn MediaDevices>,
    bundle: Mutex<LocalMediaBundle>,
}

impl MediaTrackManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            bundle: Mutex::new(LocalMediaBundle::default()),
        }
    }

    /// Acquire the requested tracks and add them to the peer connection
    pub async fn acquire(&self, request: &CaptureRequest, transport: &dyn PeerTransport) -> Result<()> {
        if request.is_empty() {
            return Ok(());
        }

        let pending = PendingStream(Some(self.devices.get_user_media(request).await?));
        let tracks: Vec<MediaTrack> = pending.tracks().cloned().collect();

        // Ownership first, so a stop() racing the attach still releases the tracks
        {
            let mut bundle = self.bundle.lock().await;
            let stream = pending.take();
            debug!("Capture stream {} acquired", stream.id);
            let mut previous = std::mem::replace(&mut *bundle, LocalMediaBundle::from_stream(stream));
            if previous.stop_all() > 0 {
                warn!("Replaced a capture stream that was still live");
            }
        }

        for track in &tracks {
            if let Err(e) = transport.add_track(track).await {
                self.release().await;
                return Err(e);
            }
            info!("{} track {} added to peer connection", track.kind(), track.id());
        }

        Ok(())
    }

    /// Replace the video track with one from `device_id`
    ///
    /// The new track is acquired and placed on the video sender before the
    /// old one is stopped; on any failure the current camera keeps running.
    pub async fn switch_video(&self, device_id: &str, transport: &dyn PeerTransport) -> Result<()> {
        {
            let bundle = self.bundle.lock().await;
            if bundle.is_empty() {
                return Err(AppError::InvalidState("no local media to switch".to_string()));
            }
        }

        let stream = self.devices.get_user_media(&CaptureRequest::camera(device_id)).await?;
        let new_track = stream
            .video
            .clone()
            .ok_or_else(|| AppError::media(device_id, "no video track in capture"))?;

        let mut bundle = self.bundle.lock().await;
        if bundle.is_empty() {
            // Released while we were acquiring
            new_track.stop();
            return Err(AppError::InvalidState("session media released".to_string()));
        }

        match transport.replace_track(MediaKind::Video, &new_track).await {
            Ok(true) => {
                if let Some(old) = bundle.video.replace(new_track.clone()) {
                    old.stop();
                }
                info!("Switched camera to {}", device_id);
                Ok(())
            }
            Ok(false) => {
                new_track.stop();
                Err(AppError::NotFound("no video sender to replace".to_string()))
            }
            Err(e) => {
                new_track.stop();
                Err(e)
            }
        }
    }

    /// Stop and forget every local track; returns how many were live
    pub async fn release(&self) -> usize {
        let stopped = self.bundle.lock().await.stop_all();
        if stopped > 0 {
            debug!("Released {} local track(s)", stopped);
        }
        stopped
    }

    pub async fn audio_track(&self) -> Option<MediaTrack> {
        self.bundle.lock().await.audio.clone()
    }

    pub async fn video_track(&self) -> Option<MediaTrack> {
        self.bundle.lock().await.video.clone()
    }

    pub async fn bundle(&self) -> LocalMediaBundle {
        self.bundle.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConstraints;
    use crate::testing::{FakeDevices, FakeTransport};

    fn av_request() -> CaptureRequest {
        CaptureRequest {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }

    #[tokio::test]
    async fn test_acquire_attaches_tracks() {
        let devices = Arc::new(FakeDevices::new(&["cam0", "cam1"]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices.clone());

        manager.acquire(&av_request(), &transport).await.unwrap();

        let senders = transport.senders();
        assert_eq!(senders.len(), 2);
        let video = manager.video_track().await.unwrap();
        assert_eq!(video.device_id(), "cam0");
        assert!(senders.iter().any(|(kind, id)| *kind == MediaKind::Video && id == video.id()));
    }

    #[tokio::test]
    async fn test_acquire_failure_leaves_nothing() {
        let devices = Arc::new(FakeDevices::new(&[]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices);

        let err = manager.acquire(&av_request(), &transport).await.unwrap_err();
        assert!(matches!(err, AppError::MediaAcquisition { .. }));
        assert!(manager.bundle().await.is_empty());
        assert!(transport.senders().is_empty());
    }

    #[tokio::test]
    async fn test_switch_keeps_audio_and_replaces_video() {
        let devices = Arc::new(FakeDevices::new(&["cam0", "cam1"]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices);
        manager.acquire(&av_request(), &transport).await.unwrap();

        let audio = manager.audio_track().await.unwrap();
        let old_video = manager.video_track().await.unwrap();

        manager.switch_video("cam1", &transport).await.unwrap();

        let new_video = manager.video_track().await.unwrap();
        assert_eq!(new_video.device_id(), "cam1");
        assert!(!old_video.is_live());
        assert!(new_video.is_live());
        assert!(audio.is_live());
        assert_eq!(manager.audio_track().await.unwrap(), audio);
        assert_eq!(transport.sender_track(MediaKind::Video).as_deref(), Some(new_video.id()));
        assert_eq!(transport.sender_track(MediaKind::Audio).as_deref(), Some(audio.id()));
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_previous_camera() {
        let devices = Arc::new(FakeDevices::new(&["cam0"]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices);
        manager.acquire(&av_request(), &transport).await.unwrap();
        let old_video = manager.video_track().await.unwrap();

        let err = manager.switch_video("missing", &transport).await.unwrap_err();
        assert!(matches!(err, AppError::MediaAcquisition { .. }));
        assert!(old_video.is_live());
        assert_eq!(transport.sender_track(MediaKind::Video).as_deref(), Some(old_video.id()));
    }

    #[tokio::test]
    async fn test_switch_without_video_sender() {
        let devices = Arc::new(FakeDevices::new(&["cam0", "cam1"]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices.clone());
        manager
            .acquire(&CaptureRequest { audio: true, video: None }, &transport)
            .await
            .unwrap();

        let err = manager.switch_video("cam1", &transport).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(devices.acquired().iter().filter(|t| t.kind() == MediaKind::Video).all(|t| !t.is_live()));
    }

    #[tokio::test]
    async fn test_release_stops_everything_once() {
        let devices = Arc::new(FakeDevices::new(&["cam0"]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices.clone());
        manager.acquire(&av_request(), &transport).await.unwrap();

        assert_eq!(manager.release().await, 2);
        assert_eq!(manager.release().await, 0);
        assert!(devices.acquired().iter().all(|t| !t.is_live()));
    }

    #[tokio::test]
    async fn test_abandoned_acquire_stops_tracks() {
        let devices = Arc::new(FakeDevices::new(&["cam0"]));
        let transport = FakeTransport::new();
        let manager = MediaTrackManager::new(devices.clone());

        // Capture completes while the bundle is busy, then the caller gives up
        let held = manager.bundle.lock().await;
        let request = av_request();
        let mut acquire = tokio_test::task::spawn(manager.acquire(&request, &transport));
        assert!(acquire.poll().is_pending());
        assert_eq!(devices.acquired().len(), 2);
        drop(acquire);
        drop(held);

        assert!(devices.acquired().iter().all(|t| !t.is_live()));
        assert!(manager.bundle().await.is_empty());
        assert!(transport.senders().is_empty());
    }
}
