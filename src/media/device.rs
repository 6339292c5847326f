//! Capture device access
//!
//! `MediaDevices` is the seam between the session and the host platform.
//! `SystemMediaDevices` discovers V4L2 cameras under `/dev` and hands out
//! local tracks bound to them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::track::{CaptureRequest, CaptureStream, MediaKind, MediaTrack};
use crate::error::{AppError, Result};

/// Stream id shared by tracks handed to the peer connection
pub const LOCAL_STREAM_ID: &str = "rtc-session-stream";

/// Default audio input name
pub const DEFAULT_MICROPHONE: &str = "default";

/// Camera listed for user selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Device id (device node path)
    pub device_id: String,
    /// Human readable name
    pub label: String,
}

impl CameraInfo {
    /// Label for display, falling back to a shortened id like the browser does
    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            let short: String = self.device_id.chars().take(6).collect();
            format!("Camera {}", short)
        } else {
            self.label.clone()
        }
    }
}

/// Host platform capture capability
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List cameras available for selection
    async fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>>;

    /// Acquire tracks for a capture request
    async fn get_user_media(&self, request: &CaptureRequest) -> Result<CaptureStream>;
}

/// Linux implementation backed by `/dev/video*` and `/dev/snd`
pub struct SystemMediaDevices {
    dev_dir: PathBuf,
    sysfs_dir: PathBuf,
}

impl SystemMediaDevices {
    pub fn new() -> Self {
        Self::with_roots("/dev", "/sys/class/video4linux")
    }

    /// Use alternative roots (containers, tests)
    pub fn with_roots(dev_dir: impl Into<PathBuf>, sysfs_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
            sysfs_dir: sysfs_dir.into(),
        }
    }

    async fn camera_label(&self, node: &str) -> String {
        let name_path = self.sysfs_dir.join(node).join("name");
        match tokio::fs::read_to_string(&name_path).await {
            Ok(name) => name.trim().to_string(),
            Err(_) => String::new(),
        }
    }

    async fn resolve_camera(&self, device_id: Option<&str>) -> Result<String> {
        match device_id {
            Some(id) => {
                let path = Path::new(id);
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.dev_dir.join(id)
                };
                if tokio::fs::metadata(&path).await.is_err() {
                    return Err(AppError::media(id, "device not found"));
                }
                Ok(path.to_string_lossy().to_string())
            }
            None => {
                let cameras = self.enumerate_cameras().await?;
                cameras
                    .into_iter()
                    .next()
                    .map(|c| c.device_id)
                    .ok_or_else(|| AppError::media("camera", "no camera available"))
            }
        }
    }

    async fn check_microphone(&self) -> Result<()> {
        let snd = self.dev_dir.join("snd");
        if tokio::fs::metadata(&snd).await.is_err() {
            return Err(AppError::media(
                DEFAULT_MICROPHONE,
                format!("no sound devices under {}", snd.display()),
            ));
        }
        Ok(())
    }
}

impl Default for SystemMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SystemMediaDevices {
    async fn enumerate_cameras(&self) -> Result<Vec<CameraInfo>> {
        let mut entries = tokio::fs::read_dir(&self.dev_dir).await.map_err(|e| {
            AppError::media(
                self.dev_dir.display().to_string(),
                format!("Failed to read device directory: {}", e),
            )
        })?;

        let mut cameras = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("video") {
                continue;
            }

            debug!("Found video device: {:?}", entry.path());
            let label = self.camera_label(&name).await;
            cameras.push(CameraInfo {
                device_id: entry.path().to_string_lossy().to_string(),
                label,
            });
        }

        // videoN ordering, numeric rather than lexical
        cameras.sort_by_key(|c| video_index(&c.device_id));
        Ok(cameras)
    }

    async fn get_user_media(&self, request: &CaptureRequest) -> Result<CaptureStream> {
        if request.is_empty() {
            return Err(AppError::media("none", "nothing requested"));
        }

        let audio = if request.audio {
            self.check_microphone().await?;
            Some(MediaTrack::new(MediaKind::Audio, DEFAULT_MICROPHONE, LOCAL_STREAM_ID))
        } else {
            None
        };

        let video = match &request.video {
            Some(constraints) => {
                let device = self.resolve_camera(constraints.device_id.as_deref()).await?;
                info!(
                    "Opening camera {} ({}x{})",
                    device,
                    constraints.width.map(|w| w.to_string()).unwrap_or_else(|| "auto".into()),
                    constraints.height.map(|h| h.to_string()).unwrap_or_else(|| "auto".into())
                );
                Some(MediaTrack::new(MediaKind::Video, device, LOCAL_STREAM_ID))
            }
            None => None,
        };

        Ok(CaptureStream::new(audio, video))
    }
}

fn video_index(device_id: &str) -> u32 {
    device_id
        .rsplit("video")
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}
