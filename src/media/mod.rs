//! Local capture media
//!
//! ```text
//! MediaDevices (platform)  --get_user_media-->  CaptureStream
//!                                                    |
//!                                                    v
//!                           MediaTrackManager (owns LocalMediaBundle)
//!                                                    |
//!                                     add_track / replace_track
//!                                                    v
//!                                              PeerTransport
//! ```

pub mod device;
pub mod manager;
pub mod track;

pub use device::{CameraInfo, MediaDevices, SystemMediaDevices};
pub use manager::{LocalMediaBundle, MediaTrackManager};
pub use track::{CaptureRequest, CaptureStream, MediaKind, MediaTrack};
