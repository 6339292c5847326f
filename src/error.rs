use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Media acquisition failed [{device}]: {reason}")]
    MediaAcquisition { device: String, reason: String },

    #[error("Signaling exchange failed: {0}")]
    Signaling(String),

    #[error("Timed out waiting for {stage} after {after_ms} ms")]
    Timeout { stage: &'static str, after_ms: u64 },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

impl AppError {
    /// Shorthand for a media acquisition failure
    pub fn media(device: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::MediaAcquisition {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from a `stop()` racing an in-flight operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled(_))
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
