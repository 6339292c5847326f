//! Offer/answer exchange with the signaling endpoint
//!
//! One request per session: `POST {base}/offer` with the complete offer
//! (candidates included) and the video transform label, answered with the
//! remote description.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::VideoTransform;
use crate::error::{AppError, Result};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Session description as exchanged with the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Body of `POST /offer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub video_transform: VideoTransform,
}

impl OfferRequest {
    pub fn new(offer: &SessionDescription, video_transform: VideoTransform) -> Self {
        Self {
            sdp: offer.sdp.clone(),
            sdp_type: SdpType::Offer,
            video_transform,
        }
    }
}

/// Remote signaling endpoint
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Send the offer and return the remote answer
    async fn exchange(&self, request: &OfferRequest) -> Result<SessionDescription>;
}

/// HTTP signaling client
pub struct HttpSignaling {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignaling {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn offer_url(&self) -> String {
        format!("{}/offer", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    async fn exchange(&self, request: &OfferRequest) -> Result<SessionDescription> {
        let url = self.offer_url();
        info!("Sending offer to {} ({} bytes)", url, request.sdp.len());

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Signaling(format!("Failed to reach {}: {}", url, e)))?
            .error_for_status()
            .map_err(|e| AppError::Signaling(format!("Request failed {}: {}", url, e)))?;

        let answer = response
            .json::<SessionDescription>()
            .await
            .map_err(|e| AppError::Signaling(format!("Invalid answer from {}: {}", url, e)))?;

        if answer.sdp_type != SdpType::Answer {
            return Err(AppError::Signaling(format!(
                "Expected an answer from {}, got {}",
                url, answer.sdp_type
            )));
        }

        debug!("Received answer ({} bytes)", answer.sdp.len());
        Ok(answer)
    }
}
