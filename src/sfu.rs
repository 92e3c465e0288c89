//! # SFU Session Negotiation Gateway
//!
//! HTTP client for the external SFU's session/track/renegotiation API.
//! Codec negotiation, ICE and media routing all live upstream; this module
//! only shuttles SDP blobs and track descriptors back and forth with the
//! app's bearer token attached. Non-2xx responses are hard failures carrying
//! the upstream status.
//!
//! Track-state payloads are passed through as raw JSON: the browser consumes
//! them verbatim, so re-modelling every field here would only add a place
//! for drift.

use crate::error::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// An SDP offer or answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// One track to push or pull in a negotiation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    /// "local" for tracks the caller publishes, "remote" to subscribe to
    /// another session's track.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    /// Owning SFU session for remote tracks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

pub struct SfuClient {
    client: Client,
    base_url: String,
    app_id: String,
    app_token: String,
}

impl SfuClient {
    pub fn new(base_url: &str, app_id: &str, app_token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            app_token: app_token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/apps/{}{}", self.base_url, self.app_id, path)
    }

    async fn check(response: reqwest::Response) -> AppResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response.json().await?)
    }

    /// Create a new SFU session and return its id.
    pub async fn create_session(&self) -> AppResult<String> {
        let response = self
            .client
            .post(self.url("/sessions/new"))
            .bearer_auth(&self.app_token)
            .send()
            .await?;
        let value = Self::check(response).await?;
        value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Gateway {
                status: 502,
                message: "SFU response missing sessionId".to_string(),
            })
    }

    /// Publish local tracks with an SDP offer; the SFU answers.
    pub async fn push_tracks(
        &self,
        session_id: &str,
        offer: SessionDescription,
        tracks: Vec<TrackRequest>,
    ) -> AppResult<Value> {
        debug!(session = session_id, tracks = tracks.len(), "Pushing tracks to SFU");
        let body = json!({
            "sessionDescription": offer,
            "tracks": tracks,
        });
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/tracks/new", session_id)))
            .bearer_auth(&self.app_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Subscribe to remote tracks. The response indicates whether a
    /// renegotiation round-trip is required (`requiresImmediateRenegotiation`
    /// upstream) and carries the offer for it.
    pub async fn pull_tracks(
        &self,
        session_id: &str,
        tracks: Vec<TrackRequest>,
    ) -> AppResult<Value> {
        debug!(session = session_id, tracks = tracks.len(), "Pulling tracks from SFU");
        let body = json!({ "tracks": tracks });
        let response = self
            .client
            .post(self.url(&format!("/sessions/{}/tracks/new", session_id)))
            .bearer_auth(&self.app_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Complete a renegotiation by submitting the client's SDP answer.
    pub async fn renegotiate(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> AppResult<Value> {
        let body = json!({ "sessionDescription": answer });
        let response = self
            .client
            .put(self.url(&format!("/sessions/{}/renegotiate", session_id)))
            .bearer_auth(&self.app_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }
}
