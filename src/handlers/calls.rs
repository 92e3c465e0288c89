//! SFU negotiation proxy.
//!
//! Browsers never talk to the SFU directly; these handlers forward
//! negotiation calls with the app credentials attached server-side.
//! Upstream failures surface as 502 with the upstream status in the body.

use crate::sfu::{SessionDescription, TrackRequest};
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTracksRequest {
    pub session_description: SessionDescription,
    pub tracks: Vec<TrackRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PullTracksRequest {
    pub tracks: Vec<TrackRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenegotiateRequest {
    pub session_description: SessionDescription,
}

pub async fn new_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let session_id = state.sfu.create_session().await?;
    info!(session = %session_id, "SFU session created");
    Ok(HttpResponse::Ok().json(json!({ "sessionId": session_id })))
}

pub async fn push_tracks(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PushTracksRequest>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let request = body.into_inner();
    let response = state
        .sfu
        .push_tracks(&session_id, request.session_description, request.tracks)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn pull_tracks(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PullTracksRequest>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let response = state
        .sfu
        .pull_tracks(&session_id, body.into_inner().tracks)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn renegotiate(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RenegotiateRequest>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let response = state
        .sfu
        .renegotiate(&session_id, body.into_inner().session_description)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_request_parses_browser_payload() {
        let body = r#"{
            "sessionDescription": {"type": "offer", "sdp": "v=0"},
            "tracks": [{"location": "local", "mid": "0", "trackName": "mic"}]
        }"#;
        let parsed: PushTracksRequest = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.session_description.kind, "offer");
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_pull_request_requires_tracks() {
        assert!(serde_json::from_str::<PullTracksRequest>("{}").is_err());
        let parsed: PullTracksRequest = serde_json::from_str(
            r#"{"tracks":[{"location":"remote","sessionId":"s1","trackName":"mic"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.tracks[0].session_id.as_deref(), Some("s1"));
    }
}
