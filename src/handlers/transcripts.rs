//! Transcript history and assistant query endpoints.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

/// Returned with HTTP 200 when the AI gateway cannot answer; the client
/// renders it like any other answer.
const ASSISTANT_UNAVAILABLE: &str =
    "Sorry, I couldn't process that question right now. Please try again.";

const ASSISTANT_SYSTEM_PROMPT: &str = "You are a meeting assistant. Answer the user's question \
     using only the meeting transcript provided as context. If the transcript does not contain \
     the answer, say so.";

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    /// Inclusive RFC 3339 lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive RFC 3339 upper bound.
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantQuery {
    pub room_id: String,
    pub query: String,
}

/// Transcript entries for a room across all its sessions, in chronological
/// order, optionally bounded by `since`/`until`. Unknown rooms yield an
/// empty list, not 404.
pub async fn room_transcripts(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<TranscriptQuery>,
) -> Result<HttpResponse, AppError> {
    let room_id = path.into_inner();
    let entries = state
        .store
        .entries_for_room(&room_id, query.since, query.until)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "roomId": room_id,
        "count": entries.len(),
        "entries": entries
    })))
}

/// One session with its full transcript.
pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let session = state
        .store
        .get_session(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", session_id)))?;
    let entries = state.store.entries_for_session(&session_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "session": session,
        "entries": entries
    })))
}

/// Ask the assistant a question about a room's recent conversation.
///
/// Context is capped at the most recent `limits.assistant_context_entries`
/// transcript entries; history in the store is never truncated, the cap is
/// applied per query. A gateway failure degrades to a fixed fallback answer
/// with HTTP 200.
pub async fn assistant_query(
    state: web::Data<AppState>,
    body: web::Json<AssistantQuery>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let limit = state.get_config().limits.assistant_context_entries;

    let entries = state
        .store
        .entries_for_room(&request.room_id, None, None)
        .await?;
    let skip = entries.len().saturating_sub(limit);
    let context = entries[skip..]
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let answer = match state
        .ai
        .answer_query(ASSISTANT_SYSTEM_PROMPT, &request.query, &context)
        .await
    {
        Ok(answer) => answer,
        Err(err) => {
            warn!(room = %request.room_id, error = %err, "Assistant query failed");
            ASSISTANT_UNAVAILABLE.to_string()
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "roomId": request.room_id,
        "query": request.query,
        "answer": answer,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
