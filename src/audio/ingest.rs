//! # Audio Ingestion Endpoint
//!
//! Binary WebSocket channel carrying raw PCM from one peer's capture into
//! the room's transcription pipeline. Frames are fed to the segmenter
//! synchronously in the actor handler, which is what keeps chunk order per
//! connection; only the gateway round-trip for a finalized utterance runs
//! on a spawned task.
//!
//! Chunks arriving while the room has no active session are dropped
//! silently, so a client can stream continuously across start/stop cycles.

use crate::signaling::{broadcast_to_room, ServerEvent};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use chrono::Utc;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Identifies whose audio this connection carries. Both parameters are
/// required; the upgrade is refused with 400 when either is missing.
#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    pub room: String,
    pub peer: String,
}

/// One audio capture connection.
pub struct AudioIngestSocket {
    state: web::Data<AppState>,
    room_id: String,
    peer_id: String,
    last_heartbeat: Instant,
    chunks_received: u64,
}

impl AudioIngestSocket {
    pub fn new(state: web::Data<AppState>, room_id: String, peer_id: String) -> Self {
        Self {
            state,
            room_id,
            peer_id,
            last_heartbeat: Instant::now(),
            chunks_received: 0,
        }
    }

    fn handle_chunk(&mut self, data: &[u8]) {
        self.chunks_received += 1;

        // Segmenter mutation happens here, before any suspension point.
        let Some(utterance) = self
            .state
            .transcription
            .feed_chunk(&self.room_id, data, Instant::now())
        else {
            return;
        };

        debug!(
            room = %self.room_id,
            bytes = utterance.len(),
            "Utterance finalized, dispatching for transcription"
        );

        let state = self.state.clone();
        let room_id = self.room_id.clone();
        actix::spawn(async move {
            if let Some(text) = state
                .transcription
                .on_utterance_finalized(&room_id, utterance)
                .await
            {
                broadcast_to_room(
                    &state.registry,
                    &room_id,
                    None,
                    &ServerEvent::Transcription {
                        text,
                        timestamp: Utc::now().to_rfc3339(),
                    },
                );
            }
        });
    }
}

impl Actor for AudioIngestSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(room = %self.room_id, peer = %self.peer_id, "Audio ingestion connection opened");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(room = %act.room_id, "Audio heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            room = %self.room_id,
            peer = %self.peer_id,
            chunks = self.chunks_received,
            "Audio ingestion connection closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AudioIngestSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => self.handle_chunk(&data),
            Ok(ws::Message::Text(_)) => {
                warn!(room = %self.room_id, "Text frame on audio channel dropped");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(room = %self.room_id, ?reason, "Audio close frame");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(room = %self.room_id, error = %err, "Audio protocol error, closing");
                ctx.stop();
            }
        }
    }
}

/// HTTP -> WebSocket upgrade for audio ingestion. Missing `room`/`peer`
/// query parameters fail extraction and never reach this handler.
pub async fn audio_ws(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<AudioQuery>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let query = query.into_inner();
    ws::start(
        AudioIngestSocket::new(state, query.room, query.peer),
        &req,
        stream,
    )
}
