//! # Signaling Coordinator
//!
//! The WebSocket-driven state machine that admits peers, broadcasts
//! membership changes, and fans out room-scoped events. Each connection is
//! one actix actor; per-connection identity lives in the actor struct (an
//! explicit context, not closure captures).
//!
//! ## Connection state machine
//! `Connected` -> `Joined` -> `Closed`. There is no way back from Joined to
//! Connected: a peer that wants a different room reconnects. A repeated
//! join from the same peer overwrites its prior association in the registry
//! (last-write-wins).
//!
//! ## Delivery semantics
//! A broadcast snapshots the room's channels under the lock, then sends to
//! every recipient before the handler returns; delivery to an individual
//! peer is fire-and-forget with no acknowledgment or retry. Malformed
//! inbound messages are logged and dropped per-message; the connection
//! stays open.

use crate::rooms::{JoinOutcome, PeerChannel, PeerSummary, Registry};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages clients send over the signaling channel.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Enter a room, optionally announcing a negotiated SFU session and
    /// published tracks. A missing session id is accepted; negotiation is
    /// independent of membership.
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        tracks: Vec<String>,
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },

    #[serde(rename = "start-transcription", rename_all = "camelCase")]
    StartTranscription {
        #[serde(default)]
        room_id: Option<String>,
    },

    #[serde(rename = "stop-transcription", rename_all = "camelCase")]
    StopTranscription {
        #[serde(default)]
        room_id: Option<String>,
    },
}

/// Messages the server sends to clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// First event on every connection, carrying the assigned peer id.
    #[serde(rename = "welcome")]
    Welcome { id: String },

    /// Snapshot of current room members, sent to a joining peer. Skipped
    /// when the room was empty.
    #[serde(rename = "existing-peers")]
    ExistingPeers { peers: Vec<PeerSummary> },

    #[serde(rename = "peer-joined", rename_all = "camelCase")]
    PeerJoined {
        id: String,
        session_id: Option<String>,
        tracks: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    #[serde(rename = "peer-left")]
    PeerLeft { id: String },

    #[serde(rename = "transcription-started", rename_all = "camelCase")]
    TranscriptionStarted { meeting_id: String },

    #[serde(rename = "transcription-stopped", rename_all = "camelCase")]
    TranscriptionStopped {
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    /// Live caption pushed to a room as utterances are transcribed.
    #[serde(rename = "transcription")]
    Transcription { text: String, timestamp: String },
}

/// Serialize an event and send it to every current member of a room.
///
/// The channel snapshot is taken under the read lock and the lock released
/// before any send, so a slow recipient never blocks the registry.
pub fn broadcast_to_room(
    registry: &Arc<RwLock<Registry>>,
    room_id: &str,
    excluding: Option<&str>,
    event: &ServerEvent,
) {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "Failed to serialize server event");
            return;
        }
    };

    let recipients = registry
        .read()
        .unwrap()
        .channels_for_room(room_id, excluding);
    for (peer_id, channel) in recipients {
        debug!(room = room_id, peer = %peer_id, "Delivering event");
        channel.send(text.clone());
    }
}

/// Register a join, send the joiner its membership snapshot, and announce it
/// to the rest of the room. A rejoin that moves the peer to a different room
/// also announces `peer-left` to the vacated room; the returned outcome
/// carries that room so the caller can run its room-empty side effects.
/// Returns None when the peer id is unknown.
pub fn process_join(
    registry: &Arc<RwLock<Registry>>,
    peer_id: &str,
    room_id: &str,
    session_id: Option<String>,
    tracks: Vec<String>,
    name: Option<String>,
) -> Option<JoinOutcome> {
    let (outcome, existing, self_channel) = {
        let mut reg = registry.write().unwrap();
        let outcome = reg.join_room(
            peer_id,
            room_id,
            session_id.clone(),
            tracks.clone(),
            name.clone(),
        )?;
        (
            outcome,
            reg.list_room_peers(room_id, Some(peer_id)),
            reg.channel_for(peer_id),
        )
    };

    info!(peer = peer_id, room = room_id, "Peer joined room");

    if let Some((old_room, _)) = &outcome.vacated {
        info!(peer = peer_id, room = %old_room, "Peer moved out of room");
        broadcast_to_room(
            registry,
            old_room,
            None,
            &ServerEvent::PeerLeft {
                id: peer_id.to_string(),
            },
        );
    }

    if !existing.is_empty() {
        if let Some(channel) = self_channel {
            if let Ok(text) = serde_json::to_string(&ServerEvent::ExistingPeers { peers: existing })
            {
                channel.send(text);
            }
        }
    }

    broadcast_to_room(
        registry,
        room_id,
        Some(peer_id),
        &ServerEvent::PeerJoined {
            id: peer_id.to_string(),
            session_id,
            tracks,
            name,
        },
    );
    Some(outcome)
}

/// Remove a closed peer and announce its departure. Returns the vacated
/// room id and whether the room is now empty, when the peer had joined one.
pub fn process_close(registry: &Arc<RwLock<Registry>>, peer_id: &str) -> Option<(String, bool)> {
    let (room_id, now_empty) = registry.write().unwrap().leave_room(peer_id)?;
    info!(peer = peer_id, room = %room_id, empty = now_empty, "Peer left room");

    broadcast_to_room(
        registry,
        &room_id,
        None,
        &ServerEvent::PeerLeft {
            id: peer_id.to_string(),
        },
    );
    Some((room_id, now_empty))
}

/// Outbound text for a signaling connection.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendText(pub String);

/// Channel handle stored in the registry for a live connection. `do_send`
/// is fire-and-forget; a full mailbox drops the event, which matches the
/// no-retry delivery contract.
struct SocketChannel(Addr<SignalingSocket>);

impl PeerChannel for SocketChannel {
    fn send(&self, text: String) {
        self.0.do_send(SendText(text));
    }
}

/// One signaling connection.
pub struct SignalingSocket {
    state: web::Data<AppState>,
    /// Assigned at actor start; present for the rest of the connection.
    peer_id: Option<String>,
    /// Set on join; this peer's room for the connection lifetime.
    room_id: Option<String>,
    last_heartbeat: Instant,
}

impl SignalingSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        Self {
            state,
            peer_id: None,
            room_id: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_join(
        &mut self,
        session_id: Option<String>,
        tracks: Vec<String>,
        room_id: Option<String>,
        name: Option<String>,
    ) {
        let Some(peer_id) = self.peer_id.clone() else {
            warn!("Join before welcome completed, dropping");
            return;
        };
        let room_id = room_id.unwrap_or_else(|| "default".to_string());

        if let Some(outcome) = process_join(
            &self.state.registry,
            &peer_id,
            &room_id,
            session_id,
            tracks,
            name,
        ) {
            self.room_id = Some(room_id);

            // A move that emptied the old room must end its session, same as
            // the last member disconnecting.
            if let Some((old_room, true)) = outcome.vacated {
                let state = self.state.clone();
                actix::spawn(async move {
                    state.transcription.on_room_empty(&old_room).await;
                });
            }
        }
    }

    /// Resolve which room a transcription control message targets: the
    /// explicit room id if given, else the room this connection joined.
    fn resolve_room(&self, room_id: Option<String>) -> Option<String> {
        room_id.or_else(|| self.room_id.clone())
    }

    fn handle_start_transcription(&self, room_id: Option<String>) {
        let Some(room_id) = self.resolve_room(room_id) else {
            warn!("start-transcription without a room, dropping");
            return;
        };
        let state = self.state.clone();

        actix::spawn(async move {
            match state.transcription.start(&room_id).await {
                Some(session_id) => {
                    broadcast_to_room(
                        &state.registry,
                        &room_id,
                        None,
                        &ServerEvent::TranscriptionStarted {
                            meeting_id: session_id,
                        },
                    );
                }
                None => {
                    debug!(room = %room_id, "start-transcription was a no-op");
                }
            }
        });
    }

    fn handle_stop_transcription(&self, room_id: Option<String>) {
        let Some(room_id) = self.resolve_room(room_id) else {
            warn!("stop-transcription without a room, dropping");
            return;
        };
        let state = self.state.clone();

        actix::spawn(async move {
            let participants = state.registry.read().unwrap().member_count(&room_id) as u32;
            if let Some(outcome) = state.transcription.stop(&room_id, participants).await {
                broadcast_to_room(
                    &state.registry,
                    &room_id,
                    None,
                    &ServerEvent::TranscriptionStopped {
                        summary: outcome.summary,
                    },
                );
            } else {
                debug!(room = %room_id, "stop-transcription was a no-op");
            }
        });
    }
}

impl Actor for SignalingSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Channel open: assign an id, register the peer, send the welcome.
    fn started(&mut self, ctx: &mut Self::Context) {
        let channel = Arc::new(SocketChannel(ctx.address()));
        let peer_id = self.state.registry.write().unwrap().register_peer(channel);
        info!(peer = %peer_id, "Signaling connection opened");

        if let Ok(text) = serde_json::to_string(&ServerEvent::Welcome {
            id: peer_id.clone(),
        }) {
            ctx.text(text);
        }
        self.peer_id = Some(peer_id);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Signaling heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Channel close: deregister, announce the departure, and force-end any
    /// active session once the room empties. In-flight transcription calls
    /// for the room are not cancelled; they complete and persist normally.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let Some(peer_id) = self.peer_id.take() else {
            return;
        };
        info!(peer = %peer_id, "Signaling connection closed");

        if let Some((room_id, now_empty)) = process_close(&self.state.registry, &peer_id) {
            if now_empty {
                let state = self.state.clone();
                actix::spawn(async move {
                    state.transcription.on_room_empty(&room_id).await;
                });
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SignalingSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::Join {
                    session_id,
                    tracks,
                    room_id,
                    name,
                }) => self.handle_join(session_id, tracks, room_id, name),
                Ok(ClientEvent::StartTranscription { room_id }) => {
                    self.handle_start_transcription(room_id)
                }
                Ok(ClientEvent::StopTranscription { room_id }) => {
                    self.handle_stop_transcription(room_id)
                }
                Err(err) => {
                    // Protocol violation: drop the message, keep the
                    // connection.
                    warn!(error = %err, "Unparsable signaling message dropped");
                }
            },
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary frame on signaling channel dropped");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(?reason, "Signaling close frame");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(error = %err, "Signaling protocol error, closing");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendText> for SignalingSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// HTTP -> WebSocket upgrade for the signaling endpoint.
pub async fn signal_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        remote = ?req.connection_info().peer_addr(),
        "New signaling connection request"
    );
    ws::start(SignalingSocket::new(state), &req, stream)
}
