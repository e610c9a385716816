//! WebSocket endpoint — one socket per client, frames dispatched by prefix.
//!
//! DESIGN
//! ======
//! Each connection gets a client id, an outbound mpsc channel registered with
//! the joined board, and a select loop relaying inbound frames to handlers
//! and outbound frames to the socket. Handlers return an `Outcome`; the
//! dispatch layer owns every reply/broadcast decision so handlers never touch
//! sockets. Presence frames are the one high-frequency path and skip logging.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::model::BoardObject;
use crate::presence::PresenceEvent;
use crate::services;
use crate::state::{AppState, ConnectedClient};
use crate::view::SCOPED_READ_LIMIT;

const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Cursor colors assigned to clients that connect without one.
const CURSOR_COLORS: &[&str] =
    &["#ef4444", "#f59e0b", "#22c55e", "#06b6d4", "#3b82f6", "#8b5cf6", "#ec4899"];

fn pick_color() -> String {
    CURSOR_COLORS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("#3b82f6")
        .to_string()
}

// =============================================================================
// UPGRADE
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WsParams {
    user: Option<String>,
    name: Option<String>,
    color: Option<String>,
}

/// Upgrade handler. Identity comes from query params; sessions and auth are
/// external to this layer.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let identity = ConnectedClient {
        user_id: params.user.unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_name: params.name.unwrap_or_else(|| "anonymous".to_string()),
        user_color: params.color.unwrap_or_else(pick_color),
    };
    ws.on_upgrade(move |socket| client_session(state, socket, identity))
}

// =============================================================================
// SESSION LOOP
// =============================================================================

async fn client_session(state: AppState, mut socket: WebSocket, identity: ConnectedClient) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);
    let mut current_board: Option<Uuid> = None;

    info!(%client_id, user = %identity.user_id, "ws: client connected");

    // Welcome frame so the client learns its connection identity.
    let mut welcome = Data::new();
    welcome.insert("clientId".into(), serde_json::json!(client_id));
    welcome.insert("userId".into(), serde_json::json!(identity.user_id));
    welcome.insert("userName".into(), serde_json::json!(identity.user_name));
    welcome.insert("userColor".into(), serde_json::json!(identity.user_color));
    let hello = Frame::request("session:connected", welcome);
    if send_frame(&mut socket, &hello).await.is_err() {
        return;
    }

    'session: loop {
        tokio::select! {
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break 'session;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = process_inbound_text(
                            &state,
                            &mut current_board,
                            client_id,
                            &identity,
                            &client_tx,
                            text.as_str(),
                        )
                        .await;
                        for frame in replies {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break 'session;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break 'session,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%client_id, error = %e, "ws: socket error");
                        break 'session;
                    }
                }
            }
        }
    }

    // Broadcast board:part to peers BEFORE cleanup (part_board may evict state).
    if let Some(board_id) = current_board {
        let mut part_data = Data::new();
        part_data.insert("clientId".into(), serde_json::json!(client_id));
        part_data.insert("userId".into(), serde_json::json!(identity.user_id));
        let part_frame = Frame::request("board:part", part_data).with_board_id(board_id);
        services::board::broadcast(&state, board_id, &part_frame, Some(client_id)).await;

        services::board::part_board(&state, board_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(id = %frame.id, error = %e, "ws: frame serialization failed");
            Ok(())
        }
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// What a handler wants done with its result. The dispatch layer turns this
/// into sender replies and peer broadcasts.
enum Outcome {
    /// Terminal reply to the sender with a payload.
    Reply(Data),
    /// Terminal reply to the sender without a payload.
    Done,
    /// No frames at all. Dropped presence flushes end up here.
    Silent,
    /// Reply to the sender and relay a copy to peers.
    Broadcast(Data),
    /// Relay to peers only; the sender gets nothing.
    BroadcastExcludeSender(Data),
    /// Reply to the sender with one payload, notify peers with another.
    ReplyAndBroadcast { reply: Data, broadcast: Data },
    /// Server-initiated notification to every client, sender included.
    Notify { syscall: &'static str, data: Data },
}

/// Parse and process one inbound text frame and return frames for the sender.
///
/// This keeps the websocket transport concerns separate from frame handling,
/// so tests can exercise dispatch and broadcast behavior end-to-end.
async fn process_inbound_text(
    state: &AppState,
    current_board: &mut Option<Uuid>,
    client_id: Uuid,
    identity: &ConnectedClient,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection identity as `from`.
    req.from = Some(identity.user_id.clone());

    let prefix = req.prefix();
    if prefix != "presence" {
        info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    // Dispatch to handler — returns Outcome or error Frame.
    let result = match prefix {
        "board" => handle_board(state, current_board, client_id, identity, client_tx, &req).await,
        "object" => handle_object(state, *current_board, identity, &req).await,
        "sync" => handle_sync(state, *current_board, &req).await,
        "presence" => handle_presence(state, *current_board, identity, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome — the dispatch layer owns all outbound logic.
    let board_id = *current_board;
    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Silent) => vec![],
        Ok(Outcome::Broadcast(data)) => {
            let sender_frame = req.done_with(data);
            // Peers get a copy without parent_id (they didn't originate the request).
            let mut peer_frame = sender_frame.clone();
            peer_frame.id = Uuid::new_v4();
            peer_frame.parent_id = None;
            if let Some(bid) = board_id {
                services::board::broadcast(state, bid, &peer_frame, Some(client_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::BroadcastExcludeSender(data)) => {
            if let Some(bid) = board_id {
                let frame = Frame::request(&req.syscall, data).with_board_id(bid);
                services::board::broadcast(state, bid, &frame, Some(client_id)).await;
            }
            vec![]
        }
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            let sender_frame = req.done_with(reply);
            if let Some(bid) = board_id {
                let notif = Frame::request(&req.syscall, broadcast).with_board_id(bid);
                services::board::broadcast(state, bid, &notif, Some(client_id)).await;
            }
            vec![sender_frame]
        }
        Ok(Outcome::Notify { syscall, data }) => {
            if let Some(bid) = board_id {
                let frame = Frame::request(syscall, data).with_board_id(bid);
                services::board::broadcast(state, bid, &frame, None).await;
            }
            vec![]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// BOARD HANDLERS
// =============================================================================

async fn handle_board(
    state: &AppState,
    current_board: &mut Option<Uuid>,
    client_id: Uuid,
    identity: &ConnectedClient,
    client_tx: &mpsc::Sender<Frame>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "join" => {
            let Some(board_id) = req.board_id.or_else(|| {
                req.data
                    .get("boardId")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            }) else {
                return Err(req.error("boardId required"));
            };

            // Part current board if already joined.
            if let Some(old_board) = current_board.take() {
                services::board::part_board(state, old_board, client_id).await;
            }

            match services::board::join_board(state, board_id, identity.clone(), client_id, client_tx.clone())
                .await
            {
                Ok(objects) => {
                    *current_board = Some(board_id);
                    let users = services::board::board_users(state, board_id).await;

                    let mut reply = Data::new();
                    reply.insert("objects".into(), serde_json::to_value(&objects).unwrap_or_default());
                    reply.insert("users".into(), serde_json::to_value(&users).unwrap_or_default());
                    // Full snapshot so a cold client can seed its own replica.
                    if let Some(snapshot) = services::board::encode_board_snapshot(state, board_id).await {
                        reply.insert("snapshot".into(), serde_json::json!(BASE64.encode(&snapshot)));
                    }

                    let mut broadcast = Data::new();
                    broadcast.insert("clientId".into(), serde_json::json!(client_id));
                    broadcast.insert("userId".into(), serde_json::json!(identity.user_id));
                    broadcast.insert("userName".into(), serde_json::json!(identity.user_name));
                    broadcast.insert("userColor".into(), serde_json::json!(identity.user_color));

                    Ok(Outcome::ReplyAndBroadcast { reply, broadcast })
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "part" => {
            let Some(board_id) = current_board.take() else {
                return Err(req.error("not joined to a board"));
            };
            // Notify peers before cleanup; part_board may evict the replica,
            // and the outcome is applied after current_board is cleared.
            let mut data = Data::new();
            data.insert("clientId".into(), serde_json::json!(client_id));
            data.insert("userId".into(), serde_json::json!(identity.user_id));
            let notif = Frame::request("board:part", data).with_board_id(board_id);
            services::board::broadcast(state, board_id, &notif, Some(client_id)).await;

            services::board::part_board(state, board_id, client_id).await;
            Ok(Outcome::Done)
        }
        "read" => {
            let Some(board_id) = *current_board else {
                return Err(req.error("must join a board first"));
            };
            let limit = req
                .data
                .get("limit")
                .and_then(serde_json::Value::as_u64)
                .map_or(SCOPED_READ_LIMIT, |v| usize::try_from(v).unwrap_or(SCOPED_READ_LIMIT));

            match services::object::scoped_read(state, board_id, limit).await {
                Ok(scoped) => {
                    let mut data = Data::new();
                    data.insert("objects".into(), serde_json::to_value(&scoped.objects).unwrap_or_default());
                    data.insert("totalObjects".into(), serde_json::json!(scoped.total_objects));
                    data.insert("returnedCount".into(), serde_json::json!(scoped.returned_count));
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        _ => Err(req.error(format!("unknown board op: {op}"))),
    }
}

// =============================================================================
// OBJECT HANDLERS
// =============================================================================

async fn handle_object(
    state: &AppState,
    current_board: Option<Uuid>,
    identity: &ConnectedClient,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let Some(board_id) = current_board else {
        return Err(req.error("must join a board first"));
    };

    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "add" => {
            let mut object = parse_object(req)?;
            if object.id.is_empty() {
                object.id = Uuid::new_v4().to_string();
            }
            if object.created_by.is_empty() {
                object.created_by = identity.user_id.clone();
            }

            match services::object::add_object(state, board_id, object).await {
                Ok((stored, update)) => Ok(Outcome::Broadcast(object_data(&stored, &update))),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "update" => {
            let replacement = parse_object(req)?;
            let id = match req.data.get("id").and_then(|v| v.as_str()) {
                Some(id) => id.to_string(),
                None if !replacement.id.is_empty() => replacement.id.clone(),
                None => return Err(req.error("id required")),
            };

            match services::object::update_object(state, board_id, &id, replacement).await {
                Ok(Some((stored, update))) => {
                    let mut data = object_data(&stored, &update);
                    data.insert("applied".into(), serde_json::json!(true));
                    Ok(Outcome::Broadcast(data))
                }
                Ok(None) => {
                    // Absent id is a visible no-op, not an error.
                    let mut data = Data::new();
                    data.insert("applied".into(), serde_json::json!(false));
                    data.insert("id".into(), serde_json::json!(id));
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "get" => {
            let Some(id) = req.data.get("id").and_then(|v| v.as_str()) else {
                return Err(req.error("id required"));
            };
            match services::object::get_object(state, board_id, id).await {
                Ok(Some(object)) => {
                    let mut data = Data::new();
                    data.insert("object".into(), serde_json::to_value(&object).unwrap_or_default());
                    Ok(Outcome::Reply(data))
                }
                Ok(None) => Err(req.error(format!("object not found: {id}"))),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "list" => match services::object::list_objects(state, board_id).await {
            Ok(objects) => {
                let mut data = Data::new();
                data.insert("count".into(), serde_json::json!(objects.len()));
                data.insert("objects".into(), serde_json::to_value(&objects).unwrap_or_default());
                Ok(Outcome::Reply(data))
            }
            Err(e) => Err(req.error_from(&e)),
        },
        _ => Err(req.error(format!("unknown object op: {op}"))),
    }
}

fn parse_object(req: &Frame) -> Result<BoardObject, Frame> {
    let Some(raw) = req.data.get("object") else {
        return Err(req.error("object required"));
    };
    serde_json::from_value(raw.clone()).map_err(|e| req.error(format!("invalid object: {e}")))
}

fn object_data(object: &BoardObject, update: &[u8]) -> Data {
    let mut data = Data::new();
    data.insert("object".into(), serde_json::to_value(object).unwrap_or_default());
    data.insert("update".into(), serde_json::json!(BASE64.encode(update)));
    data
}

// =============================================================================
// SYNC HANDLERS
// =============================================================================

async fn handle_sync(state: &AppState, current_board: Option<Uuid>, req: &Frame) -> Result<Outcome, Frame> {
    let Some(board_id) = current_board else {
        return Err(req.error("must join a board first"));
    };

    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "update" => {
            let Some(encoded) = req.data.get("update").and_then(|v| v.as_str()) else {
                return Err(req.error("update required"));
            };
            let update = BASE64
                .decode(encoded)
                .map_err(|e| req.error(format!("invalid base64: {e}")))?;

            match services::object::apply_remote_update(state, board_id, &update).await {
                Ok(changed) => {
                    let mut ids: Vec<String> = changed.into_iter().collect();
                    ids.sort();

                    let mut reply = Data::new();
                    reply.insert("changed".into(), serde_json::json!(ids));

                    let mut broadcast = Data::new();
                    broadcast.insert("update".into(), serde_json::json!(encoded));

                    Ok(Outcome::ReplyAndBroadcast { reply, broadcast })
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "snapshot" => match services::board::encode_board_snapshot(state, board_id).await {
            Some(snapshot) => {
                let mut data = Data::new();
                data.insert("snapshot".into(), serde_json::json!(BASE64.encode(&snapshot)));
                Ok(Outcome::Reply(data))
            }
            None => Err(req.error("board not loaded")),
        },
        _ => Err(req.error(format!("unknown sync op: {op}"))),
    }
}

// =============================================================================
// PRESENCE HANDLER
// =============================================================================

async fn handle_presence(
    state: &AppState,
    current_board: Option<Uuid>,
    identity: &ConnectedClient,
    req: &Frame,
) -> Result<Outcome, Frame> {
    // Presence before joining is silently ignored.
    let Some(board_id) = current_board else {
        return Ok(Outcome::Silent);
    };

    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "move" => {
            let x = req.data.get("x").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let y = req.data.get("y").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            let sent_at = req.data.get("sentAt").and_then(serde_json::Value::as_i64);

            let event = PresenceEvent {
                user_id: identity.user_id.clone(),
                user_name: identity.user_name.clone(),
                x,
                y,
                color: identity.user_color.clone(),
                sent_at,
            };

            match services::presence::record_cursor(state, board_id, event).await {
                Ok(Some(events)) => {
                    let mut data = Data::new();
                    data.insert("count".into(), serde_json::json!(events.len()));
                    data.insert("events".into(), serde_json::to_value(&events).unwrap_or_default());
                    Ok(Outcome::Notify { syscall: "presence:update", data })
                }
                Ok(None) => Ok(Outcome::Silent),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        _ => Err(req.error(format!("unknown presence op: {op}"))),
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
