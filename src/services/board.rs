//! Board service — join/part lifecycle, replica hydration, and broadcast.
//!
//! DESIGN
//! ======
//! A board replica is hydrated from its persisted snapshot on first join and
//! kept in memory while any client is connected. The snapshot row is the only
//! durable form; object rows never exist individually.
//!
//! ERROR HANDLING
//! ==============
//! On last-client part, the replica is flushed as a final snapshot before
//! eviction. If that flush fails the board is intentionally kept in memory
//! with its dirty ids intact so the persistence worker can retry instead of
//! losing edits.

use std::collections::hash_map::Entry;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame};
use crate::model::BoardObject;
use crate::services::persistence;
use crate::state::{AppState, BoardState, ConnectedClient};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// Connected user as exposed in join replies and part notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardUser {
    pub client_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a board. Hydrates the replica from its persisted snapshot if this is
/// the first live client. Returns the board's objects in render-view order.
///
/// # Errors
///
/// Returns a database error if the snapshot row cannot be read.
pub async fn join_board(
    state: &AppState,
    board_id: Uuid,
    identity: ConnectedClient,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<Vec<BoardObject>, BoardError> {
    // Fetch the snapshot row outside the lock; it is only used on a cold join.
    let snapshot = persistence::load_snapshot(&state.pool, board_id).await?;

    let mut boards = state.boards.write().await;
    let board = match boards.entry(board_id) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let replica = match snapshot.as_deref() {
                Some(bytes) => BoardState::from_snapshot(bytes),
                None => BoardState::new(),
            };
            info!(%board_id, objects = replica.store.len(), "hydrated board replica");
            entry.insert(replica)
        }
    };

    board.clients.insert(client_id, tx);
    board.users.insert(client_id, identity);

    info!(%board_id, %client_id, clients = board.clients.len(), "client joined board");
    Ok(board.view.objects().to_vec())
}

/// Leave a board. Removes the client sender. If last client, flushes a final
/// snapshot and evicts the replica from memory.
pub async fn part_board(state: &AppState, board_id: Uuid, client_id: Uuid) {
    let mut boards = state.boards.write().await;
    let Some(board) = boards.get_mut(&board_id) else {
        return;
    };

    board.clients.remove(&client_id);
    board.users.remove(&client_id);
    info!(%board_id, %client_id, remaining = board.clients.len(), "client left board");

    if !board.clients.is_empty() {
        return;
    }

    // PHASE: HANDLE CLEAN EVICTION FAST PATH
    // WHY: avoid snapshot I/O when nothing changed since the last flush.
    if !board.has_dirty() {
        boards.remove(&board_id);
        info!(%board_id, "evicted board from memory");
        return;
    }

    // PHASE: ENCODE FINAL SNAPSHOT
    // WHY: encode under the lock, write outside it; drained ids are restored
    // if the write fails so the background flush can retry.
    let drained = board.take_dirty();
    let snapshot = board.store.encode_snapshot();
    drop(boards);

    match persistence::save_snapshot(&state.pool, board_id, &snapshot).await {
        Ok(()) => {
            let mut boards = state.boards.write().await;
            let Some(board) = boards.get_mut(&board_id) else {
                return;
            };
            // EDGE: a client may have rejoined while the flush was in flight.
            if !board.clients.is_empty() {
                return;
            }
            if board.has_dirty() {
                warn!(%board_id, "retaining board after final flush because newer edits exist");
            } else {
                boards.remove(&board_id);
                info!(%board_id, "evicted board from memory");
            }
        }
        Err(e) => {
            error!(error = %e, %board_id, "final flush failed; board retained for retry");
            let mut boards = state.boards.write().await;
            if let Some(board) = boards.get_mut(&board_id) {
                board.restore_dirty(drained);
            }
        }
    }
}

/// Currently connected users for a board, keyed by connection.
pub async fn board_users(state: &AppState, board_id: Uuid) -> Vec<BoardUser> {
    let boards = state.boards.read().await;
    let Some(board) = boards.get(&board_id) else {
        return Vec::new();
    };
    board
        .users
        .iter()
        .map(|(client_id, user)| BoardUser {
            client_id: *client_id,
            user_id: user.user_id.clone(),
            user_name: user.user_name.clone(),
            user_color: user.user_color.clone(),
        })
        .collect()
}

/// Encode the board's current replica state as a full snapshot.
pub async fn encode_board_snapshot(state: &AppState, board_id: Uuid) -> Option<Vec<u8>> {
    let boards = state.boards.read().await;
    boards.get(&board_id).map(|board| board.store.encode_snapshot())
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to all clients in a board, optionally excluding one.
pub async fn broadcast(state: &AppState, board_id: Uuid, frame: &Frame, exclude: Option<Uuid>) {
    let boards = state.boards.read().await;
    let Some(board) = boards.get(&board_id) else {
        return;
    };

    for (client_id, tx) in &board.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(frame.clone());
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
