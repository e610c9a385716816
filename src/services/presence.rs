//! Presence service — cursor intake feeding the queue + throttle pipeline.
//!
//! DESIGN
//! ======
//! Every cursor event is recorded in the board's presence queue (latest wins
//! per user), then the throttle decides whether the accumulated queue is
//! flushed outward. Events arriving inside the cooldown are absorbed into the
//! queue and simply carried by the next flush; nothing is buffered per event.

use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::presence::PresenceEvent;
use crate::state::{AppState, BoardState};

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("board not loaded: {0}")]
    BoardNotLoaded(Uuid),
}

impl ErrorCode for PresenceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BoardNotLoaded(_) => "E_BOARD_NOT_LOADED",
        }
    }
}

/// Record one cursor event. Returns the queue snapshot to broadcast when the
/// throttle fires, or `None` when the event was absorbed into the queue.
///
/// # Errors
///
/// Returns an error if the board is not loaded.
pub async fn record_cursor(
    state: &AppState,
    board_id: Uuid,
    event: PresenceEvent,
) -> Result<Option<Vec<PresenceEvent>>, PresenceError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(PresenceError::BoardNotLoaded(board_id))?;

    let capacity = board.presence_capacity;
    let BoardState { presence, throttle, .. } = board;
    presence.enqueue(event, capacity);

    let mut flushed = None;
    throttle.fire(|| flushed = Some(presence.snapshot()));
    Ok(flushed)
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
