//! Object service — typed mutations and reads over a board's replica.
//!
//! DESIGN
//! ======
//! The store accepts any well-formed record and never validates content, so
//! geometry normalization happens here, before anything is written. Every
//! local mutation returns the encoded delta produced by the store; the
//! dispatch layer relays that delta to peers so their replicas converge
//! without a full resend.

use std::collections::HashSet;

use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::model::BoardObject;
use crate::state::AppState;
use crate::store::StoreError;
use crate::view::ScopedView;

/// Smallest width/height written to the store. Degenerate geometry is
/// clamped rather than rejected.
pub const MIN_OBJECT_SIZE: f64 = 1.0;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("board not loaded: {0}")]
    BoardNotLoaded(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for ObjectError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BoardNotLoaded(_) => "E_BOARD_NOT_LOADED",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::BoardNotLoaded(_) => false,
            Self::Store(e) => e.retryable(),
        }
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Add an object to a board's replica. Returns the stored object and the
/// encoded delta for peer relay.
///
/// # Errors
///
/// Returns an error if the board is not loaded or the record fails to encode.
pub async fn add_object(
    state: &AppState,
    board_id: Uuid,
    object: BoardObject,
) -> Result<(BoardObject, Vec<u8>), ObjectError> {
    let object = normalize_geometry(object);

    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let update = board.store.add(&object)?;
    let changed: HashSet<String> = std::iter::once(object.id.clone()).collect();
    board.apply_changes(&changed);

    Ok((object, update))
}

/// Replace an object wholesale. Returns `None` when no object with the id
/// exists — the replica is left untouched and nothing is relayed.
///
/// # Errors
///
/// Returns an error if the board is not loaded or the record fails to encode.
pub async fn update_object(
    state: &AppState,
    board_id: Uuid,
    id: &str,
    replacement: BoardObject,
) -> Result<Option<(BoardObject, Vec<u8>)>, ObjectError> {
    let replacement = normalize_geometry(replacement);

    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let Some(update) = board.store.update(id, &replacement)? else {
        return Ok(None);
    };
    let changed: HashSet<String> = std::iter::once(id.to_string()).collect();
    board.apply_changes(&changed);

    Ok(Some((replacement, update)))
}

/// Merge a delta received from a peer replica into the board. Returns the
/// ids the merge actually touched; no-op redeliveries return an empty set.
///
/// # Errors
///
/// Returns an error if the board is not loaded or the delta is malformed.
pub async fn apply_remote_update(
    state: &AppState,
    board_id: Uuid,
    update: &[u8],
) -> Result<HashSet<String>, ObjectError> {
    let mut boards = state.boards.write().await;
    let board = boards
        .get_mut(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    let changed = board.store.apply_update(update)?;
    board.apply_changes(&changed);

    Ok(changed)
}

// =============================================================================
// READS
// =============================================================================

/// Fetch one object by id.
///
/// # Errors
///
/// Returns an error if the board is not loaded.
pub async fn get_object(
    state: &AppState,
    board_id: Uuid,
    id: &str,
) -> Result<Option<BoardObject>, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    Ok(board.store.get(id))
}

/// All objects in render-view order.
///
/// # Errors
///
/// Returns an error if the board is not loaded.
pub async fn list_objects(state: &AppState, board_id: Uuid) -> Result<Vec<BoardObject>, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    Ok(board.view.objects().to_vec())
}

/// Bounded read over the render view, with totals for pagination hints.
///
/// # Errors
///
/// Returns an error if the board is not loaded.
pub async fn scoped_read(
    state: &AppState,
    board_id: Uuid,
    limit: usize,
) -> Result<ScopedView, ObjectError> {
    let boards = state.boards.read().await;
    let board = boards
        .get(&board_id)
        .ok_or(ObjectError::BoardNotLoaded(board_id))?;

    Ok(board.view.scoped(limit))
}

// =============================================================================
// HELPERS
// =============================================================================

fn normalize_geometry(mut object: BoardObject) -> BoardObject {
    object.width = object.width.max(MIN_OBJECT_SIZE);
    object.height = object.height.max(MIN_OBJECT_SIZE);
    object
}

#[cfg(test)]
#[path = "object_test.rs"]
mod tests;
