//! Persistence service — background snapshot flush for dirty boards.
//!
//! DESIGN
//! ======
//! A background task encodes each dirty board's replica as a full snapshot
//! and upserts it, then sleeps before the next cycle. Snapshots are written
//! whole: the encoded form already deduplicates history, so there is nothing
//! to gain from per-object rows.
//!
//! ERROR HANDLING
//! ==============
//! Dirty ids are drained before the write and restored if it fails. This
//! prioritizes durability over duplicate flush attempts: a repeated upsert is
//! acceptable, silent data loss is not.

use std::collections::HashSet;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::state::AppState;

const DEFAULT_SNAPSHOT_FLUSH_INTERVAL_MS: u64 = 500;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Spawn the background persistence task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState) -> JoinHandle<()> {
    let flush_interval_ms = env_parse("SNAPSHOT_FLUSH_INTERVAL_MS", DEFAULT_SNAPSHOT_FLUSH_INTERVAL_MS);
    info!(flush_interval_ms, "snapshot persistence flush configured");
    tokio::spawn(async move {
        loop {
            flush_all_dirty(&state).await;
            tokio::time::sleep(Duration::from_millis(flush_interval_ms)).await;
        }
    })
}

async fn flush_all_dirty(state: &AppState) {
    // PHASE: ENCODE DIRTY BOARDS
    // WHY: drain dirty ids and encode under the lock, then write lock-free.
    // The dirty set has interior mutability, so a read guard is enough and
    // websocket mutations are blocked only for the encode.
    let batches: Vec<SnapshotFlushBatch> = {
        let boards = state.boards.read().await;
        boards
            .iter()
            .filter(|(_, board)| board.has_dirty())
            .map(|(board_id, board)| SnapshotFlushBatch {
                board_id: *board_id,
                drained: board.take_dirty(),
                snapshot: board.store.encode_snapshot(),
            })
            .collect()
    };

    // PHASE: UPSERT PER BOARD
    // WHY: if a write fails, its drained ids go back so the next cycle retries.
    for batch in batches {
        match save_snapshot(&state.pool, batch.board_id, &batch.snapshot).await {
            Ok(()) => {
                debug!(
                    board_id = %batch.board_id,
                    changed = batch.drained.len(),
                    bytes = batch.snapshot.len(),
                    "snapshot flushed"
                );
            }
            Err(e) => {
                error!(error = %e, board_id = %batch.board_id, "snapshot flush failed");
                let boards = state.boards.read().await;
                if let Some(board) = boards.get(&batch.board_id) {
                    board.restore_dirty(batch.drained);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) async fn flush_all_dirty_for_tests(state: &AppState) {
    flush_all_dirty(state).await;
}

#[derive(Debug)]
struct SnapshotFlushBatch {
    board_id: Uuid,
    drained: HashSet<String>,
    snapshot: Vec<u8>,
}

// =============================================================================
// SNAPSHOT ROWS
// =============================================================================

/// Upsert a board's snapshot row.
///
/// # Errors
///
/// Returns a database error if the upsert fails.
pub async fn save_snapshot(pool: &PgPool, board_id: Uuid, snapshot: &[u8]) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO board_snapshots (board_id, snapshot, updated_at)
         VALUES ($1, $2, now())
         ON CONFLICT (board_id) DO UPDATE
             SET snapshot = EXCLUDED.snapshot, updated_at = now()",
    )
    .bind(board_id)
    .bind(snapshot)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load a board's snapshot row, if one exists.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn load_snapshot(pool: &PgPool, board_id: Uuid) -> Result<Option<Vec<u8>>, sqlx::Error> {
    sqlx::query_scalar("SELECT snapshot FROM board_snapshots WHERE board_id = $1")
        .bind(board_id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
