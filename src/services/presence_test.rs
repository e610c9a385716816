use super::*;
use crate::presence::PresenceThrottle;
use crate::state::test_helpers;
use std::time::Duration;

fn cursor(user_id: &str, x: f64, y: f64) -> PresenceEvent {
    PresenceEvent {
        user_id: user_id.to_string(),
        user_name: format!("user {user_id}"),
        x,
        y,
        color: "#3b82f6".into(),
        sent_at: None,
    }
}

/// Swap in a throttle with a very long cooldown. Its first call still fires,
/// every later call inside the test is deterministically dropped.
async fn install_long_throttle(state: &crate::state::AppState, board_id: uuid::Uuid) {
    let mut boards = state.boards.write().await;
    boards.get_mut(&board_id).unwrap().throttle = PresenceThrottle::new(Duration::from_secs(3600));
}

#[tokio::test]
async fn first_cursor_flushes_immediately() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    let flushed = record_cursor(&state, board_id, cursor("alice", 10.0, 20.0))
        .await
        .expect("loaded board")
        .expect("first event must flush");
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].user_id, "alice");
}

#[tokio::test]
async fn events_inside_cooldown_are_absorbed_not_lost() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;
    install_long_throttle(&state, board_id).await;

    // Opens the window.
    assert!(record_cursor(&state, board_id, cursor("alice", 1.0, 1.0)).await.unwrap().is_some());
    // Dropped flush, but the event lands in the queue.
    assert!(record_cursor(&state, board_id, cursor("bob", 2.0, 2.0)).await.unwrap().is_none());

    let boards = state.boards.read().await;
    let board = boards.get(&board_id).unwrap();
    assert_eq!(board.presence.len(), 2);
    assert!((board.presence.get("bob").unwrap().x - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn flush_carries_latest_event_per_user() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;
    install_long_throttle(&state, board_id).await;

    // Fill the queue with superseded coordinates while flushes are dropped.
    record_cursor(&state, board_id, cursor("alice", 1.0, 1.0)).await.unwrap();
    record_cursor(&state, board_id, cursor("alice", 2.0, 2.0)).await.unwrap();
    record_cursor(&state, board_id, cursor("bob", 3.0, 3.0)).await.unwrap();

    // Fresh throttle: the next call fires and snapshots everything pending.
    install_long_throttle(&state, board_id).await;
    let flushed = record_cursor(&state, board_id, cursor("alice", 9.0, 9.0))
        .await
        .unwrap()
        .expect("fresh throttle must fire");

    assert_eq!(flushed.len(), 2, "one entry per user");
    let alice = flushed.iter().find(|e| e.user_id == "alice").unwrap();
    assert!((alice.x - 9.0).abs() < f64::EPSILON, "flush must carry the latest event");
}

#[tokio::test]
async fn cursor_on_unloaded_board_errors() {
    let state = test_helpers::test_app_state();
    let err = record_cursor(&state, uuid::Uuid::new_v4(), cursor("alice", 0.0, 0.0))
        .await
        .expect_err("unloaded board must error");
    assert_eq!(err.error_code(), "E_BOARD_NOT_LOADED");
}
