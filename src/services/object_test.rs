use super::*;
use crate::model::test_fixtures::{rect, sticky};
use crate::state::test_helpers;
use crate::store::SharedObjectStore;

#[tokio::test]
async fn add_object_updates_store_and_view() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    let (stored, update) = add_object(&state, board_id, sticky("a", 10.0))
        .await
        .expect("add should succeed");
    assert_eq!(stored.id, "a");
    assert!(!update.is_empty(), "local add must produce a relay delta");

    let boards = state.boards.read().await;
    let board = boards.get(&board_id).unwrap();
    assert_eq!(board.store.len(), 1);
    assert_eq!(board.view.index_of("a"), Some(0));
}

#[tokio::test]
async fn add_object_delta_converges_a_fresh_peer() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    let (stored, update) = add_object(&state, board_id, rect("r1")).await.unwrap();

    let mut peer = SharedObjectStore::new();
    peer.apply_update(&update).expect("peer merge should succeed");
    assert_eq!(peer.get("r1"), Some(stored));
}

#[tokio::test]
async fn add_object_clamps_degenerate_geometry() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    let mut flat = sticky("flat", 0.0);
    flat.width = 0.0;
    flat.height = -3.0;

    let (stored, _) = add_object(&state, board_id, flat).await.unwrap();
    assert!((stored.width - MIN_OBJECT_SIZE).abs() < f64::EPSILON);
    assert!((stored.height - MIN_OBJECT_SIZE).abs() < f64::EPSILON);
}

#[tokio::test]
async fn update_object_replaces_the_whole_record() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board_with_objects(&state, &[sticky("a", 1.0)]).await;

    let mut moved = sticky("a", 400.0);
    moved.z_index = 9;
    let result = update_object(&state, board_id, "a", moved.clone())
        .await
        .expect("update should succeed")
        .expect("existing id should apply");
    assert_eq!(result.0, moved);

    let fetched = get_object(&state, board_id, "a").await.unwrap().unwrap();
    assert!((fetched.x - 400.0).abs() < f64::EPSILON);
    assert_eq!(fetched.z_index, 9);
}

#[tokio::test]
async fn update_absent_id_is_a_surfaced_no_op() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    let result = update_object(&state, board_id, "ghost", sticky("ghost", 0.0))
        .await
        .expect("no-op must not be an error");
    assert!(result.is_none());

    let objects = list_objects(&state, board_id).await.unwrap();
    assert!(objects.is_empty(), "no-op update must not create the object");
}

#[tokio::test]
async fn operations_on_unloaded_board_fail_with_code() {
    let state = test_helpers::test_app_state();
    let board_id = uuid::Uuid::new_v4();

    let err = add_object(&state, board_id, sticky("a", 0.0))
        .await
        .expect_err("unloaded board must error");
    assert!(matches!(err, ObjectError::BoardNotLoaded(id) if id == board_id));
    assert_eq!(err.error_code(), "E_BOARD_NOT_LOADED");
    assert!(!err.retryable());
}

#[tokio::test]
async fn list_objects_follows_view_order() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    for id in ["m", "a", "z", "c"] {
        add_object(&state, board_id, sticky(id, 0.0)).await.unwrap();
    }

    let ids: Vec<String> = list_objects(&state, board_id)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(ids, ["a", "c", "m", "z"]);
}

#[tokio::test]
async fn scoped_read_reports_totals() {
    let state = test_helpers::test_app_state();
    let objects: Vec<_> = (0..60).map(|i| sticky(&format!("obj-{i:03}"), 0.0)).collect();
    let board_id = test_helpers::seed_board_with_objects(&state, &objects).await;

    let scoped = scoped_read(&state, board_id, 0).await.unwrap();
    assert_eq!(scoped.total_objects, 60);
    assert_eq!(scoped.returned_count, 50);
    assert_eq!(scoped.objects.len(), 50);
}

#[tokio::test]
async fn apply_remote_update_merges_and_reports_changed_ids() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board_with_objects(&state, &[sticky("local", 0.0)]).await;

    let mut peer = SharedObjectStore::new();
    let delta = peer.add(&rect("remote")).unwrap();

    let changed = apply_remote_update(&state, board_id, &delta)
        .await
        .expect("merge should succeed");
    assert!(changed.contains("remote"));

    let objects = list_objects(&state, board_id).await.unwrap();
    let ids: Vec<&str> = objects.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, ["local", "remote"]);
}

#[tokio::test]
async fn apply_remote_update_rejects_garbage() {
    let state = test_helpers::test_app_state();
    let board_id = test_helpers::seed_board(&state).await;

    let err = apply_remote_update(&state, board_id, b"not a delta")
        .await
        .expect_err("garbage delta must error");
    assert_eq!(err.error_code(), "E_MALFORMED_UPDATE");
}
