use std::sync::{Arc, Mutex};

use base64::Engine;

use super::*;
use crate::model::ObjectProperties;
use crate::model::test_fixtures::{rect, sticky};

#[test]
fn add_then_get() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 1.0)).unwrap();
    let got = store.get("a").expect("object should exist");
    assert!((got.x - 1.0).abs() < f64::EPSILON);
    assert_eq!(got.properties.kind(), "sticky_note");
}

#[test]
fn get_absent_is_none() {
    let store = SharedObjectStore::new();
    assert!(store.get("missing").is_none());
}

#[test]
fn overwrite_by_id_keeps_one_record() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 0.0)).unwrap();
    store.add(&sticky("a", 5.0)).unwrap();

    assert_eq!(store.len(), 1);
    let got = store.get("a").unwrap();
    assert!((got.x - 5.0).abs() < f64::EPSILON);
}

#[test]
fn update_replaces_whole_record() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 0.0)).unwrap();

    let mut replacement = sticky("a", 9.0);
    replacement.properties = ObjectProperties::StickyNote { text: "edited".into(), color: "#F00".into() };
    let delta = store.update("a", &replacement).unwrap();
    assert!(delta.is_some());

    let got = store.get("a").unwrap();
    assert_eq!(got, replacement);
}

#[test]
fn update_absent_id_is_a_no_op() {
    let mut store = SharedObjectStore::new();
    let result = store.update("ghost", &sticky("ghost", 1.0)).unwrap();
    assert!(result.is_none());
    assert!(store.is_empty());
}

#[test]
fn get_all_is_ordered_by_id() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("b", 0.0)).unwrap();
    store.add(&rect("a")).unwrap();
    store.add(&sticky("c", 0.0)).unwrap();

    let objects = store.get_all();
    let ids: Vec<&str> = objects.iter().map(|o| o.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn snapshot_round_trip_preserves_content() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 1.0)).unwrap();
    store.add(&rect("b")).unwrap();

    let restored = SharedObjectStore::from_snapshot(&store.encode_snapshot());
    assert_eq!(restored.get_all(), store.get_all());
}

#[test]
fn snapshot_decode_is_idempotent() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 1.0)).unwrap();
    let bytes = store.encode_snapshot();

    let first = SharedObjectStore::from_snapshot(&bytes);
    let second = SharedObjectStore::from_snapshot(&bytes);
    assert_eq!(first.get_all(), second.get_all());
}

#[test]
fn snapshot_accepts_hex_prefixed_text() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 1.0)).unwrap();
    let encoded = format!("0x{}", hex::encode(store.encode_snapshot()));

    let restored = SharedObjectStore::from_snapshot(encoded.as_bytes());
    assert_eq!(restored.get_all(), store.get_all());
}

#[test]
fn snapshot_accepts_postgres_bytea_text() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 1.0)).unwrap();
    let encoded = format!(r"\x{}", hex::encode(store.encode_snapshot()));

    let restored = SharedObjectStore::from_snapshot(encoded.as_bytes());
    assert_eq!(restored.get_all(), store.get_all());
}

#[test]
fn snapshot_accepts_base64_text() {
    let mut store = SharedObjectStore::new();
    store.add(&sticky("a", 1.0)).unwrap();
    let encoded = base64::engine::general_purpose::STANDARD.encode(store.encode_snapshot());

    let restored = SharedObjectStore::from_snapshot(encoded.as_bytes());
    assert_eq!(restored.get_all(), store.get_all());
}

#[test]
fn malformed_snapshot_degrades_to_empty() {
    for garbage in [&b"not a snapshot"[..], &b"0xzz"[..], &b"\xff\xfe\xfd"[..], &b""[..]] {
        let store = SharedObjectStore::from_snapshot(garbage);
        assert!(store.is_empty(), "input {garbage:?} should yield an empty store");
    }
}

#[test]
fn bidirectional_merge_converges_on_union() {
    let mut left = SharedObjectStore::new();
    let mut right = SharedObjectStore::new();
    for i in 0..10 {
        left.add(&sticky(&format!("l{i}"), f64::from(i))).unwrap();
        right.add(&sticky(&format!("r{i}"), f64::from(i))).unwrap();
    }

    let left_bytes = left.encode_snapshot();
    let right_bytes = right.encode_snapshot();
    left.apply_update(&right_bytes).unwrap();
    right.apply_update(&left_bytes).unwrap();

    assert_eq!(left.len(), 20);
    assert_eq!(right.len(), 20);
    assert_eq!(left.get_all(), right.get_all());
}

#[test]
fn merge_is_idempotent_under_redelivery() {
    let mut left = SharedObjectStore::new();
    let mut right = SharedObjectStore::new();
    let delta = left.add(&sticky("a", 1.0)).unwrap();

    right.apply_update(&delta).unwrap();
    right.apply_update(&delta).unwrap();
    right.apply_update(&delta).unwrap();

    assert_eq!(right.len(), 1);
    assert_eq!(right.get_all(), left.get_all());
}

#[test]
fn concurrent_field_edits_resolve_to_one_whole_record() {
    // Two replicas hydrate the same base object, then one resizes while the
    // other edits text. Whole-record values mean exactly one write survives
    // intact after convergence — never a per-field mix.
    let mut base = SharedObjectStore::new();
    base.add(&sticky("o", 0.0)).unwrap();
    let snapshot = base.encode_snapshot();

    let mut left = SharedObjectStore::from_snapshot(&snapshot);
    let mut right = SharedObjectStore::from_snapshot(&snapshot);

    let mut resized = left.get("o").unwrap();
    resized.width = 300.0;
    let left_delta = left.update("o", &resized).unwrap().unwrap();

    let mut retexted = right.get("o").unwrap();
    retexted.properties = ObjectProperties::StickyNote { text: "edited".into(), color: "#FFEB3B".into() };
    let right_delta = right.update("o", &retexted).unwrap().unwrap();

    left.apply_update(&right_delta).unwrap();
    right.apply_update(&left_delta).unwrap();

    let merged = left.get("o").unwrap();
    assert_eq!(merged, right.get("o").unwrap(), "replicas must converge");
    assert!(
        merged == resized || merged == retexted,
        "winner must be one complete record, got {merged:?}"
    );
}

#[test]
fn subscribe_receives_changed_ids_for_local_mutations() {
    let seen: Arc<Mutex<Vec<HashSet<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut store = SharedObjectStore::new();
    store.subscribe(move |changed| sink.lock().unwrap().push(changed.clone()));

    store.add(&sticky("a", 0.0)).unwrap();
    store.update("a", &sticky("a", 2.0)).unwrap();

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains("a"));
    assert!(calls[1].contains("a"));
}

#[test]
fn subscribe_receives_changed_ids_for_remote_merges() {
    let mut peer = SharedObjectStore::new();
    let delta = peer.add(&sticky("remote", 0.0)).unwrap();

    let seen: Arc<Mutex<Vec<HashSet<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut store = SharedObjectStore::new();
    store.subscribe(move |changed| sink.lock().unwrap().push(changed.clone()));

    let changed = store.apply_update(&delta).unwrap();
    assert!(changed.contains("remote"));

    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], changed);
}

#[test]
fn unsubscribe_stops_dispatch() {
    let seen: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&seen);

    let mut store = SharedObjectStore::new();
    let id = store.subscribe(move |_| *sink.lock().unwrap() += 1);

    store.add(&sticky("a", 0.0)).unwrap();
    store.unsubscribe(id);
    store.add(&sticky("b", 0.0)).unwrap();

    assert_eq!(*seen.lock().unwrap(), 1);
}

#[test]
fn apply_update_rejects_garbage() {
    let mut store = SharedObjectStore::new();
    let result = store.apply_update(b"definitely not an update");
    assert!(matches!(result, Err(StoreError::MalformedUpdate(_))));
}
