#![allow(clippy::float_cmp)]

use std::time::Duration;

use super::*;
use crate::clock::ManualClock;
use crate::model::{Geometry, ObjectKind, Timestamp};
use crate::reconcile::{ChangeType, RemoteChange};

const T0_MS: i64 = 1_700_000_000_000;

fn session() -> (BoardSession, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0_MS));
    let mut session = BoardSession::new(&SyncConfig::default(), clock.clone());
    session.set_board(Some("b1".into()));
    session.mark_persistence_ready();
    (session, clock)
}

fn note(id: &str, x: f64, updated_ms: i64) -> BoardObject {
    let mut obj = BoardObject::new(id, x, 0.0, Geometry::area(ObjectKind::StickyNote, 100.0, 100.0));
    obj.updated_at = Some(Timestamp::from_millis(updated_ms));
    obj
}

fn initial(objects: &[BoardObject]) -> SnapshotEvent {
    SnapshotEvent {
        objects: objects.iter().map(|o| serde_json::to_value(o).unwrap()).collect(),
        changes: Vec::new(),
        is_initial: true,
    }
}

fn modified(obj: &BoardObject) -> SnapshotEvent {
    SnapshotEvent {
        objects: Vec::new(),
        changes: vec![RemoteChange::from_object(ChangeType::Modified, obj).unwrap()],
        is_initial: false,
    }
}

#[test]
fn writes_are_held_until_persistence_ready() {
    let clock = Arc::new(ManualClock::new(T0_MS));
    let mut session = BoardSession::new(&SyncConfig::default(), clock);
    session.set_board(Some("b1".into()));
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS)]));

    assert!(!session.queue_object_update("a", ObjectPatch::position(5.0, 5.0)));
    assert_eq!(session.store().get("a").unwrap().x, 5.0, "still applied optimistically");
    assert_eq!(session.queue().pending_count(), 0);

    session.mark_persistence_ready();
    assert!(session.queue_object_update("a", ObjectPatch::position(6.0, 6.0)));
}

#[test]
fn queue_object_update_applies_and_stamps() {
    let (mut session, clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS - 10_000)]));
    clock.advance(Duration::from_millis(250));

    assert!(session.queue_object_update("a", ObjectPatch::position(40.0, 0.0)));

    let obj = session.store().get("a").unwrap();
    assert_eq!(obj.x, 40.0);
    assert_eq!(obj.updated_at.and_then(|t| t.to_millis()), Some(T0_MS + 250));
    assert!(session.queue().is_pending("a"));
}

#[test]
fn debounce_follows_the_injected_clock() {
    let (mut session, clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS)]));
    session.queue_object_update("a", ObjectPatch::position(1.0, 0.0));

    clock.advance(Duration::from_millis(499));
    assert!(session.due_batches().is_empty());
    clock.advance(Duration::from_millis(1));
    let batches = session.due_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].board_id, "b1");
}

#[test]
fn pending_local_edit_survives_older_remote_copy() {
    let (mut session, clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS - 5_000)]));
    clock.advance(Duration::from_millis(100));
    session.queue_object_update("a", ObjectPatch::position(300.0, 0.0));

    let changed = session.apply_snapshot(&modified(&note("a", 7.0, T0_MS - 1_000)));

    assert!(!changed);
    assert_eq!(session.store().get("a").unwrap().x, 300.0);
}

#[test]
fn newer_remote_copy_beats_pending_local_edit() {
    let (mut session, _clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS - 5_000)]));
    session.queue_object_update("a", ObjectPatch::position(300.0, 0.0));

    let changed = session.apply_snapshot(&modified(&note("a", 7.0, T0_MS + 2_000)));

    assert!(changed);
    assert_eq!(session.store().get("a").unwrap().x, 7.0);
}

#[test]
fn echo_of_own_write_is_not_a_change() {
    let (mut session, _clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS - 5_000)]));
    session.queue_object_update("a", ObjectPatch::position(12.0, 0.0));
    let echo = session.store().get("a").unwrap().clone();
    let before = Arc::clone(session.store().objects());

    assert!(!session.apply_snapshot(&modified(&echo)));
    assert!(Arc::ptr_eq(&before, session.store().objects()));
}

#[test]
fn initial_snapshot_keeps_pending_local_copy_that_wins() {
    let (mut session, clock) = session();
    session.insert_local(note("a", 0.0, T0_MS - 5_000));
    clock.advance(Duration::from_millis(10));
    session.queue_object_update("a", ObjectPatch::position(99.0, 0.0));

    session.apply_snapshot(&initial(&[note("a", 1.0, T0_MS - 4_000), note("b", 0.0, T0_MS)]));

    assert_eq!(session.store().len(), 2);
    assert_eq!(session.store().get("a").unwrap().x, 99.0);
}

#[test]
fn initial_snapshot_skips_malformed_documents() {
    let (mut session, _clock) = session();
    let mut event = initial(&[note("a", 0.0, T0_MS)]);
    event.objects.push(serde_json::json!({ "id": "broken", "type": "hexagon" }));
    event.objects.push(serde_json::json!("not an object"));

    assert!(session.apply_snapshot(&event));
    assert_eq!(session.store().len(), 1);
}

#[test]
fn board_switch_clears_store_and_returns_old_writes() {
    let (mut session, _clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS)]));
    session.queue_object_update("a", ObjectPatch::position(1.0, 0.0));

    let batch = session.set_board(Some("b2".into())).unwrap();
    assert_eq!(batch.board_id, "b1");
    assert!(session.store().is_empty());
    assert!(!session.is_persistence_ready());
    assert_eq!(session.board_id(), Some("b2"));
}

#[test]
fn set_same_board_keeps_state() {
    let (mut session, _clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS)]));
    assert!(session.set_board(Some("b1".into())).is_none());
    assert_eq!(session.store().len(), 1);
    assert!(session.is_persistence_ready());
}

#[test]
fn failed_flush_is_retried_after_interval() {
    let (mut session, clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS)]));
    session.queue_object_update("a", ObjectPatch::position(1.0, 0.0));
    let batch = session.flush().unwrap();
    session.complete(batch, Err(PersistError::Unavailable));

    assert!(session.queue().is_pending("a"));
    clock.advance(Duration::from_millis(999));
    assert!(session.due_batches().is_empty());
    clock.advance(Duration::from_millis(1));
    assert_eq!(session.due_batches().len(), 1);
}

#[test]
fn visible_ids_delegates_to_viewport() {
    let (mut session, _clock) = session();
    session.apply_snapshot(&initial(&[note("a", 0.0, T0_MS), note("far", 10_000.0, T0_MS)]));
    assert_eq!(session.visible_ids(&Bounds::from_rect(0.0, 0.0, 500.0, 500.0)), ["a"]);
}
