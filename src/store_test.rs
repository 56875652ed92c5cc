#![allow(clippy::float_cmp)]

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::geometry::Bounds;
use crate::model::{Geometry, ObjectPatch};
use crate::reconcile::{ChangeType, RemoteChange, reconcile};

fn sticky(id: &str, x: f64, y: f64) -> BoardObject {
    BoardObject::new(id, x, y, Geometry::StickyNote { width: 100.0, height: 100.0 })
}

fn frame(id: &str) -> BoardObject {
    BoardObject::new(id, 0.0, 0.0, Geometry::Frame { width: 500.0, height: 500.0 })
}

fn child(id: &str, parent: &str) -> BoardObject {
    let mut obj = sticky(id, 10.0, 10.0);
    obj.parent_frame_id = Some(parent.to_owned());
    obj
}

fn connector(id: &str, from: &str, to: &str) -> BoardObject {
    BoardObject::new(id, 0.0, 0.0, Geometry::connector(vec![0.0, 0.0, 10.0, 10.0], Some(from.into()), Some(to.into())))
}

fn id_set(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|s| (*s).to_owned()).collect()
}

/// Recompute both relationship indices from scratch and compare.
fn assert_indices_consistent(store: &ObjectStore) {
    for obj in store.iter() {
        if let Some(parent) = obj.parent_frame() {
            assert!(
                store.child_ids(parent).is_some_and(|ids| ids.contains(&obj.id)),
                "{} missing from children of {parent}",
                obj.id
            );
        }
        if let Some((from, to)) = obj.endpoints() {
            for endpoint in [from, to].into_iter().flatten() {
                assert!(store.connectors_for(endpoint).contains(&obj.id.as_str()));
            }
        }
    }
    for (parent, children) in &store.frame_children {
        for id in children {
            let obj = store.get(id).expect("indexed child must exist");
            assert_eq!(obj.parent_frame(), Some(parent.as_str()));
        }
    }
    for (shape, connectors) in &store.connectors_by_endpoint {
        for id in connectors {
            let obj = store.get(id).expect("indexed connector must exist");
            let (from, to) = obj.endpoints().expect("indexed connector must be a connector");
            assert!(from == Some(shape.as_str()) || to == Some(shape.as_str()));
        }
    }
    assert_eq!(store.spatial().len(), store.len());
    for obj in store.iter() {
        assert!(store.spatial().contains(&obj.id));
    }
}

// =============================================================
// set_all / selectors
// =============================================================

#[test]
fn set_all_populates_every_index() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("f1"), child("c1", "f1"), child("c2", "f1"), sticky("s", 0.0, 0.0), connector("k", "c1", "s")]);

    assert_eq!(store.len(), 5);
    assert_eq!(store.child_count("f1"), 2);
    let mut children: Vec<&str> = store.children_of("f1").iter().map(|o| o.id.as_str()).collect();
    children.sort_unstable();
    assert_eq!(children, vec!["c1", "c2"]);
    assert_eq!(store.frames().len(), 1);
    assert_eq!(store.connectors_for("s"), vec!["k"]);
    assert_eq!(store.connectors_for("c1"), vec!["k"]);
    assert!(store.connectors_for("f1").is_empty());
    assert_eq!(store.spatial().len(), 5);
    assert_indices_consistent(&store);
}

#[test]
fn set_all_replaces_previous_contents() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0)]);
    store.set_all(vec![sticky("b", 0.0, 0.0)]);
    assert!(store.get("a").is_none());
    assert!(!store.spatial().contains("a"));
    assert_eq!(store.ids().collect::<Vec<_>>(), vec!["b"]);
}

// =============================================================
// Conditional rebuild
// =============================================================

#[test]
fn geometry_only_upsert_skips_rebuild() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("f1"), child("c1", "f1")]);
    let before = store.index_rebuilds();

    let mut moved = child("c1", "f1");
    moved.x = 300.0;
    store.set_object(moved);
    assert_eq!(store.index_rebuilds(), before);
    assert_eq!(store.spatial().bounds("c1").map(|b| b.left), Some(300.0));

    assert!(store.update_object("c1", &ObjectPatch::position(50.0, 60.0)));
    assert_eq!(store.index_rebuilds(), before);
    assert_eq!(store.get("c1").map(|o| o.x), Some(50.0));
    assert_eq!(store.spatial().bounds("c1").map(|b| b.top), Some(60.0));
}

#[test]
fn new_object_triggers_rebuild() {
    let mut store = ObjectStore::default();
    let before = store.index_rebuilds();
    store.set_object(sticky("a", 0.0, 0.0));
    assert_eq!(store.index_rebuilds(), before + 1);
}

#[test]
fn reparent_triggers_rebuild() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("f1"), frame("f2"), child("c1", "f1")]);
    let before = store.index_rebuilds();

    store.set_object(child("c1", "f2"));
    assert_eq!(store.index_rebuilds(), before + 1);
    assert_eq!(store.child_count("f1"), 0);
    assert_eq!(store.child_count("f2"), 1);

    assert!(store.update_object("c1", &ObjectPatch::reparent(None)));
    assert_eq!(store.index_rebuilds(), before + 2);
    assert_eq!(store.child_count("f2"), 0);
    assert_indices_consistent(&store);
}

#[test]
fn endpoint_change_triggers_rebuild() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0), sticky("b", 0.0, 0.0), sticky("c", 0.0, 0.0), connector("k", "a", "b")]);
    let before = store.index_rebuilds();

    store.set_object(connector("k", "a", "c"));
    assert_eq!(store.index_rebuilds(), before + 1);
    assert!(store.connectors_for("b").is_empty());
    assert_eq!(store.connectors_for("c"), vec!["k"]);
}

#[test]
fn kind_change_to_frame_triggers_rebuild() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0)]);
    let before = store.index_rebuilds();
    store.set_object(frame("a"));
    assert_eq!(store.index_rebuilds(), before + 1);
    assert_eq!(store.frames().len(), 1);
}

#[test]
fn batch_upsert_rebuilds_once() {
    let mut store = ObjectStore::default();
    let before = store.index_rebuilds();
    store.set_objects((0..50).map(|i| sticky(&format!("s{i}"), 0.0, 0.0)));
    assert_eq!(store.index_rebuilds(), before + 1);
    assert_eq!(store.len(), 50);
}

// =============================================================
// Totality
// =============================================================

#[test]
fn update_unknown_id_is_noop() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0)]);
    let before = store.index_rebuilds();
    assert!(!store.update_object("ghost", &ObjectPatch::reparent(Some("f"))));
    assert_eq!(store.len(), 1);
    assert_eq!(store.index_rebuilds(), before);
}

#[test]
fn delete_unknown_id_is_noop() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0)]);
    let before = store.index_rebuilds();
    store.delete_object("ghost");
    assert_eq!(store.len(), 1);
    assert_eq!(store.index_rebuilds(), before);
}

#[test]
fn delete_removes_from_map_spatial_and_indices() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("f1"), child("c1", "f1"), sticky("s", 0.0, 0.0), connector("k", "c1", "s")]);
    store.delete_objects(["c1", "k"]);
    assert!(store.get("c1").is_none());
    assert!(!store.spatial().contains("c1"));
    assert_eq!(store.child_count("f1"), 0);
    assert!(store.connectors_for("s").is_empty());
    assert_indices_consistent(&store);
}

#[test]
fn dangling_parent_tolerated_until_child_removed() {
    let mut store = ObjectStore::default();
    store.set_all(vec![child("c1", "missing-frame")]);
    assert_eq!(store.child_count("missing-frame"), 1);
    store.delete_object("c1");
    assert_eq!(store.child_count("missing-frame"), 0);
    assert!(store.child_ids("missing-frame").is_none());
}

#[test]
fn deleting_frame_leaves_child_indexed_until_unparented() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("frame-1"), child("child", "frame-1")]);
    store.delete_object("frame-1");
    // Dangling reference is still indexed while the child points at it.
    assert_eq!(store.child_count("frame-1"), 1);
    store.update_object("child", &ObjectPatch::reparent(None));
    assert!(store.child_ids("frame-1").is_none());
    assert_indices_consistent(&store);
}

#[test]
fn clear_empties_everything() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("f1"), child("c1", "f1")]);
    store.set_dragging(vec!["c1".to_owned()]);
    store.clear();
    assert!(store.is_empty());
    assert!(store.spatial().is_empty());
    assert!(store.spatial().dragging().is_empty());
    assert_eq!(store.child_count("f1"), 0);
    assert!(store.frames().is_empty());
}

#[test]
fn objects_arc_is_not_shared_after_mutation() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0)]);
    let snapshot = Arc::clone(store.objects());
    store.update_object("a", &ObjectPatch::position(9.0, 9.0));
    assert_eq!(snapshot["a"].x, 0.0);
    assert_eq!(store.get("a").map(|o| o.x), Some(9.0));
}

// =============================================================
// Reconciliation adoption
// =============================================================

#[test]
fn apply_reconciliation_updates_spatial_for_touched_ids() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0), sticky("b", 0.0, 0.0)]);
    let before = store.index_rebuilds();

    let changes = vec![
        RemoteChange::from_object(ChangeType::Modified, &sticky("a", 1000.0, 1000.0)).unwrap(),
    ];
    let rec = reconcile(store.objects(), &changes);
    store.apply_reconciliation(rec);

    assert_eq!(store.index_rebuilds(), before);
    assert_eq!(store.spatial().query(&Bounds::new(990.0, 990.0, 1010.0, 1010.0)), id_set(&["a"]));
}

#[test]
fn apply_reconciliation_with_removal_rebuilds() {
    let mut store = ObjectStore::default();
    store.set_all(vec![frame("f1"), child("c1", "f1")]);
    let before = store.index_rebuilds();
    let rec = reconcile(store.objects(), &[RemoteChange::removed("c1")]);
    store.apply_reconciliation(rec);
    assert_eq!(store.index_rebuilds(), before + 1);
    assert_eq!(store.child_count("f1"), 0);
    assert!(!store.spatial().contains("c1"));
    assert_indices_consistent(&store);
}

#[test]
fn apply_unchanged_reconciliation_is_noop() {
    let mut store = ObjectStore::default();
    store.set_all(vec![sticky("a", 0.0, 0.0)]);
    let before = store.index_rebuilds();
    let rec = reconcile(store.objects(), &[]);
    store.apply_reconciliation(rec);
    assert_eq!(store.index_rebuilds(), before);
}

// =============================================================
// Index consistency property
// =============================================================

#[test]
fn indices_stay_consistent_under_random_mutations() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut store = ObjectStore::new(64.0);
    let pool: Vec<String> = (0..30).map(|i| format!("o{i}")).collect();

    for step in 0..2000 {
        let id = &pool[rng.random_range(0..pool.len())];
        let other = &pool[rng.random_range(0..pool.len())];
        match rng.random_range(0..7) {
            0 => store.set_object(sticky(id, rng.random_range(-500.0..500.0), rng.random_range(-500.0..500.0))),
            1 => store.set_object(frame(id)),
            2 => store.set_object(child(id, other)),
            3 => store.set_object(connector(id, other, &pool[rng.random_range(0..pool.len())])),
            4 => {
                store.update_object(id, &ObjectPatch::position(rng.random_range(-500.0..500.0), 0.0));
            }
            5 => {
                let parent = if rng.random_bool(0.5) { Some(other.as_str()) } else { None };
                store.update_object(id, &ObjectPatch::reparent(parent));
            }
            _ => store.delete_object(id),
        }
        if step % 500 == 0 {
            store.set_all(store.iter().cloned().collect::<Vec<_>>());
        }
        assert_indices_consistent(&store);
    }
}
