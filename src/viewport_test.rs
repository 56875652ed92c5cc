use super::*;
use crate::model::{BoardObject, Geometry, ObjectKind, ObjectPatch};

fn rect(id: &str, x: f64, y: f64) -> BoardObject {
    BoardObject::new(id, x, y, Geometry::area(ObjectKind::Rectangle, 50.0, 50.0))
}

fn frame(id: &str, x: f64, y: f64) -> BoardObject {
    BoardObject::new(id, x, y, Geometry::area(ObjectKind::Frame, 400.0, 400.0))
}

fn view(x: f64, y: f64, w: f64, h: f64) -> Bounds {
    Bounds::from_rect(x, y, w, h)
}

#[test]
fn empty_store_yields_nothing() {
    let store = ObjectStore::default();
    assert!(visible_ids(&store, &view(0.0, 0.0, 100.0, 100.0)).is_empty());
}

#[test]
fn frames_first_then_insertion_order() {
    let mut store = ObjectStore::default();
    store.set_all([rect("r1", 0.0, 0.0), frame("f1", 0.0, 0.0), rect("r2", 10.0, 10.0), frame("f2", 20.0, 20.0)]);

    let ids = visible_ids(&store, &view(0.0, 0.0, 1000.0, 1000.0));
    assert_eq!(ids, ["f1", "f2", "r1", "r2"]);
}

#[test]
fn off_screen_objects_are_excluded() {
    let mut store = ObjectStore::default();
    store.set_all([rect("near", 0.0, 0.0), rect("far", 5000.0, 5000.0)]);
    assert_eq!(visible_ids(&store, &view(0.0, 0.0, 800.0, 600.0)), ["near"]);
}

#[test]
fn dragging_object_stays_visible_when_moved_off_screen() {
    let mut store = ObjectStore::default();
    store.set_all([rect("a", 0.0, 0.0), rect("b", 100.0, 100.0)]);
    store.set_dragging(["a".to_owned()]);
    store.update_object("a", &ObjectPatch::position(9000.0, 9000.0));

    let ids = visible_ids(&store, &view(0.0, 0.0, 800.0, 600.0));
    assert_eq!(ids, ["a", "b"]);

    store.clear_dragging();
    assert_eq!(visible_ids(&store, &view(0.0, 0.0, 800.0, 600.0)), ["b"]);
}

#[test]
fn dragging_ids_unknown_to_store_are_dropped() {
    let mut store = ObjectStore::default();
    store.set_all([rect("a", 0.0, 0.0)]);
    store.set_dragging(["ghost".to_owned()]);
    assert_eq!(visible_ids(&store, &view(0.0, 0.0, 10.0, 10.0)), ["a"]);
}

#[test]
fn reordering_follows_store_replacement() {
    let mut store = ObjectStore::default();
    store.set_all([rect("a", 0.0, 0.0), rect("b", 0.0, 0.0)]);
    store.delete_object("a");
    store.set_object(rect("a", 0.0, 0.0));
    assert_eq!(visible_ids(&store, &view(0.0, 0.0, 100.0, 100.0)), ["b", "a"]);
}
