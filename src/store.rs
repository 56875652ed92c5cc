//! Object store: the authoritative local copy of a board's objects.
//!
//! DESIGN
//! ======
//! The store owns the id → object map (shared as `Arc` so the reconciler can
//! work copy-on-write), two derived relationship indices, the set of frame
//! ids, and the spatial index. The spatial index is refreshed for every
//! touched object. The relationship indices are rebuilt from scratch, but
//! only when a mutation can change them: a new object, a removal, a changed
//! `parent_frame_id`, changed connector endpoints, or a change to or from
//! the frame kind. Dragging an object rewrites its geometry many times a
//! second and must never pay for a full rebuild.
//!
//! Every operation is total. Unknown ids are ignored by update/delete and
//! inserted by upsert; dangling parent or endpoint references are indexed as
//! given and vanish once the referencing object goes away.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::consts::DEFAULT_CELL_SIZE;
use crate::geometry::object_bounds;
use crate::model::{BoardObject, ObjectId, ObjectPatch};
use crate::reconcile::{ObjectMap, Reconciliation};
use crate::spatial::SpatialIndex;

/// In-memory store of board objects plus derived indices.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    objects: Arc<ObjectMap>,
    /// Parent frame id -> child ids.
    frame_children: HashMap<ObjectId, HashSet<ObjectId>>,
    /// Shape id -> connector ids that reference it.
    connectors_by_endpoint: HashMap<ObjectId, HashSet<ObjectId>>,
    frame_ids: HashSet<ObjectId>,
    spatial: SpatialIndex,
    index_rebuilds: u64,
}

impl ObjectStore {
    /// Create an empty store whose spatial index uses `cell_size` grid cells.
    #[must_use]
    pub fn new(cell_size: f64) -> Self {
        Self {
            objects: Arc::new(ObjectMap::new()),
            frame_children: HashMap::new(),
            connectors_by_endpoint: HashMap::new(),
            frame_ids: HashSet::new(),
            spatial: SpatialIndex::new(cell_size),
            index_rebuilds: 0,
        }
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Replace every object. Rebuilds all indices.
    pub fn set_all<I>(&mut self, objects: I)
    where
        I: IntoIterator<Item = BoardObject>,
    {
        let map: ObjectMap = objects.into_iter().map(|o| (o.id.clone(), o)).collect();
        self.spatial.clear();
        for (id, obj) in &map {
            self.spatial.insert(id, object_bounds(obj));
        }
        self.objects = Arc::new(map);
        self.rebuild_indices();
    }

    /// Insert or replace one object.
    pub fn set_object(&mut self, obj: BoardObject) {
        self.set_objects(std::iter::once(obj));
    }

    /// Insert or replace several objects, rebuilding relationship indices at
    /// most once.
    pub fn set_objects<I>(&mut self, objects: I)
    where
        I: IntoIterator<Item = BoardObject>,
    {
        let mut needs_rebuild = false;
        let mut touched_any = false;
        {
            let map = Arc::make_mut(&mut self.objects);
            for obj in objects {
                touched_any = true;
                self.spatial.update(&obj.id, object_bounds(&obj));
                match map.get_mut(&obj.id) {
                    Some(slot) => {
                        needs_rebuild |= relationships_differ(slot, &obj);
                        *slot = obj;
                    }
                    None => {
                        needs_rebuild = true;
                        map.insert(obj.id.clone(), obj);
                    }
                }
            }
        }
        if touched_any && needs_rebuild {
            self.rebuild_indices();
        }
    }

    /// Merge `patch` onto an existing object. Returns `false` (and changes
    /// nothing) if `id` is unknown.
    pub fn update_object(&mut self, id: &str, patch: &ObjectPatch) -> bool {
        if !self.objects.contains_key(id) {
            return false;
        }
        let map = Arc::make_mut(&mut self.objects);
        let Some(obj) = map.get_mut(id) else {
            return false;
        };
        patch.apply_to(obj);
        self.spatial.update(id, object_bounds(obj));
        if patch.touches_relationships() {
            self.rebuild_indices();
        }
        true
    }

    pub fn delete_object(&mut self, id: &str) {
        self.delete_objects([id]);
    }

    /// Remove objects by id. Unknown ids are ignored.
    pub fn delete_objects<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: Vec<&str> = ids
            .into_iter()
            .filter(|id| self.objects.contains_key(*id))
            .collect();
        if ids.is_empty() {
            return;
        }
        let map = Arc::make_mut(&mut self.objects);
        for id in ids {
            map.shift_remove(id);
            self.spatial.remove(id);
        }
        self.rebuild_indices();
    }

    /// Drop every object, index entry and drag mark.
    pub fn clear(&mut self) {
        self.objects = Arc::new(ObjectMap::new());
        self.frame_children.clear();
        self.connectors_by_endpoint.clear();
        self.frame_ids.clear();
        self.spatial.clear();
        self.spatial.clear_dragging();
    }

    /// Adopt the output of a reconciliation pass.
    ///
    /// Only the touched ids are re-indexed spatially; relationship indices
    /// are rebuilt only if a touched object appeared, disappeared or changed
    /// relationships.
    pub fn apply_reconciliation(&mut self, rec: Reconciliation) {
        if !rec.did_change {
            return;
        }
        let mut needs_rebuild = false;
        for id in &rec.touched {
            match (self.objects.get(id), rec.objects.get(id)) {
                (Some(old), Some(new)) => {
                    needs_rebuild |= relationships_differ(old, new);
                    self.spatial.update(id, object_bounds(new));
                }
                (None, Some(new)) => {
                    needs_rebuild = true;
                    self.spatial.update(id, object_bounds(new));
                }
                (Some(_), None) => {
                    needs_rebuild = true;
                    self.spatial.remove(id);
                }
                (None, None) => {}
            }
        }
        self.objects = rec.objects;
        if needs_rebuild {
            self.rebuild_indices();
        }
    }

    /// Mark ids as being dragged so viewport queries always include them.
    pub fn set_dragging<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = ObjectId>,
    {
        self.spatial.set_dragging(ids);
    }

    pub fn clear_dragging(&mut self) {
        self.spatial.clear_dragging();
    }

    // =========================================================================
    // SELECTORS
    // =========================================================================

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&BoardObject> {
        self.objects.get(id)
    }

    /// Shared handle to the object map, in insertion order.
    #[must_use]
    pub fn objects(&self) -> &Arc<ObjectMap> {
        &self.objects
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoardObject> {
        self.objects.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    /// Objects whose `parent_frame_id` is `frame_id`.
    #[must_use]
    pub fn children_of(&self, frame_id: &str) -> Vec<&BoardObject> {
        self.frame_children
            .get(frame_id)
            .map(|ids| ids.iter().filter_map(|id| self.objects.get(id)).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn child_ids(&self, frame_id: &str) -> Option<&HashSet<ObjectId>> {
        self.frame_children.get(frame_id)
    }

    #[must_use]
    pub fn child_count(&self, frame_id: &str) -> usize {
        self.frame_children.get(frame_id).map_or(0, HashSet::len)
    }

    /// Every frame-kind object.
    #[must_use]
    pub fn frames(&self) -> Vec<&BoardObject> {
        self.frame_ids
            .iter()
            .filter_map(|id| self.objects.get(id))
            .collect()
    }

    /// Connector ids referencing `shape_id` as either endpoint.
    #[must_use]
    pub fn connectors_for(&self, shape_id: &str) -> Vec<&str> {
        self.connectors_by_endpoint
            .get(shape_id)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[must_use]
    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    /// Number of full relationship-index rebuilds performed so far.
    #[must_use]
    pub fn index_rebuilds(&self) -> u64 {
        self.index_rebuilds
    }

    fn rebuild_indices(&mut self) {
        self.frame_children.clear();
        self.connectors_by_endpoint.clear();
        self.frame_ids.clear();
        for (id, obj) in self.objects.iter() {
            if obj.is_frame() {
                self.frame_ids.insert(id.clone());
            }
            if let Some(parent) = obj.parent_frame() {
                self.frame_children
                    .entry(parent.to_owned())
                    .or_default()
                    .insert(id.clone());
            }
            if let Some((from, to)) = obj.endpoints() {
                for endpoint in [from, to].into_iter().flatten() {
                    self.connectors_by_endpoint
                        .entry(endpoint.to_owned())
                        .or_default()
                        .insert(id.clone());
                }
            }
        }
        self.index_rebuilds += 1;
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

/// True if replacing `old` with `new` can change any relationship index.
fn relationships_differ(old: &BoardObject, new: &BoardObject) -> bool {
    old.parent_frame() != new.parent_frame() || old.endpoints() != new.endpoints() || old.is_frame() != new.is_frame()
}
