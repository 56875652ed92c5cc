//! Viewport query for the renderer.

#[cfg(test)]
#[path = "viewport_test.rs"]
mod viewport_test;

use crate::geometry::Bounds;
use crate::model::ObjectId;
use crate::store::ObjectStore;

/// Ids of objects to render for `rect`: frames first, then everything else,
/// each group in store insertion order.
///
/// Dragging ids are always included. Before the spatial index has any
/// entries every known object is returned.
#[must_use]
pub fn visible_ids(store: &ObjectStore, rect: &Bounds) -> Vec<ObjectId> {
    let objects = store.objects();
    if store.spatial().is_empty() {
        let (mut frames, rest): (Vec<_>, Vec<_>) = objects.values().partition(|o| o.is_frame());
        frames.extend(rest);
        return frames.into_iter().map(|o| o.id.clone()).collect();
    }

    let mut ranked: Vec<(bool, usize, ObjectId)> = store
        .spatial()
        .query(rect)
        .into_iter()
        .filter_map(|id| {
            let (pos, _, obj) = objects.get_full(&id)?;
            Some((!obj.is_frame(), pos, id))
        })
        .collect();
    ranked.sort_unstable_by_key(|(not_frame, pos, _)| (*not_frame, *pos));
    ranked.into_iter().map(|(_, _, id)| id).collect()
}
