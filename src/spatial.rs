//! Grid-bucketed spatial index for viewport range queries.
//!
//! DESIGN
//! ======
//! Each entry is registered in every grid cell its bounds touch, so a query
//! only visits the cells under the query rectangle and then filters the
//! candidates with an exact overlap test. Two escape hatches keep the result
//! exact without letting a single entry or query degenerate the grid:
//! - entries spanning more than [`MAX_CELLS_PER_ENTRY`] cells (or with
//!   non-finite bounds) sit in an overflow set that every query scans;
//! - a query covering more cells than there are entries scans entries
//!   linearly instead of walking empty cells.
//!
//! Ids marked as dragging are returned by every query regardless of their
//! stored bounds, so a shape under a fast drag never drops out of view.

#[cfg(test)]
#[path = "spatial_test.rs"]
mod spatial_test;

use std::collections::{HashMap, HashSet};

use crate::consts::{DEFAULT_CELL_SIZE, MAX_CELLS_PER_ENTRY};
use crate::geometry::Bounds;
use crate::model::ObjectId;

type Cell = (i64, i64);

/// Inclusive range of grid cells covered by a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellSpan {
    min_x: i64,
    min_y: i64,
    max_x: i64,
    max_y: i64,
}

impl CellSpan {
    fn cell_count(&self) -> i64 {
        let w = self.max_x.saturating_sub(self.min_x).saturating_add(1);
        let h = self.max_y.saturating_sub(self.min_y).saturating_add(1);
        w.saturating_mul(h)
    }

    fn cells(self) -> impl Iterator<Item = Cell> {
        (self.min_x..=self.max_x).flat_map(move |cx| (self.min_y..=self.max_y).map(move |cy| (cx, cy)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Cells(CellSpan),
    Overflow,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    bounds: Bounds,
    placement: Placement,
}

/// Bounding-box index keyed by object id.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    entries: HashMap<ObjectId, Entry>,
    cells: HashMap<Cell, HashSet<ObjectId>>,
    overflow: HashSet<ObjectId>,
    dragging: HashSet<ObjectId>,
}

impl SpatialIndex {
    /// Create an empty index. Non-positive or non-finite cell sizes fall back
    /// to [`DEFAULT_CELL_SIZE`].
    #[must_use]
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 { cell_size } else { DEFAULT_CELL_SIZE };
        Self {
            cell_size,
            entries: HashMap::new(),
            cells: HashMap::new(),
            overflow: HashSet::new(),
            dragging: HashSet::new(),
        }
    }

    #[must_use]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Place an entry. Equivalent to [`SpatialIndex::update`].
    pub fn insert(&mut self, id: &str, bounds: Bounds) {
        self.update(id, bounds);
    }

    /// Place or relocate an entry, touching only the cells that differ.
    pub fn update(&mut self, id: &str, bounds: Bounds) {
        let placement = self.placement_for(&bounds);
        if let Some(entry) = self.entries.get_mut(id) {
            if entry.placement == placement {
                entry.bounds = bounds;
                return;
            }
            let old = entry.placement;
            *entry = Entry { bounds, placement };
            self.unplace(id, old);
            self.place(id, placement);
            return;
        }
        self.entries.insert(id.to_owned(), Entry { bounds, placement });
        self.place(id, placement);
    }

    /// Remove an entry. Unknown ids are ignored.
    pub fn remove(&mut self, id: &str) {
        if let Some(entry) = self.entries.remove(id) {
            self.unplace(id, entry.placement);
        }
    }

    /// Drop every entry. The dragging set is left alone.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cells.clear();
        self.overflow.clear();
    }

    /// Ids whose bounds overlap `rect`, plus every dragging id.
    #[must_use]
    pub fn query(&self, rect: &Bounds) -> HashSet<ObjectId> {
        let mut out = HashSet::new();
        let span = self.span_for(rect);
        let linear = match span {
            Some(span) => usize::try_from(span.cell_count()).map_or(true, |n| n > self.entries.len()),
            None => true,
        };

        if linear {
            for (id, entry) in &self.entries {
                if entry.bounds.overlaps(rect) {
                    out.insert(id.clone());
                }
            }
        } else if let Some(span) = span {
            for cell in span.cells() {
                let Some(ids) = self.cells.get(&cell) else {
                    continue;
                };
                for id in ids {
                    if out.contains(id) {
                        continue;
                    }
                    if self.entries.get(id).is_some_and(|e| e.bounds.overlaps(rect)) {
                        out.insert(id.clone());
                    }
                }
            }
            for id in &self.overflow {
                if self.entries.get(id).is_some_and(|e| e.bounds.overlaps(rect)) {
                    out.insert(id.clone());
                }
            }
        }

        out.extend(self.dragging.iter().cloned());
        out
    }

    /// Replace the drag-exemption set.
    pub fn set_dragging<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = ObjectId>,
    {
        self.dragging = ids.into_iter().collect();
    }

    pub fn clear_dragging(&mut self) {
        self.dragging.clear();
    }

    #[must_use]
    pub fn is_dragging(&self, id: &str) -> bool {
        self.dragging.contains(id)
    }

    #[must_use]
    pub fn dragging(&self) -> &HashSet<ObjectId> {
        &self.dragging
    }

    /// Stored bounds for `id`.
    #[must_use]
    pub fn bounds(&self, id: &str) -> Option<Bounds> {
        self.entries.get(id).map(|e| e.bounds)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cell_coord(&self, v: f64) -> i64 {
        #[allow(clippy::cast_possible_truncation)]
        let c = (v / self.cell_size).floor() as i64;
        c
    }

    fn span_for(&self, b: &Bounds) -> Option<CellSpan> {
        if !b.is_finite() {
            return None;
        }
        Some(CellSpan {
            min_x: self.cell_coord(b.left),
            min_y: self.cell_coord(b.top),
            max_x: self.cell_coord(b.right),
            max_y: self.cell_coord(b.bottom),
        })
    }

    fn placement_for(&self, b: &Bounds) -> Placement {
        match self.span_for(b) {
            Some(span) if span.cell_count() <= MAX_CELLS_PER_ENTRY => Placement::Cells(span),
            _ => Placement::Overflow,
        }
    }

    fn place(&mut self, id: &str, placement: Placement) {
        match placement {
            Placement::Cells(span) => {
                for cell in span.cells() {
                    self.cells.entry(cell).or_default().insert(id.to_owned());
                }
            }
            Placement::Overflow => {
                self.overflow.insert(id.to_owned());
            }
        }
    }

    fn unplace(&mut self, id: &str, placement: Placement) {
        match placement {
            Placement::Cells(span) => {
                for cell in span.cells() {
                    if let Some(ids) = self.cells.get_mut(&cell) {
                        ids.remove(id);
                        if ids.is_empty() {
                            self.cells.remove(&cell);
                        }
                    }
                }
            }
            Placement::Overflow => {
                self.overflow.remove(id);
            }
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}
