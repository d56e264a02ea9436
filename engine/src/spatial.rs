use std::collections::{HashMap, HashSet};

use rstar::{AABB, RTree, RTreeObject};
use zonemap_shared::{BBox, UnitId};

/// `(bbox, unit_id)` pair stored in the R-tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialEntry {
    pub bbox: BBox,
    pub unit_id: UnitId,
}

impl SpatialEntry {
    pub fn new(unit_id: impl Into<UnitId>, bbox: BBox) -> Self {
        Self {
            bbox,
            unit_id: unit_id.into(),
        }
    }
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min, self.bbox.max)
    }
}

/// R-tree over active unit bounding boxes, fed tile by tile.
///
/// Loading the same tile key twice is a no-op. Memory only grows until
/// [`SpatialIndex::clear`], apart from explicit unit swaps on shatter/heal.
#[derive(Default)]
pub struct SpatialIndex {
    tree: RTree<SpatialEntry>,
    seen_tiles: HashSet<String>,
    boxes_by_unit: HashMap<UnitId, Vec<BBox>>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-inserts one tile's entries. Returns `false` if the tile was
    /// already loaded.
    pub fn load(&mut self, tile_key: &str, entries: Vec<SpatialEntry>) -> bool {
        if !self.seen_tiles.insert(tile_key.to_string()) {
            return false;
        }
        for entry in &entries {
            self.boxes_by_unit
                .entry(entry.unit_id.clone())
                .or_default()
                .push(entry.bbox);
        }
        if self.tree.size() == 0 {
            self.tree = RTree::bulk_load(entries);
        } else {
            for entry in entries {
                self.tree.insert(entry);
            }
        }
        true
    }

    /// Ids of every entry whose bbox intersects `bbox`, in tree order.
    /// A unit with several pieces can appear more than once.
    pub fn query_bbox(&self, bbox: &BBox) -> Vec<UnitId> {
        let envelope = AABB::from_corners(bbox.min, bbox.max);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.unit_id.clone())
            .collect()
    }

    /// [`SpatialIndex::query_bbox`] with duplicates removed, first seen wins.
    pub fn query_bbox_dedup(&self, bbox: &BBox) -> Vec<UnitId> {
        dedup_first_seen(self.query_bbox(bbox))
    }

    /// Adds entries for a unit outside of any tile load (children becoming
    /// active after a shatter, a parent coming back after a heal).
    pub fn insert_unit(&mut self, unit_id: &str, bboxes: &[BBox]) {
        if bboxes.is_empty() || self.boxes_by_unit.contains_key(unit_id) {
            return;
        }
        self.boxes_by_unit
            .insert(unit_id.to_string(), bboxes.to_vec());
        for bbox in bboxes {
            self.tree.insert(SpatialEntry::new(unit_id, *bbox));
        }
    }

    /// Removes every entry of a unit. Returns how many entries were dropped.
    pub fn remove_unit(&mut self, unit_id: &str) -> usize {
        let Some(bboxes) = self.boxes_by_unit.remove(unit_id) else {
            return 0;
        };
        bboxes
            .into_iter()
            .filter(|bbox| self.tree.remove(&SpatialEntry::new(unit_id, *bbox)).is_some())
            .count()
    }

    pub fn contains_unit(&self, unit_id: &str) -> bool {
        self.boxes_by_unit.contains_key(unit_id)
    }

    pub fn has_tile(&self, tile_key: &str) -> bool {
        self.seen_tiles.contains(tile_key)
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
        self.seen_tiles.clear();
        self.boxes_by_unit.clear();
    }

    /// Number of entries (not units).
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

pub fn dedup_first_seen(ids: Vec<UnitId>) -> Vec<UnitId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
