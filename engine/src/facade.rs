//! Single entry point for one editing session.
//!
//! Every mutation goes through here so the spatial index, the assignment
//! store, the geometry worker and the undo history stay consistent.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use zonemap_shared::{
    BBox, ChildLayerSpec, PlanDocument, TilePayload, UnitFeature, UnitId, UnitLayer, ZoneId,
};

use crate::assignment::{
    AssignmentDelta, AssignmentSnapshot, AssignmentStore, HealResult, HistoryStep, ShatterDelta,
    StoreEffect,
};
use crate::catalog::{ChildLayer, UnitCatalog};
use crate::error::{GeometryError, ZoneError};
use crate::geometry::{DissolveResult, GeometryEngine, ShapeSource, UnassignedResult, UnitProperties};
use crate::remote::{self, RemoteStore};
use crate::spatial::{SpatialEntry, SpatialIndex, dedup_first_seen};
use crate::temporal::TemporalController;
use crate::worker::{GeometryClient, GeometryOp};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters describing the session, cheap to compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub source_table: String,
    pub assigned: usize,
    pub shattered: usize,
    pub indexed_entries: usize,
    pub known_units: usize,
    pub locked_zones: Vec<ZoneId>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub history_paused: bool,
}

pub struct QueryFacade {
    source_table: String,
    index: SpatialIndex,
    store: AssignmentStore,
    history: TemporalController<HistoryStep>,
    catalog: UnitCatalog,
    child_layer: Option<Arc<ChildLayer>>,
    geometry: GeometryClient,
    remote: Option<Arc<dyn RemoteStore>>,
    remote_timeout: Duration,
    captive: Option<HashSet<UnitId>>,
}

impl QueryFacade {
    /// Starts a session over `source_table`. Spawns the geometry worker.
    pub fn new(
        source_table: impl Into<String>,
        child_layer: Option<&ChildLayerSpec>,
    ) -> std::io::Result<Self> {
        let child_layer = child_layer.map(|spec| Arc::new(ChildLayer::from_spec(spec)));
        let source_table = source_table.into();
        info!(
            %source_table,
            parents = child_layer.as_ref().map_or(0, |l| l.parent_count()),
            "starting plan session"
        );
        Ok(Self {
            source_table,
            index: SpatialIndex::new(),
            store: AssignmentStore::new(child_layer.clone()),
            history: TemporalController::new(),
            catalog: UnitCatalog::default(),
            child_layer,
            geometry: GeometryClient::spawn(GeometryEngine::new())?,
            remote: None,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            captive: None,
        })
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        self.remote = Some(remote);
        self.remote_timeout = timeout;
        self
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn store(&self) -> &AssignmentStore {
        &self.store
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// A handle for geometry queries that can outlive a borrow of the facade.
    pub fn geometry(&self) -> GeometryClient {
        self.geometry.clone()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            source_table: self.source_table.clone(),
            assigned: self.store.assignments().len(),
            shattered: self.store.shattered_parents().len(),
            indexed_entries: self.index.len(),
            known_units: self.catalog.len(),
            locked_zones: self.store.locked_zones().iter().copied().collect(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            history_paused: self.history.is_paused(),
        }
    }

    /// Whether a unit takes part in painting, indexing and dissolving now.
    fn is_live(&self, unit_id: &str, layer: UnitLayer) -> bool {
        if layer == UnitLayer::Child && !self.store.is_active_child(unit_id) {
            return false;
        }
        self.store.is_active(unit_id)
    }

    /// Whether a unit's declared parent matches the child layer. Units that
    /// declare none are taken as they are.
    fn parent_agrees(&self, unit: &UnitFeature) -> bool {
        let Some(declared) = &unit.parent else {
            return true;
        };
        let known = self.child_layer.as_deref().and_then(|l| l.parent(&unit.id));
        known == Some(declared)
    }

    /// Ingests one tile. Returns the number of index entries added; a tile
    /// seen before adds nothing. Units whose declared parent contradicts the
    /// child layer are dropped.
    pub fn load_tile(&mut self, tile: TilePayload) -> usize {
        if self.index.has_tile(&tile.key) {
            debug!(tile = %tile.key, "tile already loaded");
            return 0;
        }
        let (units, rejected): (Vec<UnitFeature>, Vec<UnitFeature>) = tile
            .units
            .into_iter()
            .partition(|unit| self.parent_agrees(unit));
        for unit in &rejected {
            warn!(
                tile = %tile.key,
                unit = %unit.id,
                declared = ?unit.parent,
                "unit parent disagrees with child layer, skipping"
            );
        }

        let mut entries = Vec::new();
        for unit in &units {
            self.catalog.record(unit);
            if self.is_live(&unit.id, unit.layer) {
                entries.extend(
                    unit.bboxes
                        .iter()
                        .filter(|b| b.is_finite())
                        .map(|b| SpatialEntry::new(unit.id.clone(), *b)),
                );
            }
        }
        let added = entries.len();
        self.index.load(&tile.key, entries);

        for unit in units {
            self.send_unit_geometry(unit);
        }
        debug!(tile = %tile.key, added, "loaded tile");
        added
    }

    fn send_unit_geometry(&self, unit: UnitFeature) {
        let properties = UnitProperties {
            zone: self.store.zone_of(&unit.id),
            dormant: !self.is_live(&unit.id, unit.layer),
            extra: serde_json::Map::new(),
        };
        let source = match unit.geometry {
            Some(geometry) => ShapeSource::GeoJson(geometry),
            None => ShapeSource::Boxes(unit.bboxes),
        };
        self.geometry.send(GeometryOp::LoadUnitGeometry {
            unit_id: unit.id,
            source,
            properties,
        });
    }

    /// Assigns `zone` to every eligible unit under `bbox`.
    pub fn paint(&mut self, bbox: BBox, zone: Option<ZoneId>) -> AssignmentDelta {
        let candidates = dedup_first_seen(self.index.query_bbox(&bbox));
        let delta = self
            .store
            .assign_within(&candidates, zone, self.captive.as_ref());
        if delta.is_empty() {
            return delta;
        }
        for change in &delta.changes {
            self.geometry.send(GeometryOp::UpdateZoneProperty {
                unit_id: change.unit_id.clone(),
                zone: change.new,
            });
        }
        self.history.record(HistoryStep::Assign(delta.clone()));
        delta
    }

    pub fn erase(&mut self, bbox: BBox) -> AssignmentDelta {
        self.paint(bbox, None)
    }

    pub fn begin_stroke(&mut self) {
        self.history.begin_stroke();
    }

    pub fn end_stroke(&mut self) -> bool {
        self.history.end_stroke()
    }

    pub fn shatter(&mut self, parent: &str) -> Result<ShatterDelta, ZoneError> {
        self.history.end_stroke();
        let delta = self.store.shatter(parent)?;
        self.sync(delta.effects());
        self.history.record(HistoryStep::Shatter(delta.clone()));
        Ok(delta)
    }

    pub fn heal(&mut self, parent: &str) -> Result<HealResult, ZoneError> {
        self.history.end_stroke();
        let result = self.store.heal(parent)?;
        self.sync(result.effects());
        self.history.record(HistoryStep::Heal(result.clone()));
        Ok(result)
    }

    /// Reverts the newest history entry. Returns `false` when there is none.
    pub fn undo(&mut self) -> bool {
        let Some(steps) = self.history.undo().map(<[HistoryStep]>::to_vec) else {
            return false;
        };
        let effects: Vec<StoreEffect> = steps
            .iter()
            .rev()
            .flat_map(|step| self.store.revert(step))
            .collect();
        self.sync(effects);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(steps) = self.history.redo().map(<[HistoryStep]>::to_vec) else {
            return false;
        };
        let effects: Vec<StoreEffect> = steps
            .iter()
            .flat_map(|step| self.store.reapply(step))
            .collect();
        self.sync(effects);
        true
    }

    pub fn export_assignments(&self) -> PlanDocument {
        self.store.export(&self.source_table)
    }

    /// Replaces all assignments with the document's. The whole document is
    /// validated first; on error nothing changes.
    pub fn load_assignments(&mut self, json: &str) -> Result<usize, ZoneError> {
        let doc = PlanDocument::from_json(json).map_err(ZoneError::MalformedImport)?;
        if doc.source_table != self.source_table {
            return Err(ZoneError::MalformedImport(format!(
                "document is for {:?}, session is for {:?}",
                doc.source_table, self.source_table
            )));
        }
        self.history.end_stroke();
        let before = self.store.import(&doc)?;
        self.replace_recorded(before);
        Ok(doc.assigned_count())
    }

    /// Clears every assignment and shatter. Undoable.
    pub fn reset(&mut self) {
        self.history.end_stroke();
        let before = self.store.reset();
        self.replace_recorded(before);
    }

    fn replace_recorded(&mut self, before: AssignmentSnapshot) {
        let after = self.store.snapshot();
        self.sync(vec![StoreEffect::Replaced]);
        self.history.record(HistoryStep::Replace {
            before: Box::new(before),
            after: Box::new(after),
        });
    }

    pub fn lock_zones(&mut self, zones: &[ZoneId]) {
        self.store.lock_zones(zones);
    }

    pub fn unlock_zones(&mut self, zones: &[ZoneId]) {
        self.store.unlock_zones(zones);
    }

    /// Hidden sessions do not record history.
    pub fn set_visible(&mut self, visible: bool) {
        if visible {
            self.history.resume();
        } else {
            self.history.pause();
        }
    }

    /// Restricts painting to `ids`; `None` lifts the restriction.
    pub fn set_captive(&mut self, ids: Option<Vec<UnitId>>) {
        self.captive = ids.map(|ids| ids.into_iter().collect());
    }

    /// Pushes store changes to the index and the geometry worker.
    fn sync(&mut self, effects: Vec<StoreEffect>) {
        for effect in effects {
            match effect {
                StoreEffect::Zones(ids) => {
                    for id in ids {
                        self.send_zone(&id);
                    }
                }
                StoreEffect::Shattered { parent, children } => {
                    self.swap_units(&parent, &children, true);
                }
                StoreEffect::Healed { parent, children } => {
                    self.swap_units(&parent, &children, false);
                }
                StoreEffect::Replaced => self.resync_all(),
            }
        }
    }

    fn send_zone(&self, unit_id: &str) {
        self.geometry.send(GeometryOp::UpdateZoneProperty {
            unit_id: unit_id.to_string(),
            zone: self.store.zone_of(unit_id),
        });
    }

    /// Replaces a parent by its children in the index and in geometry, or
    /// the reverse.
    fn swap_units(&mut self, parent: &str, children: &[UnitId], shattered: bool) {
        if shattered {
            self.index.remove_unit(parent);
            for child in children {
                self.index.insert_unit(child, self.catalog.bboxes(child));
            }
        } else {
            for child in children {
                self.index.remove_unit(child);
            }
            self.index.insert_unit(parent, self.catalog.bboxes(parent));
        }
        self.geometry.send(GeometryOp::SetDormant {
            unit_ids: vec![parent.to_string()],
            dormant: shattered,
        });
        self.geometry.send(GeometryOp::SetDormant {
            unit_ids: children.to_vec(),
            dormant: !shattered,
        });
        self.send_zone(parent);
        for child in children {
            self.send_zone(child);
        }
    }

    /// Brings index and geometry in line with the store after a wholesale
    /// replacement.
    fn resync_all(&mut self) {
        let mut live = Vec::new();
        let mut dormant = Vec::new();
        for (id, entry) in self.catalog.iter() {
            if self.is_live(id, entry.layer) {
                live.push(id.clone());
            } else {
                dormant.push(id.clone());
            }
        }
        for id in &dormant {
            self.index.remove_unit(id);
        }
        for id in &live {
            if !self.index.contains_unit(id) {
                self.index.insert_unit(id, self.catalog.bboxes(id));
            }
        }
        for id in live.iter().chain(&dormant) {
            self.send_zone(id);
        }
        debug!(live = live.len(), dormant = dormant.len(), "resynchronised after replace");
        self.geometry.send(GeometryOp::SetDormant {
            unit_ids: live,
            dormant: false,
        });
        self.geometry.send(GeometryOp::SetDormant {
            unit_ids: dormant,
            dormant: true,
        });
    }

    /// Active children no loaded tile has described yet.
    pub fn missing_children(&self) -> Vec<UnitId> {
        self.store
            .active_children()
            .iter()
            .filter(|id| self.catalog.get(id).is_none_or(|e| !e.has_geometry))
            .cloned()
            .collect()
    }

    /// The remote fetch for missing active children, if there is a remote
    /// store and anything is missing.
    pub fn child_fetch(&self) -> Option<ChildFetch> {
        let remote = self.remote.clone()?;
        let missing = self.missing_children();
        if missing.is_empty() {
            return None;
        }
        Some(ChildFetch {
            remote,
            missing,
            timeout: self.remote_timeout,
        })
    }

    /// Ingests units fetched by a [`ChildFetch`] like a tile. Returns how
    /// many arrived.
    pub fn ingest_remote_units(&mut self, units: Vec<UnitFeature>) -> usize {
        let count = units.len();
        if count > 0 {
            let mut ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
            ids.sort_unstable();
            let key = format!("remote:{}", ids.join(","));
            self.load_tile(TilePayload { key, units });
        }
        count
    }

    /// Fetches missing active children from the remote store and ingests
    /// them. Returns how many units arrived.
    pub async fn hydrate_missing_children(&mut self) -> usize {
        match self.child_fetch() {
            Some(fetch) => {
                let units = fetch.run().await;
                self.ingest_remote_units(units)
            }
            None => 0,
        }
    }

    pub async fn dissolve(&self) -> Result<DissolveResult, GeometryError> {
        self.geometry.dissolve(None).await
    }

    pub async fn centroids_in_view(&self, bbox: BBox) -> Result<DissolveResult, GeometryError> {
        self.geometry.centroids_in_view(bbox).await
    }

    /// Unassigned area. Computed locally unless some active child has no
    /// geometry here, in which case the remote store answers.
    pub async fn unassigned(
        &self,
        exclude_ids: Vec<UnitId>,
    ) -> Result<UnassignedResult, GeometryError> {
        self.unassigned_query(exclude_ids).run().await
    }

    /// Captures what [`QueryFacade::unassigned`] needs so it can run after
    /// the caller has let go of the facade.
    pub fn unassigned_query(&self, exclude_ids: Vec<UnitId>) -> UnassignedQuery {
        if let Some(remote) = &self.remote {
            let missing = self.missing_children();
            if !missing.is_empty() {
                warn!(missing = missing.len(), "child geometry incomplete, asking remote store");
                return UnassignedQuery::Remote {
                    remote: Arc::clone(remote),
                    plan: self.export_assignments(),
                    timeout: self.remote_timeout,
                };
            }
        }
        UnassignedQuery::Local {
            geometry: self.geometry.clone(),
            exclude_ids,
        }
    }
}

/// A pending unassigned-area lookup, detached from its facade.
pub enum UnassignedQuery {
    Local {
        geometry: GeometryClient,
        exclude_ids: Vec<UnitId>,
    },
    /// `exclude_ids` is not forwarded; the remote contract has no such field.
    Remote {
        remote: Arc<dyn RemoteStore>,
        plan: PlanDocument,
        timeout: Duration,
    },
}

impl UnassignedQuery {
    pub async fn run(self) -> Result<UnassignedResult, GeometryError> {
        match self {
            UnassignedQuery::Local {
                geometry,
                exclude_ids,
            } => geometry.unassigned(exclude_ids).await,
            UnassignedQuery::Remote {
                remote,
                plan,
                timeout,
            } => Ok(remote::unassigned_with_timeout(remote.as_ref(), &plan, timeout).await),
        }
    }
}

/// Remote lookup of child units the session has no geometry for.
pub struct ChildFetch {
    remote: Arc<dyn RemoteStore>,
    missing: Vec<UnitId>,
    timeout: Duration,
}

impl ChildFetch {
    pub fn missing(&self) -> &[UnitId] {
        &self.missing
    }

    /// Failures and timeouts yield no units.
    pub async fn run(self) -> Vec<UnitFeature> {
        remote::units_with_timeout(self.remote.as_ref(), &self.missing, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use geo::Area;
    use zonemap_shared::{BBox, ChildLayerSpec, TilePayload, UnitFeature, UnitLayer};

    use super::QueryFacade;
    use crate::error::ZoneError;
    use crate::remote::tests::{CannedStore, square_collection};

    fn unit(id: &str, layer: UnitLayer, min: [f64; 2], max: [f64; 2]) -> UnitFeature {
        UnitFeature {
            id: id.to_string(),
            layer,
            parent: None,
            bboxes: vec![BBox::new(min, max)],
            geometry: None,
        }
    }

    fn tile(key: &str, units: Vec<UnitFeature>) -> TilePayload {
        TilePayload {
            key: key.to_string(),
            units,
        }
    }

    /// Brush box strictly inside the unit square at (x, y).
    fn inside(x: f64, y: f64) -> BBox {
        BBox::new([x + 0.2, y + 0.2], [x + 0.8, y + 0.8])
    }

    fn four_unit_plan() -> QueryFacade {
        let mut facade = QueryFacade::new("blocks", None).expect("facade");
        facade.load_tile(tile(
            "0/0/0",
            vec![
                unit("A", UnitLayer::Parent, [0.0, 0.0], [1.0, 1.0]),
                unit("B", UnitLayer::Parent, [1.0, 0.0], [2.0, 1.0]),
                unit("C", UnitLayer::Parent, [5.0, 0.0], [6.0, 1.0]),
                unit("D", UnitLayer::Parent, [0.0, 3.0], [1.0, 4.0]),
            ],
        ));
        facade.paint(BBox::new([0.2, 0.2], [1.8, 0.8]), Some(1));
        facade.paint(inside(5.0, 0.0), Some(2));
        facade
    }

    fn shatter_plan() -> QueryFacade {
        let mut children = BTreeMap::new();
        children.insert("p".to_string(), vec!["p/1".to_string(), "p/2".to_string()]);
        let spec = ChildLayerSpec { children };
        let mut facade = QueryFacade::new("blocks", Some(&spec)).expect("facade");
        facade.load_tile(tile(
            "0/0/0",
            vec![
                unit("p", UnitLayer::Parent, [0.0, 0.0], [2.0, 1.0]),
                unit("p/1", UnitLayer::Child, [0.0, 0.0], [1.0, 1.0]),
                unit("p/2", UnitLayer::Child, [1.0, 0.0], [2.0, 1.0]),
            ],
        ));
        facade
    }

    #[tokio::test]
    async fn adjacent_units_dissolve_into_one_outline() {
        let facade = four_unit_plan();
        let result = facade.dissolve().await.expect("dissolve");

        assert_eq!(result.zones.len(), 2);
        let one = result.outline(1).expect("zone 1");
        assert_eq!(one.outline.0.len(), 1);
        assert!((one.outline.unsigned_area() - 2.0).abs() < 1e-9);
        assert!(result.outline(2).is_some());
    }

    #[tokio::test]
    async fn unassigned_area_is_the_unpainted_unit() {
        let facade = four_unit_plan();
        let result = facade.unassigned(Vec::new()).await.expect("unassigned");
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.overall_bbox, Some(BBox::new([0.0, 3.0], [1.0, 4.0])));
    }

    #[tokio::test]
    async fn fifty_strokes_undo_back_to_empty() {
        let mut facade = QueryFacade::new("blocks", None).expect("facade");
        let units = (0..50)
            .map(|i| {
                let x = f64::from(i);
                unit(&format!("u{i}"), UnitLayer::Parent, [x, 0.0], [x + 1.0, 1.0])
            })
            .collect();
        facade.load_tile(tile("row", units));
        let before = facade.store().snapshot();

        for i in 0..50u32 {
            facade.begin_stroke();
            facade.paint(inside(f64::from(i), 0.0), Some(i % 3 + 1));
            facade.paint(inside(f64::from((i + 1) % 50), 0.0), Some(i % 3 + 1));
            assert!(facade.end_stroke());
        }
        assert!(!facade.store().assignments().is_empty());

        for _ in 0..50 {
            assert!(facade.undo());
        }
        assert!(!facade.undo());
        assert_eq!(facade.store().snapshot(), before);

        let dissolved = facade.dissolve().await.expect("dissolve");
        assert!(dissolved.zones.is_empty());
    }

    #[tokio::test]
    async fn shatter_swaps_index_entries_and_geometry() {
        let mut facade = shatter_plan();
        assert_eq!(facade.index().len(), 1);
        facade.paint(inside(0.0, 0.0), Some(1));
        assert_eq!(facade.store().zone_of("p"), Some(1));

        facade.shatter("p").expect("shatter");
        assert_eq!(facade.index().len(), 2);
        assert!(!facade.index().contains_unit("p"));

        let delta = facade.paint(inside(0.0, 0.0), Some(2));
        assert_eq!(delta.unit_ids(), vec!["p/1".to_string()]);
        let result = facade.dissolve().await.expect("dissolve");
        assert!((result.outline(1).expect("zone 1").outline.unsigned_area() - 1.0).abs() < 1e-9);
        assert!((result.outline(2).expect("zone 2").outline.unsigned_area() - 1.0).abs() < 1e-9);

        assert!(matches!(facade.heal("p"), Err(ZoneError::Heterogeneous { .. })));
        assert!(facade.undo());
        let healed = facade.heal("p").expect("heal");
        assert_eq!(healed.zone, Some(1));
        assert_eq!(facade.index().len(), 1);

        let result = facade.dissolve().await.expect("dissolve");
        let one = result.outline(1).expect("zone 1");
        assert_eq!(one.unit_count, 1);
        assert!((one.outline.unsigned_area() - 2.0).abs() < 1e-9);
        facade.store().check_invariants().expect("invariants hold");
    }

    #[tokio::test]
    async fn undoing_a_shatter_restores_the_parent() {
        let mut facade = shatter_plan();
        facade.paint(inside(1.0, 0.0), Some(4));
        let before = facade.store().snapshot();

        facade.shatter("p").expect("shatter");
        assert!(facade.undo());
        assert_eq!(facade.store().snapshot(), before);
        assert!(facade.index().contains_unit("p"));

        assert!(facade.redo());
        assert!(facade.store().is_shattered("p"));
        assert!(facade.index().contains_unit("p/2"));
        assert_eq!(facade.store().zone_of("p/2"), Some(4));
    }

    #[tokio::test]
    async fn shatter_closes_the_open_stroke() {
        let mut facade = shatter_plan();
        facade.begin_stroke();
        facade.paint(inside(0.0, 0.0), Some(1));
        facade.shatter("p").expect("shatter");
        facade.paint(inside(0.0, 0.0), Some(2));

        // Stroke, shatter and the later paint are three separate entries.
        assert!(facade.undo());
        assert_eq!(facade.store().zone_of("p/1"), Some(1));
        assert!(facade.undo());
        assert_eq!(facade.store().zone_of("p"), Some(1));
        assert!(facade.undo());
        assert!(facade.store().assignments().is_empty());
    }

    #[tokio::test]
    async fn import_export_round_trip_through_the_facade() {
        let mut facade = shatter_plan();
        facade.shatter("p").expect("shatter");
        facade.paint(inside(1.0, 0.0), Some(3));
        let exported = facade.export_assignments();
        let json = serde_json::to_string(&exported).expect("json");

        let mut other = shatter_plan();
        assert_eq!(other.load_assignments(&json), Ok(1));
        assert_eq!(other.export_assignments(), exported);
        assert!(other.index().contains_unit("p/1"));
        assert!(!other.index().contains_unit("p"));

        let result = other.dissolve().await.expect("dissolve");
        assert_eq!(result.outline(3).map(|z| z.unit_count), Some(1));

        assert!(other.undo());
        assert!(other.store().assignments().is_empty());
        assert!(other.index().contains_unit("p"));
    }

    #[tokio::test]
    async fn bad_imports_change_nothing() {
        let mut facade = four_unit_plan();
        let before = facade.export_assignments();

        let wrong_table = r#"{"source_table": "parcels", "zones": [{"geo_id": "A", "zone": 1}]}"#;
        let broken = r#"{"source_table": "blocks", "zones": [{"geo_id": "A", "zone": 0}]}"#;
        for json in [wrong_table, broken, "not json"] {
            assert!(matches!(
                facade.load_assignments(json),
                Err(ZoneError::MalformedImport(_))
            ));
        }
        assert_eq!(facade.export_assignments(), before);
    }

    #[tokio::test]
    async fn locks_and_captive_ids_filter_paint() {
        let mut facade = four_unit_plan();
        facade.lock_zones(&[1]);
        let delta = facade.paint(BBox::new([0.0, 0.0], [6.0, 4.0]), Some(3));
        let mut painted = delta.unit_ids();
        painted.sort();
        assert_eq!(painted, vec!["C".to_string(), "D".to_string()]);
        assert_eq!(delta.skipped, 2);
        assert_eq!(facade.store().zone_of("A"), Some(1));
        assert_eq!(facade.store().zone_of("C"), Some(3));
        assert_eq!(facade.store().zone_of("D"), Some(3));

        facade.unlock_zones(&[1]);
        facade.set_captive(Some(vec!["A".to_string()]));
        let delta = facade.paint(BBox::new([0.0, 0.0], [6.0, 4.0]), Some(5));
        assert_eq!(delta.unit_ids(), vec!["A".to_string()]);
        facade.set_captive(None);
    }

    #[tokio::test]
    async fn hidden_session_records_no_history() {
        let mut facade = four_unit_plan();
        while facade.undo() {}
        facade.set_visible(false);
        facade.paint(inside(0.0, 3.0), Some(7));
        assert!(!facade.summary().can_undo);
        facade.set_visible(true);
        facade.paint(inside(0.0, 3.0), Some(8));
        assert!(facade.undo());
        assert_eq!(facade.store().zone_of("D"), Some(7));
    }

    #[tokio::test]
    async fn hiding_mid_stroke_keeps_painted_steps_undoable() {
        let mut facade = four_unit_plan();
        while facade.undo() {}
        facade.begin_stroke();
        facade.paint(inside(0.0, 3.0), Some(1));
        facade.set_visible(false);
        facade.set_visible(true);
        assert!(!facade.end_stroke());

        assert!(facade.undo());
        assert_eq!(facade.store().zone_of("D"), None);
        assert!(facade.redo());
        assert_eq!(facade.store().zone_of("D"), Some(1));
    }

    #[tokio::test]
    async fn reset_is_undoable() {
        let mut facade = four_unit_plan();
        let before = facade.store().snapshot();
        facade.reset();
        assert!(facade.store().assignments().is_empty());
        assert!(facade.dissolve().await.expect("dissolve").zones.is_empty());
        assert!(facade.undo());
        assert_eq!(facade.store().snapshot(), before);
    }

    #[tokio::test]
    async fn repeated_tile_is_ignored() {
        let mut facade = four_unit_plan();
        let again = tile("0/0/0", vec![unit("A", UnitLayer::Parent, [0.0, 0.0], [1.0, 1.0])]);
        assert_eq!(facade.load_tile(again), 0);
        assert_eq!(facade.index().len(), 4);
    }

    #[tokio::test]
    async fn missing_children_fall_back_to_remote_store() {
        let mut children = BTreeMap::new();
        children.insert("p".to_string(), vec!["p/1".to_string(), "p/2".to_string()]);
        let spec = ChildLayerSpec { children };
        let remote = CannedStore {
            units: vec![unit("p/1", UnitLayer::Child, [0.0, 0.0], [1.0, 1.0])],
            regions: square_collection(),
            delay: Duration::ZERO,
        };
        let mut facade = QueryFacade::new("blocks", Some(&spec))
            .expect("facade")
            .with_remote(Arc::new(remote), Duration::from_secs(1));
        facade.load_tile(tile(
            "0/0/0",
            vec![unit("p", UnitLayer::Parent, [0.0, 0.0], [2.0, 1.0])],
        ));
        facade.shatter("p").expect("shatter");
        assert_eq!(facade.missing_children().len(), 2);

        let result = facade.unassigned(Vec::new()).await.expect("unassigned");
        assert_eq!(result.regions.len(), 2);

        assert_eq!(facade.hydrate_missing_children().await, 1);
        assert_eq!(facade.missing_children(), vec!["p/2".to_string()]);
        assert!(facade.index().contains_unit("p/1"));
    }

    #[tokio::test]
    async fn detached_lookups_run_without_the_facade() {
        let mut children = BTreeMap::new();
        children.insert("p".to_string(), vec!["p/1".to_string(), "p/2".to_string()]);
        let spec = ChildLayerSpec { children };
        let remote = CannedStore {
            units: vec![unit("p/1", UnitLayer::Child, [0.0, 0.0], [1.0, 1.0])],
            regions: square_collection(),
            delay: Duration::ZERO,
        };
        let mut facade = QueryFacade::new("blocks", Some(&spec))
            .expect("facade")
            .with_remote(Arc::new(remote), Duration::from_secs(1));
        facade.load_tile(tile(
            "0/0/0",
            vec![unit("p", UnitLayer::Parent, [0.0, 0.0], [2.0, 1.0])],
        ));
        facade.shatter("p").expect("shatter");

        let query = facade.unassigned_query(Vec::new());
        let fetch = facade.child_fetch().expect("children are missing");
        assert_eq!(fetch.missing(), ["p/1".to_string(), "p/2".to_string()]);

        // The facade stays usable while both lookups are in flight.
        facade.paint(inside(5.0, 5.0), Some(1));
        let (regions, units) = tokio::join!(query.run(), fetch.run());
        assert_eq!(regions.expect("unassigned").regions.len(), 2);
        assert_eq!(facade.ingest_remote_units(units), 1);
        assert!(facade.index().contains_unit("p/1"));
    }

    #[tokio::test]
    async fn contradicting_parent_is_dropped_from_the_tile() {
        let mut children = BTreeMap::new();
        children.insert("p".to_string(), vec!["p/1".to_string(), "p/2".to_string()]);
        let spec = ChildLayerSpec { children };
        let mut facade = QueryFacade::new("blocks", Some(&spec)).expect("facade");

        let mut first = unit("p/1", UnitLayer::Child, [0.0, 0.0], [1.0, 1.0]);
        first.parent = Some("p".to_string());
        let mut second = unit("p/2", UnitLayer::Child, [1.0, 0.0], [2.0, 1.0]);
        second.parent = Some("q".to_string());
        facade.load_tile(tile(
            "0/0/0",
            vec![unit("p", UnitLayer::Parent, [0.0, 0.0], [2.0, 1.0]), first, second],
        ));

        facade.shatter("p").expect("shatter");
        assert_eq!(facade.missing_children(), vec!["p/2".to_string()]);
        assert!(facade.index().contains_unit("p/1"));
        assert!(!facade.index().contains_unit("p/2"));
    }
}
