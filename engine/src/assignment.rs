use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};
use zonemap_shared::{PlanDocument, UnitId, ZoneId, ZoneRecord};

use crate::catalog::ChildLayer;
use crate::eligibility::{self, EligibilityContext, Ineligible};
use crate::error::ZoneError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneChange {
    pub unit_id: UnitId,
    pub old: Option<ZoneId>,
    pub new: Option<ZoneId>,
}

/// Units whose zone actually changed during one `assign` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentDelta {
    pub changes: Vec<ZoneChange>,
    /// Ids refused by an eligibility rule (locked, shattered parent, ...).
    pub skipped: usize,
}

impl AssignmentDelta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn unit_ids(&self) -> Vec<UnitId> {
        self.changes.iter().map(|c| c.unit_id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShatterDelta {
    pub parent: UnitId,
    pub old_zone: Option<ZoneId>,
    pub children: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealResult {
    pub parent: UnitId,
    pub zone: Option<ZoneId>,
    pub children: Vec<UnitId>,
}

/// Full copy of the assignment and shatter state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentSnapshot {
    pub zones: BTreeMap<UnitId, ZoneId>,
    pub parents: BTreeSet<UnitId>,
    pub children: BTreeSet<UnitId>,
}

/// One undoable mutation of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryStep {
    Assign(AssignmentDelta),
    Shatter(ShatterDelta),
    Heal(HealResult),
    Replace {
        before: Box<AssignmentSnapshot>,
        after: Box<AssignmentSnapshot>,
    },
}

/// What other components must resynchronise after a store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEffect {
    Zones(Vec<UnitId>),
    Shattered { parent: UnitId, children: Vec<UnitId> },
    Healed { parent: UnitId, children: Vec<UnitId> },
    Replaced,
}

impl ShatterDelta {
    pub fn effects(&self) -> Vec<StoreEffect> {
        vec![StoreEffect::Shattered {
            parent: self.parent.clone(),
            children: self.children.clone(),
        }]
    }
}

impl HealResult {
    pub fn effects(&self) -> Vec<StoreEffect> {
        vec![StoreEffect::Healed {
            parent: self.parent.clone(),
            children: self.children.clone(),
        }]
    }
}

/// Authoritative unit → zone mapping plus shatter state and zone locks.
pub struct AssignmentStore {
    zones: BTreeMap<UnitId, ZoneId>,
    parents: BTreeSet<UnitId>,
    children: BTreeSet<UnitId>,
    child_layer: Option<Arc<ChildLayer>>,
    locked_zones: BTreeSet<ZoneId>,
    locked_units: HashSet<UnitId>,
    locked_dirty: bool,
}

impl AssignmentStore {
    pub fn new(child_layer: Option<Arc<ChildLayer>>) -> Self {
        Self {
            zones: BTreeMap::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            child_layer,
            locked_zones: BTreeSet::new(),
            locked_units: HashSet::new(),
            locked_dirty: false,
        }
    }

    pub fn zone_of(&self, unit_id: &str) -> Option<ZoneId> {
        self.zones.get(unit_id).copied()
    }

    pub fn is_shattered(&self, unit_id: &str) -> bool {
        self.parents.contains(unit_id)
    }

    pub fn is_active_child(&self, unit_id: &str) -> bool {
        self.children.contains(unit_id)
    }

    pub fn shattered_parents(&self) -> &BTreeSet<UnitId> {
        &self.parents
    }

    pub fn active_children(&self) -> &BTreeSet<UnitId> {
        &self.children
    }

    pub fn assignments(&self) -> &BTreeMap<UnitId, ZoneId> {
        &self.zones
    }

    pub fn child_layer(&self) -> Option<&ChildLayer> {
        self.child_layer.as_deref()
    }

    /// Whether `unit_id` belongs to the active assignment domain.
    pub fn is_active(&self, unit_id: &str) -> bool {
        let empty = HashSet::new();
        eligibility::in_active_domain(&self.context(&empty, None), unit_id)
    }

    fn context<'a>(
        &'a self,
        locked_units: &'a HashSet<UnitId>,
        captive: Option<&'a HashSet<UnitId>>,
    ) -> EligibilityContext<'a> {
        EligibilityContext {
            locked_units,
            shattered_parents: &self.parents,
            active_children: &self.children,
            child_layer: self.child_layer.as_deref(),
            captive,
        }
    }

    pub fn assign(&mut self, unit_ids: &[UnitId], zone: Option<ZoneId>) -> AssignmentDelta {
        self.assign_within(unit_ids, zone, None)
    }

    /// Assigns `zone` to every eligible id, optionally restricted to a captive
    /// set. Ineligible ids are skipped silently.
    pub fn assign_within(
        &mut self,
        unit_ids: &[UnitId],
        zone: Option<ZoneId>,
        captive: Option<&HashSet<UnitId>>,
    ) -> AssignmentDelta {
        let zone = zone.filter(|z| *z > 0);
        self.refresh_locked();

        let mut eligible = Vec::with_capacity(unit_ids.len());
        let mut skipped = 0;
        {
            let ctx = self.context(&self.locked_units, captive);
            for id in unit_ids {
                match eligibility::check(&ctx, id) {
                    Ok(()) => eligible.push(id),
                    Err(reason) => {
                        trace!(unit_id = %id, ?reason, "skipping ineligible unit");
                        skipped += 1;
                    }
                }
            }
        }

        let mut changes = Vec::new();
        for id in eligible {
            let old = self.zone_of(id);
            if old == zone {
                continue;
            }
            self.write_zone(id, zone);
            changes.push(ZoneChange {
                unit_id: id.clone(),
                old,
                new: zone,
            });
        }
        AssignmentDelta { changes, skipped }
    }

    /// Replaces a parent by its children, moving the parent's zone onto each.
    pub fn shatter(&mut self, parent: &str) -> Result<ShatterDelta, ZoneError> {
        let layer = self.child_layer.clone().ok_or(ZoneError::NoChildLayer)?;
        if self.parents.contains(parent) {
            return Err(ZoneError::AlreadyShattered(parent.to_string()));
        }
        let children = layer
            .children(parent)
            .ok_or_else(|| ZoneError::UnknownParent(parent.to_string()))?
            .to_vec();

        let old_zone = self.write_zone(parent, None);
        self.parents.insert(parent.to_string());
        for child in &children {
            self.children.insert(child.clone());
            self.write_zone(child, old_zone);
        }
        debug!(%parent, children = children.len(), ?old_zone, "shattered unit");
        Ok(ShatterDelta {
            parent: parent.to_string(),
            old_zone,
            children,
        })
    }

    /// Inverse of [`AssignmentStore::shatter`]; refused while the children
    /// disagree on their zone.
    pub fn heal(&mut self, parent: &str) -> Result<HealResult, ZoneError> {
        if !self.parents.contains(parent) {
            return Err(ZoneError::NotShattered(parent.to_string()));
        }
        let children = self.children_of(parent);
        let zones: BTreeSet<Option<ZoneId>> =
            children.iter().map(|child| self.zone_of(child)).collect();
        if zones.len() > 1 {
            return Err(ZoneError::Heterogeneous {
                parent: parent.to_string(),
                zones: zones.into_iter().collect(),
            });
        }
        let zone = zones.into_iter().next().flatten();
        self.force_heal(parent, &children, zone);
        debug!(%parent, ?zone, "healed unit");
        Ok(HealResult {
            parent: parent.to_string(),
            zone,
            children,
        })
    }

    fn children_of(&self, parent: &str) -> Vec<UnitId> {
        self.child_layer
            .as_deref()
            .and_then(|layer| layer.children(parent))
            .map(<[UnitId]>::to_vec)
            .unwrap_or_default()
    }

    fn force_heal(&mut self, parent: &str, children: &[UnitId], zone: Option<ZoneId>) {
        for child in children {
            self.write_zone(child, None);
            self.children.remove(child);
        }
        self.parents.remove(parent);
        self.write_zone(parent, zone);
    }

    pub fn lock_zones(&mut self, zones: &[ZoneId]) {
        let before = self.locked_zones.len();
        self.locked_zones.extend(zones.iter().copied());
        if self.locked_zones.len() != before {
            self.locked_dirty = true;
        }
    }

    pub fn unlock_zones(&mut self, zones: &[ZoneId]) {
        let before = self.locked_zones.len();
        for zone in zones {
            self.locked_zones.remove(zone);
        }
        if self.locked_zones.len() != before {
            self.locked_dirty = true;
        }
    }

    pub fn locked_zones(&self) -> &BTreeSet<ZoneId> {
        &self.locked_zones
    }

    /// Current locked set, recomputed first if locks changed since last use.
    pub fn locked_units(&mut self) -> &HashSet<UnitId> {
        self.refresh_locked();
        &self.locked_units
    }

    fn refresh_locked(&mut self) {
        if !self.locked_dirty {
            return;
        }
        self.locked_units = if self.locked_zones.is_empty() {
            HashSet::new()
        } else {
            self.zones
                .iter()
                .filter(|(_, zone)| self.locked_zones.contains(*zone))
                .map(|(id, _)| id.clone())
                .collect()
        };
        self.locked_dirty = false;
        trace!(locked = self.locked_units.len(), "recomputed locked units");
    }

    /// Writes one unit's zone, keeping the locked set current.
    fn write_zone(&mut self, unit_id: &str, zone: Option<ZoneId>) -> Option<ZoneId> {
        let old = match zone {
            Some(zone) => self.zones.insert(unit_id.to_string(), zone),
            None => self.zones.remove(unit_id),
        };
        if !self.locked_dirty {
            self.locked_units.remove(unit_id);
            if zone.is_some_and(|z| self.locked_zones.contains(&z)) {
                self.locked_units.insert(unit_id.to_string());
            }
        }
        old
    }

    /// Drops every assignment and shatter. Zone locks are kept.
    pub fn reset(&mut self) -> AssignmentSnapshot {
        let before = self.snapshot();
        self.restore(AssignmentSnapshot::default());
        before
    }

    pub fn snapshot(&self) -> AssignmentSnapshot {
        AssignmentSnapshot {
            zones: self.zones.clone(),
            parents: self.parents.clone(),
            children: self.children.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: AssignmentSnapshot) {
        self.zones = snapshot.zones;
        self.parents = snapshot.parents;
        self.children = snapshot.children;
        self.locked_dirty = true;
    }

    /// Undoes one history step. Steps that no longer apply are skipped.
    pub fn revert(&mut self, step: &HistoryStep) -> Vec<StoreEffect> {
        match step {
            HistoryStep::Assign(delta) => {
                let ids = self.replay_zones(delta.changes.iter().rev().map(|c| (&c.unit_id, c.old)));
                vec![StoreEffect::Zones(ids)]
            }
            HistoryStep::Shatter(delta) => {
                if !self.parents.contains(&delta.parent) {
                    return Vec::new();
                }
                let children = self.children_of(&delta.parent);
                self.force_heal(&delta.parent, &children, delta.old_zone);
                vec![StoreEffect::Healed {
                    parent: delta.parent.clone(),
                    children,
                }]
            }
            HistoryStep::Heal(result) => match self.shatter(&result.parent) {
                Ok(delta) => delta.effects(),
                Err(_) => Vec::new(),
            },
            HistoryStep::Replace { before, .. } => {
                self.restore(before.as_ref().clone());
                vec![StoreEffect::Replaced]
            }
        }
    }

    /// Re-applies one history step after an undo.
    pub fn reapply(&mut self, step: &HistoryStep) -> Vec<StoreEffect> {
        match step {
            HistoryStep::Assign(delta) => {
                let ids = self.replay_zones(delta.changes.iter().map(|c| (&c.unit_id, c.new)));
                vec![StoreEffect::Zones(ids)]
            }
            HistoryStep::Shatter(delta) => match self.shatter(&delta.parent) {
                Ok(delta) => delta.effects(),
                Err(_) => Vec::new(),
            },
            HistoryStep::Heal(result) => {
                if !self.parents.contains(&result.parent) {
                    return Vec::new();
                }
                let children = self.children_of(&result.parent);
                self.force_heal(&result.parent, &children, result.zone);
                vec![StoreEffect::Healed {
                    parent: result.parent.clone(),
                    children,
                }]
            }
            HistoryStep::Replace { after, .. } => {
                self.restore(after.as_ref().clone());
                vec![StoreEffect::Replaced]
            }
        }
    }

    /// Writes recorded zones back, ignoring locks but never leaving the
    /// active domain.
    fn replay_zones<'a>(
        &mut self,
        writes: impl Iterator<Item = (&'a UnitId, Option<ZoneId>)>,
    ) -> Vec<UnitId> {
        let mut touched = Vec::new();
        for (id, zone) in writes {
            if !self.is_active(id) {
                continue;
            }
            self.write_zone(id, zone);
            touched.push(id.clone());
        }
        touched
    }

    /// Canonical export: one record per assigned unit and per active child,
    /// sorted by `geo_id`.
    pub fn export(&self, source_table: &str) -> PlanDocument {
        let layer = self.child_layer.as_deref();
        let parent_path = |id: &str| -> Option<UnitId> {
            if self.children.contains(id) {
                layer.and_then(|l| l.parent(id)).cloned()
            } else {
                None
            }
        };
        let mut zones: Vec<ZoneRecord> = self
            .zones
            .iter()
            .map(|(id, zone)| ZoneRecord {
                geo_id: id.clone(),
                zone: Some(*zone),
                parent_path: parent_path(id),
            })
            .collect();
        zones.extend(
            self.children
                .iter()
                .filter(|id| !self.zones.contains_key(*id))
                .map(|id| ZoneRecord {
                    geo_id: id.clone(),
                    zone: None,
                    parent_path: parent_path(id),
                }),
        );
        let mut doc = PlanDocument {
            source_table: source_table.to_string(),
            zones,
        };
        doc.normalize();
        doc
    }

    /// Builds the state a document describes without touching `self`.
    pub fn snapshot_from_document(
        &self,
        doc: &PlanDocument,
    ) -> Result<AssignmentSnapshot, ZoneError> {
        doc.validate().map_err(ZoneError::MalformedImport)?;
        let layer = self.child_layer.as_deref();
        let mut snapshot = AssignmentSnapshot::default();

        for record in &doc.zones {
            let known_parent = layer.and_then(|l| l.parent(&record.geo_id));
            let parent = match (&record.parent_path, known_parent) {
                (None, None) => None,
                (Some(claimed), Some(known)) if claimed == known => Some(known),
                (None, Some(known)) => Some(known),
                (Some(claimed), _) if layer.is_none() => {
                    return Err(ZoneError::MalformedImport(format!(
                        "{:?} claims parent {claimed:?} but the map has no child layer",
                        record.geo_id
                    )));
                }
                (Some(claimed), known) => {
                    return Err(ZoneError::MalformedImport(format!(
                        "{:?} claims parent {claimed:?}, child layer says {known:?}",
                        record.geo_id
                    )));
                }
            };
            if let Some(parent) = parent {
                snapshot.parents.insert(parent.clone());
            }
            if let Some(zone) = record.zone {
                snapshot.zones.insert(record.geo_id.clone(), zone);
            }
        }

        if let Some(layer) = layer {
            for parent in &snapshot.parents {
                if snapshot.zones.contains_key(parent) {
                    return Err(ZoneError::MalformedImport(format!(
                        "{parent:?} is assigned directly and through its children"
                    )));
                }
                if let Some(children) = layer.children(parent) {
                    snapshot.children.extend(children.iter().cloned());
                }
            }
        }
        Ok(snapshot)
    }

    /// Replaces the whole state with a document's. On error nothing changes.
    pub fn import(&mut self, doc: &PlanDocument) -> Result<AssignmentSnapshot, ZoneError> {
        let snapshot = self.snapshot_from_document(doc)?;
        let before = self.snapshot();
        self.restore(snapshot);
        Ok(before)
    }

    /// Verifies the exclusive-membership invariants; used by tests.
    pub fn check_invariants(&self) -> Result<(), String> {
        for parent in &self.parents {
            if self.zones.contains_key(parent) {
                return Err(format!("shattered parent {parent} carries a zone"));
            }
            if self.children.contains(parent) {
                return Err(format!("{parent} is both shattered parent and active child"));
            }
            for child in self.children_of(parent) {
                if !self.children.contains(&child) {
                    return Err(format!("child {child} of shattered {parent} is inactive"));
                }
            }
        }
        let layer = self.child_layer.as_deref();
        for child in &self.children {
            let parent = layer.and_then(|l| l.parent(child));
            if !parent.is_some_and(|p| self.parents.contains(p)) {
                return Err(format!("active child {child} has no shattered parent"));
            }
        }
        for id in self.zones.keys() {
            if layer.is_some_and(|l| l.is_child(id)) && !self.children.contains(id) {
                return Err(format!("dormant child {id} carries a zone"));
            }
        }
        Ok(())
    }

    /// Why `unit_id` would be refused by a paint gesture, if at all.
    pub fn ineligibility(&mut self, unit_id: &str) -> Option<Ineligible> {
        self.refresh_locked();
        eligibility::check(&self.context(&self.locked_units, None), unit_id).err()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;

    use zonemap_shared::{ChildLayerSpec, PlanDocument};

    use proptest::prelude::*;

    use super::{AssignmentStore, HistoryStep};
    use crate::catalog::ChildLayer;
    use crate::eligibility::Ineligible;
    use crate::error::ZoneError;
    use crate::temporal::TemporalController;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    fn store() -> AssignmentStore {
        let mut children = BTreeMap::new();
        children.insert("p".to_string(), ids(&["p/1", "p/2", "p/3"]));
        children.insert("q".to_string(), ids(&["q/1", "q/2"]));
        let layer = ChildLayer::from_spec(&ChildLayerSpec { children });
        AssignmentStore::new(Some(Arc::new(layer)))
    }

    #[test]
    fn assign_reports_only_real_changes() {
        let mut store = store();
        let delta = store.assign(&ids(&["a", "b"]), Some(1));
        assert_eq!(delta.changes.len(), 2);

        let delta = store.assign(&ids(&["a", "c"]), Some(1));
        assert_eq!(delta.unit_ids(), ids(&["c"]));
        assert_eq!(delta.changes[0].old, None);

        let delta = store.assign(&ids(&["a"]), None);
        assert_eq!(delta.changes[0].old, Some(1));
        assert_eq!(store.zone_of("a"), None);
    }

    #[test]
    fn zone_zero_means_unassigned() {
        let mut store = store();
        store.assign(&ids(&["a"]), Some(3));
        store.assign(&ids(&["a"]), Some(0));
        assert_eq!(store.zone_of("a"), None);
    }

    #[test]
    fn shatter_moves_parent_zone_to_children() {
        let mut store = store();
        store.assign(&ids(&["p"]), Some(4));
        let delta = store.shatter("p").expect("shatter p");

        assert_eq!(delta.old_zone, Some(4));
        assert_eq!(delta.children, ids(&["p/1", "p/2", "p/3"]));
        assert_eq!(store.zone_of("p"), None);
        assert_eq!(store.zone_of("p/2"), Some(4));
        assert!(store.is_shattered("p"));
        store.check_invariants().expect("invariants hold");

        assert_eq!(
            store.shatter("p"),
            Err(ZoneError::AlreadyShattered("p".to_string()))
        );
        assert_eq!(store.shatter("a"), Err(ZoneError::UnknownParent("a".to_string())));
    }

    #[test]
    fn shatter_without_child_layer_fails() {
        let mut store = AssignmentStore::new(None);
        assert_eq!(store.shatter("p"), Err(ZoneError::NoChildLayer));
        assert_eq!(store.heal("p"), Err(ZoneError::NotShattered("p".to_string())));
    }

    #[test]
    fn painting_a_shattered_parent_or_dormant_child_is_noop() {
        let mut store = store();
        store.shatter("p").expect("shatter p");
        let delta = store.assign(&ids(&["p", "q/1", "p/1"]), Some(2));
        assert_eq!(delta.unit_ids(), ids(&["p/1"]));
        assert_eq!(delta.skipped, 2);
        store.check_invariants().expect("invariants hold");
    }

    #[test]
    fn shatter_then_heal_round_trips() {
        let mut store = store();
        store.assign(&ids(&["p", "q", "x"]), Some(5));
        let before = store.snapshot();

        store.shatter("p").expect("shatter");
        let healed = store.heal("p").expect("heal");
        assert_eq!(healed.zone, Some(5));
        assert_eq!(store.snapshot(), before);

        let mut store = self::store();
        let before = store.snapshot();
        store.shatter("q").expect("shatter unassigned");
        assert_eq!(store.heal("q").expect("heal").zone, None);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn heterogeneous_heal_is_refused_without_mutation() {
        let mut store = store();
        store.shatter("p").expect("shatter");
        store.assign(&ids(&["p/1", "p/2"]), Some(1));
        store.assign(&ids(&["p/3"]), Some(2));
        let before = store.snapshot();

        match store.heal("p") {
            Err(ZoneError::Heterogeneous { parent, zones }) => {
                assert_eq!(parent, "p");
                assert_eq!(zones, vec![Some(1), Some(2)]);
            }
            other => panic!("expected heterogeneous heal, got {other:?}"),
        }
        assert_eq!(store.snapshot(), before);

        // Partially assigned children are heterogeneous too.
        store.assign(&ids(&["p/3"]), None);
        assert!(matches!(store.heal("p"), Err(ZoneError::Heterogeneous { .. })));
    }

    #[test]
    fn locked_zones_block_paint_after_batched_recompute() {
        let mut store = store();
        store.assign(&ids(&["a", "b"]), Some(1));
        store.assign(&ids(&["c"]), Some(2));
        store.lock_zones(&[1]);
        store.lock_zones(&[1, 3]);

        let delta = store.assign(&ids(&["a", "b", "c"]), Some(3));
        assert_eq!(delta.unit_ids(), ids(&["c"]));
        // c is now in locked zone 3 and is locked without a full recompute.
        assert_eq!(store.ineligibility("c"), Some(Ineligible::LockedUnit));
        assert_eq!(store.locked_units().len(), 3);

        store.unlock_zones(&[1, 3]);
        assert!(store.locked_units().is_empty());
        let delta = store.assign(&ids(&["a"]), Some(2));
        assert_eq!(delta.changes.len(), 1);
    }

    #[test]
    fn captive_restriction_is_orthogonal_to_locks() {
        let mut store = store();
        let captive: HashSet<String> = ids(&["a"]).into_iter().collect();
        let delta = store.assign_within(&ids(&["a", "b"]), Some(1), Some(&captive));
        assert_eq!(delta.unit_ids(), ids(&["a"]));
    }

    #[test]
    fn revert_and_reapply_steps() {
        let mut store = store();
        store.assign(&ids(&["p"]), Some(7));
        let start = store.snapshot();

        let shatter = HistoryStep::Shatter(store.shatter("p").expect("shatter"));
        let paint = HistoryStep::Assign(store.assign(&ids(&["p/1"]), Some(8)));
        let after = store.snapshot();

        store.revert(&paint);
        store.revert(&shatter);
        assert_eq!(store.snapshot(), start);

        store.reapply(&shatter);
        store.reapply(&paint);
        assert_eq!(store.snapshot(), after);
        store.check_invariants().expect("invariants hold");
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = store();
        store.assign(&ids(&["a"]), Some(1));
        store.shatter("p").expect("shatter");
        let before = store.reset();
        assert_eq!(before.zones.len(), 1);
        assert!(store.assignments().is_empty());
        assert!(store.shattered_parents().is_empty());
        assert!(store.active_children().is_empty());
    }

    #[test]
    fn export_load_export_is_idempotent() {
        let mut store = store();
        store.assign(&ids(&["b", "a"]), Some(2));
        store.shatter("p").expect("shatter");
        store.assign(&ids(&["p/2"]), Some(3));
        let first = store.export("blocks");

        let mut other = self::store();
        other.import(&first).expect("import export");
        let second = other.export("blocks");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
        // Unassigned active children survive the round trip.
        assert!(other.is_active_child("p/1"));
        assert_eq!(other.zone_of("p/1"), None);
        other.check_invariants().expect("invariants hold");
    }

    #[test]
    fn malformed_import_leaves_state_untouched() {
        let mut store = store();
        store.assign(&ids(&["a"]), Some(1));
        let before = store.snapshot();

        let cases = [
            r#"{"source_table": "t", "zones": [{"geo_id": "p/1", "zone": 1, "parent_path": "q"}]}"#,
            r#"{"source_table": "t", "zones": [{"geo_id": "x", "zone": 1, "parent_path": "p"}]}"#,
            r#"{"source_table": "t", "zones": [{"geo_id": "p", "zone": 1}, {"geo_id": "p/1", "zone": 2}]}"#,
        ];
        for json in cases {
            let doc: PlanDocument = serde_json::from_str(json).expect("parse");
            assert!(
                matches!(store.import(&doc), Err(ZoneError::MalformedImport(_))),
                "accepted {json}"
            );
            assert_eq!(store.snapshot(), before);
        }

        let mut flat = AssignmentStore::new(None);
        let doc: PlanDocument = serde_json::from_str(
            r#"{"source_table": "t", "zones": [{"geo_id": "c", "zone": 1, "parent_path": "p"}]}"#,
        )
        .expect("parse");
        assert!(matches!(flat.import(&doc), Err(ZoneError::MalformedImport(_))));
    }

    const UNITS: [&str; 9] = ["a", "b", "p", "q", "p/1", "p/2", "p/3", "q/1", "q/2"];
    const PARENTS: [&str; 2] = ["p", "q"];

    #[derive(Debug, Clone)]
    enum Op {
        Assign(Vec<usize>, u32),
        Shatter(usize),
        Heal(usize),
        Lock(u32),
        Unlock(u32),
        Undo,
        Redo,
        Reset,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (prop::collection::vec(0..UNITS.len(), 1..4), 0u32..4)
                .prop_map(|(units, zone)| Op::Assign(units, zone)),
            2 => (0..PARENTS.len()).prop_map(Op::Shatter),
            2 => (0..PARENTS.len()).prop_map(Op::Heal),
            1 => (1u32..4).prop_map(Op::Lock),
            1 => (1u32..4).prop_map(Op::Unlock),
            2 => Just(Op::Undo),
            2 => Just(Op::Redo),
            1 => Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn membership_stays_exclusive_under_random_edits(
            ops in prop::collection::vec(arb_op(), 1..60),
        ) {
            let mut store = store();
            let mut history: TemporalController<HistoryStep> = TemporalController::new();
            let empty = store.snapshot();

            for op in ops {
                match op {
                    Op::Assign(units, zone) => {
                        let targets: Vec<String> = units.iter().map(|&i| UNITS[i].to_string()).collect();
                        let delta = store.assign(&targets, Some(zone));
                        if !delta.is_empty() {
                            history.record(HistoryStep::Assign(delta));
                        }
                    }
                    Op::Shatter(i) => {
                        if let Ok(delta) = store.shatter(PARENTS[i]) {
                            history.record(HistoryStep::Shatter(delta));
                        }
                    }
                    Op::Heal(i) => {
                        if let Ok(result) = store.heal(PARENTS[i]) {
                            history.record(HistoryStep::Heal(result));
                        }
                    }
                    Op::Lock(zone) => store.lock_zones(&[zone]),
                    Op::Unlock(zone) => store.unlock_zones(&[zone]),
                    Op::Undo => {
                        if let Some(steps) = history.undo().map(<[HistoryStep]>::to_vec) {
                            for step in steps.iter().rev() {
                                store.revert(step);
                            }
                        }
                    }
                    Op::Redo => {
                        if let Some(steps) = history.redo().map(<[HistoryStep]>::to_vec) {
                            for step in &steps {
                                store.reapply(step);
                            }
                        }
                    }
                    Op::Reset => {
                        let before = store.reset();
                        let after = store.snapshot();
                        history.record(HistoryStep::Replace {
                            before: Box::new(before),
                            after: Box::new(after),
                        });
                    }
                }
                prop_assert_eq!(store.check_invariants(), Ok(()));
            }

            while let Some(steps) = history.undo().map(<[HistoryStep]>::to_vec) {
                for step in steps.iter().rev() {
                    store.revert(step);
                }
                prop_assert_eq!(store.check_invariants(), Ok(()));
            }
            prop_assert_eq!(store.snapshot(), empty);
        }
    }
}
