//! Unit geometry and everything derived from it: dissolved zone outlines,
//! label points and unassigned area.
//!
//! [`GeometryEngine`] is plain synchronous state. It is only ever owned by the
//! geometry worker thread (see [`crate::worker`]); callers reach it through
//! messages.

pub mod dissolve;
pub mod shape;

use std::collections::{BTreeMap, HashSet};

use geo::{MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use zonemap_shared::{BBox, UnitId, ZoneId, zone_color_hex};

use self::dissolve::{region_order, union_all, zone_label_point};
use self::shape::{bbox_polygon, clip_to_bbox, multi_bbox, polygon_bbox};

/// Where a unit's shape comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ShapeSource {
    /// Bounding boxes only; each becomes a rectangle.
    Boxes(Vec<BBox>),
    GeoJson(geojson::Geometry),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitProperties {
    #[serde(default)]
    pub zone: Option<ZoneId>,
    /// Dormant units (shattered parents, children of unshattered parents)
    /// keep their shape but take no part in any query.
    #[serde(default)]
    pub dormant: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
struct UnitGeometry {
    shape: MultiPolygon<f64>,
    extent: Option<BBox>,
    zone: Option<ZoneId>,
    dormant: bool,
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneOutline {
    pub zone: ZoneId,
    pub outline: MultiPolygon<f64>,
    /// Label point of the largest connected piece.
    pub centroid: Option<Point<f64>>,
    pub unit_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DissolveResult {
    /// One entry per zone with surviving geometry, ascending by zone.
    pub zones: Vec<ZoneOutline>,
}

impl DissolveResult {
    pub fn outline(&self, zone: ZoneId) -> Option<&ZoneOutline> {
        self.zones.iter().find(|z| z.zone == zone)
    }

    /// Zone outlines as GeoJSON, with `zone`, `fill` and `unit_count`
    /// properties.
    pub fn outlines_geojson(&self) -> geojson::FeatureCollection {
        let features = self
            .zones
            .iter()
            .map(|z| {
                zone_feature(
                    shape::to_geojson_multi(&z.outline),
                    z.zone,
                    Some(z.unit_count),
                )
            })
            .collect();
        collection(features)
    }

    /// Label points as GeoJSON, one point feature per zone.
    pub fn centroids_geojson(&self) -> geojson::FeatureCollection {
        let features = self
            .zones
            .iter()
            .filter_map(|z| {
                let point = z.centroid?;
                let geometry = geojson::Geometry::new(geojson::Value::from(&point));
                Some(zone_feature(geometry, z.zone, None))
            })
            .collect();
        collection(features)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnassignedResult {
    /// Connected unassigned regions, ascending min y then descending min x.
    pub regions: Vec<Polygon<f64>>,
    pub overall_bbox: Option<BBox>,
}

impl UnassignedResult {
    pub fn from_regions(mut regions: Vec<Polygon<f64>>) -> Self {
        regions.sort_by(region_order);
        let boxes: Vec<BBox> = regions.iter().filter_map(polygon_bbox).collect();
        Self {
            overall_bbox: BBox::union_all(&boxes),
            regions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn to_geojson(&self) -> geojson::FeatureCollection {
        let features = self
            .regions
            .iter()
            .map(|region| geojson::Feature {
                bbox: None,
                geometry: Some(shape::to_geojson_polygon(region)),
                id: None,
                properties: None,
                foreign_members: None,
            })
            .collect();
        let mut fc = collection(features);
        fc.bbox = self
            .overall_bbox
            .map(|b| vec![b.min_x(), b.min_y(), b.max_x(), b.max_y()]);
        fc
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryStats {
    pub units: usize,
    pub dormant: usize,
    pub assigned: usize,
}

fn zone_feature(
    geometry: geojson::Geometry,
    zone: ZoneId,
    unit_count: Option<usize>,
) -> geojson::Feature {
    let mut properties = serde_json::Map::new();
    properties.insert("zone".into(), zone.into());
    properties.insert("fill".into(), zone_color_hex(zone).into());
    if let Some(count) = unit_count {
        properties.insert("unit_count".into(), count.into());
    }
    geojson::Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<geojson::Feature>) -> geojson::FeatureCollection {
    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[derive(Debug, Default)]
pub struct GeometryEngine {
    units: BTreeMap<UnitId, UnitGeometry>,
}

impl GeometryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Adds geometry for a unit, unioned with whatever that unit already has.
    /// Returns `false` when the source held nothing polygonal.
    pub fn load_unit_geometry(
        &mut self,
        unit_id: &str,
        source: ShapeSource,
        properties: UnitProperties,
    ) -> bool {
        let polygons = match source {
            ShapeSource::Boxes(boxes) => boxes
                .iter()
                .filter(|b| b.is_finite() && b.area() > 0.0)
                .map(bbox_polygon)
                .collect(),
            ShapeSource::GeoJson(geometry) => match shape::from_geojson(geometry) {
                Ok(polygons) => polygons,
                Err(e) => {
                    warn!(%unit_id, error = %e, "dropping unreadable unit geometry");
                    Vec::new()
                }
            },
        };
        if polygons.is_empty() {
            trace!(%unit_id, "no polygonal geometry to load");
            return false;
        }

        let mut pieces: Vec<MultiPolygon<f64>> = polygons
            .into_iter()
            .map(|p| MultiPolygon::new(vec![p]))
            .collect();
        let previous = self.units.remove(unit_id);
        let mut extra = properties.extra;
        if let Some(previous) = previous {
            pieces.push(previous.shape);
            for (key, value) in previous.properties {
                extra.entry(key).or_insert(value);
            }
        }
        let shape = union_all(pieces);
        self.units.insert(
            unit_id.to_string(),
            UnitGeometry {
                extent: multi_bbox(&shape),
                shape,
                zone: properties.zone.filter(|z| *z > 0),
                dormant: properties.dormant,
                properties: extra,
            },
        );
        true
    }

    /// Patches one unit's zone. Unknown units are ignored.
    pub fn update_zone_property(&mut self, unit_id: &str, zone: Option<ZoneId>) -> bool {
        match self.units.get_mut(unit_id) {
            Some(unit) => {
                unit.zone = zone.filter(|z| *z > 0);
                true
            }
            None => false,
        }
    }

    /// Returns how many known units changed state.
    pub fn set_dormant(&mut self, unit_ids: &[UnitId], dormant: bool) -> usize {
        let mut changed = 0;
        for id in unit_ids {
            if let Some(unit) = self.units.get_mut(id)
                && unit.dormant != dormant
            {
                unit.dormant = dormant;
                changed += 1;
            }
        }
        changed
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    pub fn zone_of(&self, unit_id: &str) -> Option<ZoneId> {
        self.units.get(unit_id).and_then(|u| u.zone)
    }

    pub fn is_dormant(&self, unit_id: &str) -> bool {
        self.units.get(unit_id).is_some_and(|u| u.dormant)
    }

    fn live_units(&self) -> impl Iterator<Item = (&UnitId, &UnitGeometry)> {
        self.units.iter().filter(|(_, u)| !u.dormant)
    }

    /// One outline per zone: the union of its units, labelled at the
    /// largest piece. Restricted to `unit_ids` when given.
    pub fn dissolve_by_zone(&self, unit_ids: Option<&[UnitId]>) -> DissolveResult {
        let only: Option<HashSet<&str>> =
            unit_ids.map(|ids| ids.iter().map(String::as_str).collect());
        let mut groups: BTreeMap<ZoneId, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for (id, unit) in self.live_units() {
            if only.as_ref().is_some_and(|only| !only.contains(id.as_str())) {
                continue;
            }
            if let Some(zone) = unit.zone {
                groups.entry(zone).or_default().push(unit.shape.clone());
            }
        }
        let result = outlines(groups);
        debug!(zones = result.zones.len(), "dissolved zones");
        result
    }

    /// Union of all live unassigned units, split into connected regions.
    pub fn get_unassigned_geometries(&self, exclude_ids: &[UnitId]) -> UnassignedResult {
        let exclude: HashSet<&str> = exclude_ids.iter().map(String::as_str).collect();
        let pieces: Vec<MultiPolygon<f64>> = self
            .live_units()
            .filter(|(id, unit)| unit.zone.is_none() && !exclude.contains(id.as_str()))
            .map(|(_, unit)| unit.shape.clone())
            .collect();
        let result = UnassignedResult::from_regions(union_all(pieces).0);
        debug!(regions = result.regions.len(), "computed unassigned regions");
        result
    }

    /// Like [`GeometryEngine::dissolve_by_zone`], with every unit clipped to
    /// `bbox` first so labels stay inside the view.
    pub fn get_centroids_from_view(&self, bbox: &BBox) -> DissolveResult {
        let mut groups: BTreeMap<ZoneId, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        for (_, unit) in self.live_units() {
            let Some(zone) = unit.zone else { continue };
            if !unit.extent.is_some_and(|extent| extent.intersects(bbox)) {
                continue;
            }
            let clipped = clip_to_bbox(&unit.shape, bbox);
            if !clipped.0.is_empty() {
                groups.entry(zone).or_default().push(clipped);
            }
        }
        outlines(groups)
    }

    pub fn stats(&self) -> GeometryStats {
        GeometryStats {
            units: self.units.len(),
            dormant: self.units.values().filter(|u| u.dormant).count(),
            assigned: self.units.values().filter(|u| u.zone.is_some()).count(),
        }
    }
}

fn outlines(groups: BTreeMap<ZoneId, Vec<MultiPolygon<f64>>>) -> DissolveResult {
    let zones = groups
        .into_iter()
        .filter_map(|(zone, pieces)| {
            let unit_count = pieces.len();
            let outline = union_all(pieces);
            if outline.0.is_empty() {
                return None;
            }
            Some(ZoneOutline {
                zone,
                centroid: zone_label_point(&outline),
                outline,
                unit_count,
            })
        })
        .collect();
    DissolveResult { zones }
}
