use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Hierarchical unit path, e.g. `"vtd:0413"` or `"vtd:0413/block:1002"`.
pub type UnitId = String;

/// Zone (district) number. Always positive; absence means unassigned.
pub type ZoneId = u32;

/// Axis-aligned rectangle in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl BBox {
    /// Builds a box from two arbitrary corners.
    pub fn new(a: [f64; 2], b: [f64; 2]) -> Self {
        Self {
            min: [a[0].min(b[0]), a[1].min(b[1])],
            max: [a[0].max(b[0]), a[1].max(b[1])],
        }
    }

    /// Square brush box centred on a cursor point.
    pub fn around(x: f64, y: f64, radius: f64) -> Self {
        let r = radius.abs();
        Self {
            min: [x - r, y - r],
            max: [x + r, y + r],
        }
    }

    pub fn min_x(&self) -> f64 {
        self.min[0]
    }

    pub fn min_y(&self) -> f64 {
        self.min[1]
    }

    pub fn max_x(&self) -> f64 {
        self.max[0]
    }

    pub fn max_y(&self) -> f64 {
        self.max[1]
    }

    pub fn width(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_finite(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
    }

    /// Closed-interval intersection test; boxes that only touch intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min[0] <= other.max[0]
            && other.min[0] <= self.max[0]
            && self.min[1] <= other.max[1]
            && other.min[1] <= self.max[1]
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min[0] && x <= self.max[0] && y >= self.min[1] && y <= self.max[1]
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    /// Smallest box covering every box in `boxes`, or `None` when empty.
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<BBox> {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BBox>, b| match acc {
                Some(acc) => Some(acc.union(b)),
                None => Some(*b),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBBoxError(pub String);

impl fmt::Display for ParseBBoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid bbox: {}", self.0)
    }
}

impl std::error::Error for ParseBBoxError {}

/// Parses `minx,miny,maxx,maxy` (the query-string form).
impl FromStr for BBox {
    type Err = ParseBBoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ParseBBoxError(format!("{s:?}: {e}")))?;
        let [x0, y0, x1, y1] = parts[..] else {
            return Err(ParseBBoxError(format!(
                "{s:?}: expected 4 comma-separated numbers"
            )));
        };
        let bbox = BBox::new([x0, y0], [x1, y1]);
        if !bbox.is_finite() {
            return Err(ParseBBoxError(format!("{s:?}: non-finite coordinate")));
        }
        Ok(bbox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitLayer {
    Parent,
    Child,
}

/// A unit as delivered by one tile of source data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFeature {
    pub id: UnitId,
    pub layer: UnitLayer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<UnitId>,
    /// Bounding box pieces of this unit inside the tile.
    #[serde(default)]
    pub bboxes: Vec<BBox>,
    /// True geometry, when the source has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<geojson::Geometry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePayload {
    pub key: String,
    #[serde(default)]
    pub units: Vec<UnitFeature>,
}

/// Static parent → children relation of a map's child layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildLayerSpec {
    pub children: BTreeMap<UnitId, Vec<UnitId>>,
}
