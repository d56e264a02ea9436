use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::unit::{UnitId, ZoneId};

/// Export/import document for one plan's assignments.
///
/// Records are kept sorted by `geo_id`. Active child units carry
/// `parent_path`; an active child without a zone is written with
/// `"zone": null` so the shatter state survives a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    pub source_table: String,
    #[serde(default)]
    pub zones: Vec<ZoneRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub geo_id: UnitId,
    pub zone: Option<ZoneId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<UnitId>,
}

impl PlanDocument {
    pub fn from_json(json: &str) -> Result<Self, String> {
        let doc: PlanDocument =
            serde_json::from_str(json).map_err(|e| format!("invalid plan document: {e}"))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Structural checks that need no knowledge of the map's child layer.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_table.trim().is_empty() {
            return Err("source_table must not be empty".to_string());
        }
        let mut seen = HashSet::with_capacity(self.zones.len());
        for record in &self.zones {
            if record.geo_id.trim().is_empty() {
                return Err("zone record with empty geo_id".to_string());
            }
            if !seen.insert(record.geo_id.as_str()) {
                return Err(format!("duplicate geo_id {:?}", record.geo_id));
            }
            if record.zone == Some(0) {
                return Err(format!("geo_id {:?} has zone 0", record.geo_id));
            }
            match &record.parent_path {
                Some(parent) if parent == &record.geo_id => {
                    return Err(format!("geo_id {:?} is its own parent", record.geo_id));
                }
                Some(parent) if parent.trim().is_empty() => {
                    return Err(format!("geo_id {:?} has empty parent_path", record.geo_id));
                }
                None if record.zone.is_none() => {
                    return Err(format!(
                        "geo_id {:?} has no zone and no parent_path",
                        record.geo_id
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Sorts records by `geo_id`, the canonical export order.
    pub fn normalize(&mut self) {
        self.zones.sort_by(|a, b| a.geo_id.cmp(&b.geo_id));
    }

    /// Number of records carrying a zone.
    pub fn assigned_count(&self) -> usize {
        self.zones.iter().filter(|r| r.zone.is_some()).count()
    }
}

/// ETag for an exported document body.
pub fn document_etag(body: &[u8]) -> String {
    format!("\"plan-{:08x}\"", crc32fast::hash(body))
}
