use std::collections::{BTreeMap, HashMap};

use zonemap_shared::{BBox, ChildLayerSpec, UnitFeature, UnitId, UnitLayer};

/// Static parent ↔ children relation of the child layer.
#[derive(Debug, Clone, Default)]
pub struct ChildLayer {
    children_of: BTreeMap<UnitId, Vec<UnitId>>,
    parent_of: HashMap<UnitId, UnitId>,
}

impl ChildLayer {
    pub fn from_spec(spec: &ChildLayerSpec) -> Self {
        let mut layer = Self::default();
        for (parent, children) in &spec.children {
            let mut kids = Vec::with_capacity(children.len());
            for child in children {
                if child == parent || layer.parent_of.contains_key(child) {
                    tracing::warn!(%parent, %child, "ignoring duplicate child in child layer");
                    continue;
                }
                layer.parent_of.insert(child.clone(), parent.clone());
                kids.push(child.clone());
            }
            if !kids.is_empty() {
                layer.children_of.insert(parent.clone(), kids);
            }
        }
        layer
    }

    pub fn children(&self, parent: &str) -> Option<&[UnitId]> {
        self.children_of.get(parent).map(Vec::as_slice)
    }

    pub fn parent(&self, child: &str) -> Option<&UnitId> {
        self.parent_of.get(child)
    }

    pub fn is_child(&self, id: &str) -> bool {
        self.parent_of.contains_key(id)
    }

    pub fn parent_count(&self) -> usize {
        self.children_of.len()
    }
}

/// Everything learned about units from loaded tiles: bbox pieces and layer.
#[derive(Debug, Default)]
pub struct UnitCatalog {
    units: HashMap<UnitId, CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub layer: UnitLayer,
    pub bboxes: Vec<BBox>,
    pub has_geometry: bool,
}

impl UnitCatalog {
    /// Records a unit's tile piece. Pieces from several tiles accumulate.
    pub fn record(&mut self, feature: &UnitFeature) {
        let entry = self
            .units
            .entry(feature.id.clone())
            .or_insert_with(|| CatalogEntry {
                layer: feature.layer,
                bboxes: Vec::new(),
                has_geometry: false,
            });
        entry.bboxes.extend(feature.bboxes.iter().copied());
        entry.has_geometry |= feature.geometry.is_some() || !feature.bboxes.is_empty();
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.units.get(id)
    }

    pub fn bboxes(&self, id: &str) -> &[BBox] {
        self.units.get(id).map(|e| e.bboxes.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &CatalogEntry)> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use zonemap_shared::{BBox, ChildLayerSpec, UnitFeature, UnitLayer};

    use super::{ChildLayer, UnitCatalog};

    #[test]
    fn child_layer_has_reverse_lookup() {
        let mut children = BTreeMap::new();
        children.insert("p".to_string(), vec!["p/1".to_string(), "p/2".to_string()]);
        children.insert("q".to_string(), vec!["p/1".to_string(), "q".to_string()]);
        let layer = ChildLayer::from_spec(&ChildLayerSpec { children });

        assert_eq!(layer.children("p").map(<[_]>::len), Some(2));
        assert_eq!(layer.parent("p/2").map(String::as_str), Some("p"));
        assert!(layer.is_child("p/1"));
        // q only listed a duplicate child and itself, so it has no children.
        assert_eq!(layer.children("q"), None);
        assert_eq!(layer.parent_count(), 1);
    }

    #[test]
    fn catalog_accumulates_tile_pieces() {
        let mut catalog = UnitCatalog::default();
        let piece = |x: f64| UnitFeature {
            id: "a".to_string(),
            layer: UnitLayer::Parent,
            parent: None,
            bboxes: vec![BBox::new([x, 0.0], [x + 1.0, 1.0])],
            geometry: None,
        };
        catalog.record(&piece(0.0));
        catalog.record(&piece(1.0));
        assert_eq!(catalog.bboxes("a").len(), 2);
        assert!(catalog.get("a").is_some_and(|e| e.has_geometry));
        assert!(catalog.bboxes("missing").is_empty());
    }
}
