use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::warn;
use zonemap_shared::{PlanDocument, UnitFeature, UnitId};

use crate::error::RemoteError;
use crate::geometry::UnassignedResult;
use crate::geometry::shape::from_geojson;

pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// The remote document store, for geometry this process does not hold.
pub trait RemoteStore: Send + Sync {
    /// Unit features for `unit_ids`, typically children not yet seen in any
    /// loaded tile.
    fn unit_geometries<'a>(&'a self, unit_ids: &'a [UnitId]) -> RemoteFuture<'a, Vec<UnitFeature>>;

    /// Unassigned area for the given assignment state.
    fn unassigned_regions<'a>(
        &'a self,
        plan: &'a PlanDocument,
    ) -> RemoteFuture<'a, geojson::FeatureCollection>;
}

/// Polygonal parts of every feature, in reading order.
pub fn regions_from_collection(collection: geojson::FeatureCollection) -> UnassignedResult {
    let mut regions = Vec::new();
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        match from_geojson(geometry) {
            Ok(parts) => regions.extend(parts),
            Err(e) => warn!(error = %e, "skipping unreadable remote region"),
        }
    }
    UnassignedResult::from_regions(regions)
}

/// Asks the remote store for unassigned area. A timeout or failure yields an
/// empty result.
pub async fn unassigned_with_timeout(
    store: &dyn RemoteStore,
    plan: &PlanDocument,
    limit: Duration,
) -> UnassignedResult {
    let outcome = match tokio::time::timeout(limit, store.unassigned_regions(plan)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    };
    match outcome {
        Ok(collection) => regions_from_collection(collection),
        Err(e) => {
            warn!(error = %e, "no unassigned geometry from remote store");
            UnassignedResult::default()
        }
    }
}

/// Fetches unit features under `limit`. Failures yield an empty list.
pub async fn units_with_timeout(
    store: &dyn RemoteStore,
    unit_ids: &[UnitId],
    limit: Duration,
) -> Vec<UnitFeature> {
    if unit_ids.is_empty() {
        return Vec::new();
    }
    let outcome = match tokio::time::timeout(limit, store.unit_geometries(unit_ids)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    };
    outcome.unwrap_or_else(|e| {
        warn!(error = %e, requested = unit_ids.len(), "no unit geometry from remote store");
        Vec::new()
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use zonemap_shared::{PlanDocument, UnitFeature, UnitId};

    use super::{RemoteFuture, RemoteStore, unassigned_with_timeout, units_with_timeout};
    use crate::error::RemoteError;

    /// Remote store answering from canned data, optionally after a delay.
    pub(crate) struct CannedStore {
        pub units: Vec<UnitFeature>,
        pub regions: geojson::FeatureCollection,
        pub delay: Duration,
    }

    impl RemoteStore for CannedStore {
        fn unit_geometries<'a>(
            &'a self,
            unit_ids: &'a [UnitId],
        ) -> RemoteFuture<'a, Vec<UnitFeature>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(self
                    .units
                    .iter()
                    .filter(|u| unit_ids.contains(&u.id))
                    .cloned()
                    .collect())
            })
        }

        fn unassigned_regions<'a>(
            &'a self,
            _plan: &'a PlanDocument,
        ) -> RemoteFuture<'a, geojson::FeatureCollection> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                Ok(self.regions.clone())
            })
        }
    }

    struct BrokenStore;

    impl RemoteStore for BrokenStore {
        fn unit_geometries<'a>(&'a self, _: &'a [UnitId]) -> RemoteFuture<'a, Vec<UnitFeature>> {
            Box::pin(async { Err(RemoteError::Transport("connection refused".into())) })
        }

        fn unassigned_regions<'a>(
            &'a self,
            _: &'a PlanDocument,
        ) -> RemoteFuture<'a, geojson::FeatureCollection> {
            Box::pin(async { Err(RemoteError::Decode("not geojson".into())) })
        }
    }

    pub(crate) fn square_collection() -> geojson::FeatureCollection {
        serde_json::from_value(serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": null, "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 5.0], [1.0, 5.0], [1.0, 6.0], [0.0, 6.0], [0.0, 5.0]]]
                }},
                {"type": "Feature", "properties": null, "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[4.0, 0.0], [5.0, 0.0], [5.0, 1.0], [4.0, 1.0], [4.0, 0.0]]]
                }},
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        }))
        .expect("feature collection")
    }

    fn plan() -> PlanDocument {
        PlanDocument {
            source_table: "blocks".to_string(),
            zones: Vec::new(),
        }
    }

    #[tokio::test]
    async fn remote_regions_are_sorted() {
        let store = CannedStore {
            units: Vec::new(),
            regions: square_collection(),
            delay: Duration::ZERO,
        };
        let result = unassigned_with_timeout(&store, &plan(), Duration::from_secs(1)).await;
        assert_eq!(result.regions.len(), 2);
        let first = crate::geometry::shape::polygon_bbox(&result.regions[0]).expect("bbox");
        assert_eq!(first.min_y(), 0.0);
        assert_eq!(
            result.overall_bbox,
            Some(zonemap_shared::BBox::new([0.0, 0.0], [5.0, 6.0]))
        );
    }

    #[tokio::test]
    async fn timeout_means_no_unassigned_data() {
        let store = CannedStore {
            units: Vec::new(),
            regions: square_collection(),
            delay: Duration::from_secs(30),
        };
        let limit = Duration::from_millis(20);
        let result = unassigned_with_timeout(&store, &plan(), limit).await;
        assert!(result.is_empty());
        assert_eq!(result.overall_bbox, None);

        let units = units_with_timeout(&store, &["a".to_string()], limit).await;
        assert!(units.is_empty());
    }

    #[tokio::test]
    async fn failures_degrade_to_empty() {
        let result = unassigned_with_timeout(&BrokenStore, &plan(), Duration::from_secs(1)).await;
        assert!(result.is_empty());
        let units = units_with_timeout(&BrokenStore, &["a".to_string()], Duration::from_secs(1)).await;
        assert!(units.is_empty());
    }
}
