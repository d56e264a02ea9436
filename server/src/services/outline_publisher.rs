use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};
use zonemap_engine::{DissolveResult, GeometryError};

use crate::state::{OutlineEvent, PlanSession};

/// Recomputes a plan's zone outlines after edits settle and broadcasts them
/// to SSE clients. Runs until the session is closed.
pub async fn run(session: Arc<PlanSession>, debounce: Duration) {
    info!(plan = %session.id, "outline publisher started");
    loop {
        session.wait_dirty().await;
        if session.is_closed() {
            break;
        }
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        publish_once(&session).await;
    }
    info!(plan = %session.id, "outline publisher stopped");
}

pub async fn publish_once(session: &PlanSession) -> Option<OutlineEvent> {
    let revision = session.revision();
    let result = match session.outline_geometry.dissolve(None).await {
        Ok(result) => result,
        Err(GeometryError::StaleResponse { token, latest }) => {
            debug!(plan = %session.id, token, latest, "outline superseded, publishing again");
            session.rearm();
            return None;
        }
        Err(e) => {
            warn!(plan = %session.id, error = %e, "failed to recompute outlines");
            return None;
        }
    };
    let json = match serialize_outlines(revision, &result) {
        Ok(json) => json,
        Err(e) => {
            warn!(plan = %session.id, error = %e, "failed to serialize outlines");
            return None;
        }
    };
    let event = OutlineEvent {
        revision,
        json: Arc::new(json),
    };
    *session.latest_outlines.write().await = Some(event.clone());
    // No subscribers is fine; the latest event is kept for new clients.
    let _ = session.outline_tx.send(event.clone());
    debug!(plan = %session.id, revision, zones = result.zones.len(), "published outlines");
    Some(event)
}

pub fn serialize_outlines(revision: u64, result: &DissolveResult) -> serde_json::Result<Bytes> {
    serde_json::to_vec(&serde_json::json!({
        "revision": revision,
        "outlines": result.outlines_geojson(),
        "centroids": result.centroids_geojson(),
    }))
    .map(Bytes::from)
}
