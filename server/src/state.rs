use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, RwLock, broadcast};
use tracing::warn;
use zonemap_engine::{GeometryClient, QueryFacade, RemoteStore};

use crate::config::{remote_connect_timeout, remote_timeout, sse_broadcast_buffer};

/// Pre-serialized outline event, serialized once by the publisher and shared
/// by every SSE client.
#[derive(Debug, Clone)]
pub struct OutlineEvent {
    pub revision: u64,
    pub json: Arc<Bytes>,
}

/// One editing session: a facade behind a single-writer lock, plus the
/// outline broadcast fed by the publisher.
pub struct PlanSession {
    pub id: String,
    pub facade: Mutex<QueryFacade>,
    /// The publisher's own lane on the plan's geometry worker.
    pub outline_geometry: GeometryClient,
    pub outline_tx: broadcast::Sender<OutlineEvent>,
    pub latest_outlines: RwLock<Option<OutlineEvent>>,
    pub created_at: DateTime<Utc>,
    revision: AtomicU64,
    changed: Notify,
    closed: AtomicBool,
}

impl PlanSession {
    pub fn new(id: String, facade: QueryFacade) -> Self {
        let (outline_tx, _) = broadcast::channel(sse_broadcast_buffer());
        let outline_geometry = facade.geometry().independent();
        Self {
            id,
            facade: Mutex::new(facade),
            outline_geometry,
            outline_tx,
            latest_outlines: RwLock::new(None),
            created_at: Utc::now(),
            revision: AtomicU64::new(0),
            changed: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Records that assignments changed and wakes the outline publisher.
    pub fn mark_dirty(&self) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
        self.changed.notify_one();
        revision
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    /// Wakes the publisher again without a new revision.
    pub fn rearm(&self) {
        self.changed.notify_one();
    }

    pub async fn wait_dirty(&self) {
        self.changed.notified().await;
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.changed.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub plans: Arc<DashMap<String, Arc<PlanSession>>>,
    pub next_plan_id: Arc<AtomicU64>,
    /// Remote document store. None if REMOTE_STORE_URL is not set.
    pub remote: Option<Arc<dyn RemoteStore>>,
    pub remote_timeout: Duration,
    pub outline_debounce: Duration,
}

impl AppState {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            plans: Arc::new(DashMap::new()),
            next_plan_id: Arc::new(AtomicU64::new(1)),
            remote,
            remote_timeout: remote_timeout(),
            outline_debounce: crate::config::outline_debounce(),
        }
    }

    pub fn plan(&self, id: &str) -> Option<Arc<PlanSession>> {
        self.plans.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn next_plan_id(&self) -> String {
        format!("plan-{}", self.next_plan_id.fetch_add(1, Ordering::Relaxed))
    }
}

pub fn build_http_client() -> reqwest::Client {
    let request_timeout = remote_timeout();
    let connect_timeout = remote_connect_timeout();
    reqwest::Client::builder()
        .user_agent("zonemap/0.1")
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build configured HTTP client, using defaults");
            reqwest::Client::new()
        })
}
