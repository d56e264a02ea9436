//! The geometry worker: a dedicated thread that owns a [`GeometryEngine`]
//! and answers token-tagged requests.
//!
//! Requests flow over one channel and responses over another. A router on the
//! caller side matches responses to waiters by token. For each query kind only
//! the newest issued request counts; an older response of the same kind is
//! answered with [`GeometryError::StaleResponse`] instead of its result. The
//! worker also skips queued queries that a newer queued query of the same kind
//! has already superseded.
//!
//! Supersession is scoped by lane. Every handle has one; handles made with
//! [`GeometryClient::independent`] get a fresh lane, so their queries never
//! race queries from other handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use zonemap_shared::{BBox, Lane, RequestToken, UnitId, WorkerRequest, WorkerResponse, ZoneId};

use crate::error::GeometryError;
use crate::geometry::{
    DissolveResult, GeometryEngine, GeometryStats, ShapeSource, UnassignedResult, UnitProperties,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum GeometryOp {
    LoadUnitGeometry {
        unit_id: UnitId,
        source: ShapeSource,
        #[serde(default)]
        properties: UnitProperties,
    },
    UpdateZoneProperty {
        unit_id: UnitId,
        zone: Option<ZoneId>,
    },
    SetDormant {
        unit_ids: Vec<UnitId>,
        dormant: bool,
    },
    DissolveByZone {
        #[serde(default)]
        unit_ids: Option<Vec<UnitId>>,
    },
    GetUnassignedGeometries {
        #[serde(default)]
        exclude_ids: Vec<UnitId>,
    },
    GetCentroidsFromView {
        bbox: BBox,
    },
    Stats,
    Clear,
}

/// Query kinds subject to supersession. Mutations have no key and are never
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    Dissolve,
    View,
    Unassigned,
}

impl GeometryOp {
    pub fn key(&self) -> Option<RequestKey> {
        match self {
            GeometryOp::DissolveByZone { .. } => Some(RequestKey::Dissolve),
            GeometryOp::GetCentroidsFromView { .. } => Some(RequestKey::View),
            GeometryOp::GetUnassignedGeometries { .. } => Some(RequestKey::Unassigned),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            GeometryOp::LoadUnitGeometry { .. } => "load_unit_geometry",
            GeometryOp::UpdateZoneProperty { .. } => "update_zone_property",
            GeometryOp::SetDormant { .. } => "set_dormant",
            GeometryOp::DissolveByZone { .. } => "dissolve_by_zone",
            GeometryOp::GetUnassignedGeometries { .. } => "get_unassigned_geometries",
            GeometryOp::GetCentroidsFromView { .. } => "get_centroids_from_view",
            GeometryOp::Stats => "stats",
            GeometryOp::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryReply {
    Ack,
    Dissolved(DissolveResult),
    View(DissolveResult),
    Unassigned(UnassignedResult),
    Stats(GeometryStats),
}

type Request = WorkerRequest<GeometryOp>;
type Response = WorkerResponse<GeometryReply, GeometryError>;
type Waiter = oneshot::Sender<Result<GeometryReply, GeometryError>>;
type Scope = (Lane, RequestKey);

fn apply(engine: &mut GeometryEngine, op: GeometryOp) -> GeometryReply {
    match op {
        GeometryOp::LoadUnitGeometry {
            unit_id,
            source,
            properties,
        } => {
            engine.load_unit_geometry(&unit_id, source, properties);
            GeometryReply::Ack
        }
        GeometryOp::UpdateZoneProperty { unit_id, zone } => {
            engine.update_zone_property(&unit_id, zone);
            GeometryReply::Ack
        }
        GeometryOp::SetDormant { unit_ids, dormant } => {
            engine.set_dormant(&unit_ids, dormant);
            GeometryReply::Ack
        }
        GeometryOp::DissolveByZone { unit_ids } => {
            GeometryReply::Dissolved(engine.dissolve_by_zone(unit_ids.as_deref()))
        }
        GeometryOp::GetUnassignedGeometries { exclude_ids } => {
            GeometryReply::Unassigned(engine.get_unassigned_geometries(&exclude_ids))
        }
        GeometryOp::GetCentroidsFromView { bbox } => {
            GeometryReply::View(engine.get_centroids_from_view(&bbox))
        }
        GeometryOp::Stats => GeometryReply::Stats(engine.stats()),
        GeometryOp::Clear => {
            engine.clear();
            GeometryReply::Ack
        }
    }
}

fn run_worker(
    mut engine: GeometryEngine,
    mut requests: mpsc::UnboundedReceiver<Request>,
    responses: mpsc::UnboundedSender<Response>,
) {
    while let Some(first) = requests.blocking_recv() {
        let mut batch = vec![first];
        while let Ok(next) = requests.try_recv() {
            batch.push(next);
        }

        let mut newest: HashMap<Scope, RequestToken> = HashMap::new();
        for request in &batch {
            if let Some(key) = request.op.key() {
                let entry = newest.entry((request.lane, key)).or_insert(request.token);
                *entry = (*entry).max(request.token);
            }
        }

        for WorkerRequest { op, token, lane } in batch {
            if let Some(key) = op.key()
                && let Some(&latest) = newest.get(&(lane, key))
                && latest > token
            {
                trace!(token, latest, op = op.name(), "skipping superseded query");
                if responses
                    .send(Response::err(token, GeometryError::StaleResponse { token, latest }))
                    .is_err()
                {
                    return;
                }
                continue;
            }
            let reply = apply(&mut engine, op);
            if responses.send(Response::ok(token, reply)).is_err() {
                return;
            }
        }
    }
    debug!("geometry worker stopped");
}

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<RequestToken, (Option<Scope>, Waiter)>,
    latest: HashMap<Scope, RequestToken>,
}

impl PendingTable {
    /// Drops the scope's newest-token entry once nothing in it is pending.
    fn settle(&mut self, scope: Scope, token: RequestToken) {
        let idle = !self.waiters.values().any(|(s, _)| *s == Some(scope));
        if idle && self.latest.get(&scope) == Some(&token) {
            self.latest.remove(&scope);
        }
    }
}

fn lock(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route(table: &Mutex<PendingTable>, response: Response) {
    let token = response.token;
    let mut table = lock(table);
    let Some((scope, waiter)) = table.waiters.remove(&token) else {
        if let Some(error) = response.error {
            warn!(token, error = %error, "geometry request failed");
        }
        return;
    };
    let latest = scope.and_then(|scope| table.latest.get(&scope).copied());
    if let Some(scope) = scope {
        table.settle(scope, token);
    }
    drop(table);

    let outcome = match latest {
        Some(latest) if latest > token => Err(GeometryError::StaleResponse { token, latest }),
        _ => response.into_result(|| GeometryError::UnexpectedReply("empty response".into())),
    };
    // Receiver gone means the caller stopped waiting.
    let _ = waiter.send(outcome);
}

fn run_router(table: Arc<Mutex<PendingTable>>, mut responses: mpsc::UnboundedReceiver<Response>) {
    while let Some(response) = responses.blocking_recv() {
        route(&table, response);
    }
    // Worker gone: fail everyone still waiting.
    let mut table = lock(&table);
    for (_, (_, waiter)) in table.waiters.drain() {
        let _ = waiter.send(Err(GeometryError::WorkerGone));
    }
    debug!("geometry router stopped");
}

/// Handle to a running geometry worker. Cheap to clone. The worker and its
/// router stop once every handle is dropped.
#[derive(Clone)]
pub struct GeometryClient {
    requests: mpsc::UnboundedSender<Request>,
    next_token: Arc<AtomicU64>,
    next_lane: Arc<AtomicU32>,
    lane: Lane,
    pending: Arc<Mutex<PendingTable>>,
}

impl GeometryClient {
    /// Starts a worker thread owning `engine`, plus the response router.
    pub fn spawn(engine: GeometryEngine) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingTable::default()));

        thread::Builder::new()
            .name("geometry-worker".into())
            .spawn(move || run_worker(engine, request_rx, response_tx))?;
        let router_table = Arc::clone(&pending);
        thread::Builder::new()
            .name("geometry-router".into())
            .spawn(move || run_router(router_table, response_rx))?;
        info!("geometry worker started");

        Ok(Self {
            requests: request_tx,
            next_token: Arc::new(AtomicU64::new(1)),
            next_lane: Arc::new(AtomicU32::new(1)),
            lane: 0,
            pending,
        })
    }

    /// A handle to the same worker on a fresh lane. Its queries are ordered
    /// with every other request but only supersede each other.
    pub fn independent(&self) -> Self {
        Self {
            lane: self.next_lane.fetch_add(1, Ordering::Relaxed),
            ..self.clone()
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    fn issue(&self) -> RequestToken {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Fire-and-forget; used for mutations. Failures are only logged.
    pub fn send(&self, op: GeometryOp) {
        let token = self.issue();
        trace!(token, op = op.name(), "geometry mutation");
        let request = WorkerRequest {
            op,
            token,
            lane: self.lane,
        };
        if self.requests.send(request).is_err() {
            warn!(token, "geometry worker is gone; dropping mutation");
        }
    }

    /// Sends `op` and waits for its answer. Requests are served in issue
    /// order, so the answer reflects every mutation sent before it.
    pub async fn request(&self, op: GeometryOp) -> Result<GeometryReply, GeometryError> {
        let token = self.issue();
        let scope = op.key().map(|key| (self.lane, key));
        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock(&self.pending);
            if let Some(scope) = scope {
                table.latest.insert(scope, token);
            }
            table.waiters.insert(token, (scope, tx));
        }
        let request = WorkerRequest {
            op,
            token,
            lane: self.lane,
        };
        if self.requests.send(request).is_err() {
            lock(&self.pending).waiters.remove(&token);
            return Err(GeometryError::WorkerGone);
        }
        rx.await.map_err(|_| GeometryError::WorkerGone)?
    }

    pub async fn dissolve(
        &self,
        unit_ids: Option<Vec<UnitId>>,
    ) -> Result<DissolveResult, GeometryError> {
        match self.request(GeometryOp::DissolveByZone { unit_ids }).await? {
            GeometryReply::Dissolved(result) => Ok(result),
            other => Err(unexpected("dissolve_by_zone", &other)),
        }
    }

    pub async fn unassigned(
        &self,
        exclude_ids: Vec<UnitId>,
    ) -> Result<UnassignedResult, GeometryError> {
        match self
            .request(GeometryOp::GetUnassignedGeometries { exclude_ids })
            .await?
        {
            GeometryReply::Unassigned(result) => Ok(result),
            other => Err(unexpected("get_unassigned_geometries", &other)),
        }
    }

    pub async fn centroids_in_view(&self, bbox: BBox) -> Result<DissolveResult, GeometryError> {
        match self.request(GeometryOp::GetCentroidsFromView { bbox }).await? {
            GeometryReply::View(result) => Ok(result),
            other => Err(unexpected("get_centroids_from_view", &other)),
        }
    }

    pub async fn stats(&self) -> Result<GeometryStats, GeometryError> {
        match self.request(GeometryOp::Stats).await? {
            GeometryReply::Stats(stats) => Ok(stats),
            other => Err(unexpected("stats", &other)),
        }
    }
}

fn unexpected(op: &str, reply: &GeometryReply) -> GeometryError {
    GeometryError::UnexpectedReply(format!("{op}: {reply:?}"))
}
