use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zonemap_engine::{
    AssignmentDelta, GeometryError, PlanSummary, QueryFacade, ZoneError,
};
use zonemap_shared::{BBox, ChildLayerSpec, TilePayload, UnitId, ZoneId, document_etag};

use crate::config::MAX_TILES_PER_REQUEST;
use crate::services::outline_publisher;
use crate::state::{AppState, PlanSession};

#[derive(Debug)]
pub enum ApiError {
    PlanNotFound(String),
    BadRequest(String),
    Zone(ZoneError),
    Geometry(GeometryError),
    Internal(String),
}

impl From<ZoneError> for ApiError {
    fn from(error: ZoneError) -> Self {
        ApiError::Zone(error)
    }
}

impl From<GeometryError> for ApiError {
    fn from(error: GeometryError) -> Self {
        ApiError::Geometry(error)
    }
}

pub fn zone_error_status(error: &ZoneError) -> StatusCode {
    match error {
        ZoneError::NoChildLayer
        | ZoneError::AlreadyShattered(_)
        | ZoneError::NotShattered(_)
        | ZoneError::Heterogeneous { .. } => StatusCode::CONFLICT,
        ZoneError::UnknownParent(_) => StatusCode::NOT_FOUND,
        ZoneError::MalformedImport(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::PlanNotFound(id) => (
                StatusCode::NOT_FOUND,
                "plan_not_found",
                format!("no plan {id:?}"),
            ),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "bad_request", message.clone())
            }
            ApiError::Zone(error) => (zone_error_status(error), "zone_error", error.to_string()),
            ApiError::Geometry(error @ GeometryError::StaleResponse { .. }) => {
                (StatusCode::CONFLICT, "stale_response", error.to_string())
            }
            ApiError::Geometry(error) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "geometry_error",
                error.to_string(),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                message.clone(),
            ),
        };
        if status.is_server_error() {
            warn!(%status, error = %message, "request failed");
        }
        let mut body = serde_json::json!({ "error": kind, "message": message });
        if let ApiError::Zone(ZoneError::Heterogeneous { zones, .. }) = &self {
            body["zones"] = serde_json::json!(zones);
        }
        (status, Json(body)).into_response()
    }
}

fn find_plan(state: &AppState, id: &str) -> Result<Arc<PlanSession>, ApiError> {
    state
        .plan(id)
        .ok_or_else(|| ApiError::PlanNotFound(id.to_string()))
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "plans": state.plans.len(),
        "remote_store": state.remote.is_some(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub source_table: String,
    #[serde(default)]
    pub child_layer: Option<ChildLayerSpec>,
}

#[derive(Debug, Serialize)]
pub struct PlanCreated {
    pub id: String,
    pub created_at: String,
    pub summary: PlanSummary,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<PlanCreated>), ApiError> {
    let source_table = request.source_table.trim();
    if source_table.is_empty() {
        return Err(ApiError::BadRequest("source_table must not be empty".into()));
    }
    let mut facade = QueryFacade::new(source_table, request.child_layer.as_ref())
        .map_err(|e| ApiError::Internal(format!("failed to start geometry worker: {e}")))?;
    if let Some(remote) = &state.remote {
        facade = facade.with_remote(Arc::clone(remote), state.remote_timeout);
    }
    let summary = facade.summary();

    let id = state.next_plan_id();
    let session = Arc::new(PlanSession::new(id.clone(), facade));
    let created_at = session.created_at.to_rfc3339();
    state.plans.insert(id.clone(), Arc::clone(&session));
    tokio::spawn(outline_publisher::run(session, state.outline_debounce));
    info!(plan = %id, %source_table, "created plan");

    Ok((
        StatusCode::CREATED,
        Json(PlanCreated {
            id,
            created_at,
            summary,
        }),
    ))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlanSummary>, ApiError> {
    let session = find_plan(&state, &id)?;
    let summary = session.facade.lock().await.summary();
    Ok(Json(summary))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (_, session) = state
        .plans
        .remove(&id)
        .ok_or_else(|| ApiError::PlanNotFound(id.clone()))?;
    session.close();
    info!(plan = %id, "closed plan");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TilesRequest {
    pub tiles: Vec<TilePayload>,
}

pub async fn load_tiles(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TilesRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.tiles.len() > MAX_TILES_PER_REQUEST {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_TILES_PER_REQUEST} tiles per request"
        )));
    }
    let session = find_plan(&state, &id)?;
    let tiles = request.tiles.len();
    let added: usize = {
        let mut facade = session.facade.lock().await;
        request
            .tiles
            .into_iter()
            .map(|tile| facade.load_tile(tile))
            .sum()
    };
    session.mark_dirty();
    debug!(plan = %id, tiles, added, "loaded tiles");
    Ok(Json(serde_json::json!({ "tiles": tiles, "added": added })))
}

#[derive(Debug, Deserialize)]
pub struct PaintRequest {
    pub bbox: BBox,
    #[serde(default)]
    pub zone: Option<ZoneId>,
}

#[derive(Debug, Deserialize)]
pub struct EraseRequest {
    pub bbox: BBox,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChangeView {
    pub unit_id: UnitId,
    pub old: Option<ZoneId>,
    pub new: Option<ZoneId>,
}

#[derive(Debug, Serialize)]
pub struct PaintResponse {
    pub changed: Vec<ChangeView>,
    pub skipped: usize,
}

impl From<AssignmentDelta> for PaintResponse {
    fn from(delta: AssignmentDelta) -> Self {
        Self {
            changed: delta
                .changes
                .into_iter()
                .map(|c| ChangeView {
                    unit_id: c.unit_id,
                    old: c.old,
                    new: c.new,
                })
                .collect(),
            skipped: delta.skipped,
        }
    }
}

fn check_bbox(bbox: &BBox) -> Result<(), ApiError> {
    if bbox.is_finite() {
        Ok(())
    } else {
        Err(ApiError::BadRequest("bbox must be finite".into()))
    }
}

pub async fn paint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PaintRequest>,
) -> Result<Json<PaintResponse>, ApiError> {
    check_bbox(&request.bbox)?;
    let session = find_plan(&state, &id)?;
    let delta = session
        .facade
        .lock()
        .await
        .paint(request.bbox, request.zone);
    if !delta.is_empty() {
        session.mark_dirty();
    }
    Ok(Json(delta.into()))
}

pub async fn erase(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EraseRequest>,
) -> Result<Json<PaintResponse>, ApiError> {
    check_bbox(&request.bbox)?;
    let session = find_plan(&state, &id)?;
    let delta = session.facade.lock().await.erase(request.bbox);
    if !delta.is_empty() {
        session.mark_dirty();
    }
    Ok(Json(delta.into()))
}

pub async fn begin_stroke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = find_plan(&state, &id)?;
    session.facade.lock().await.begin_stroke();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn end_stroke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = find_plan(&state, &id)?;
    let recorded = session.facade.lock().await.end_stroke();
    Ok(Json(serde_json::json!({ "recorded": recorded })))
}

pub async fn shatter(
    State(state): State<AppState>,
    Path((id, unit)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = find_plan(&state, &id)?;
    let (delta, fetch) = {
        let mut facade = session.facade.lock().await;
        let delta = facade.shatter(&unit)?;
        (delta, facade.child_fetch())
    };
    session.mark_dirty();

    let mut fetched = 0;
    if let Some(fetch) = fetch {
        let units = fetch.run().await;
        if !units.is_empty() {
            fetched = session.facade.lock().await.ingest_remote_units(units);
            session.mark_dirty();
        }
    }
    Ok(Json(serde_json::json!({
        "parent": delta.parent,
        "old_zone": delta.old_zone,
        "children": delta.children,
        "fetched_children": fetched,
    })))
}

pub async fn heal(
    State(state): State<AppState>,
    Path((id, unit)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = find_plan(&state, &id)?;
    let result = session.facade.lock().await.heal(&unit)?;
    session.mark_dirty();
    Ok(Json(serde_json::json!({
        "parent": result.parent,
        "zone": result.zone,
        "children": result.children,
    })))
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub applied: bool,
    pub summary: PlanSummary,
}

pub async fn undo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session = find_plan(&state, &id)?;
    let (applied, summary) = {
        let mut facade = session.facade.lock().await;
        (facade.undo(), facade.summary())
    };
    if applied {
        session.mark_dirty();
    }
    Ok(Json(HistoryResponse { applied, summary }))
}

pub async fn redo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session = find_plan(&state, &id)?;
    let (applied, summary) = {
        let mut facade = session.facade.lock().await;
        (facade.redo(), facade.summary())
    };
    if applied {
        session.mark_dirty();
    }
    Ok(Json(HistoryResponse { applied, summary }))
}

#[derive(Debug, Deserialize)]
pub struct LocksRequest {
    #[serde(default)]
    pub lock: Vec<ZoneId>,
    #[serde(default)]
    pub unlock: Vec<ZoneId>,
}

pub async fn set_locks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LocksRequest>,
) -> Result<Json<PlanSummary>, ApiError> {
    let session = find_plan(&state, &id)?;
    let mut facade = session.facade.lock().await;
    facade.unlock_zones(&request.unlock);
    facade.lock_zones(&request.lock);
    Ok(Json(facade.summary()))
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

pub async fn set_visibility(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<VisibilityRequest>,
) -> Result<Json<PlanSummary>, ApiError> {
    let session = find_plan(&state, &id)?;
    let mut facade = session.facade.lock().await;
    facade.set_visible(request.visible);
    Ok(Json(facade.summary()))
}

#[derive(Debug, Deserialize)]
pub struct CaptiveRequest {
    #[serde(default)]
    pub ids: Option<Vec<UnitId>>,
}

pub async fn set_captive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CaptiveRequest>,
) -> Result<StatusCode, ApiError> {
    let session = find_plan(&state, &id)?;
    session.facade.lock().await.set_captive(request.ids);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PlanSummary>, ApiError> {
    let session = find_plan(&state, &id)?;
    let summary = {
        let mut facade = session.facade.lock().await;
        facade.reset();
        facade.summary()
    };
    session.mark_dirty();
    Ok(Json(summary))
}

pub async fn export_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = find_plan(&state, &id)?;
    let document = session.facade.lock().await.export_assignments();
    let body = serde_json::to_vec(&document)
        .map_err(|e| ApiError::Internal(format!("failed to serialize plan: {e}")))?;
    let etag = document_etag(&body);

    if if_none_match_matches(&headers, &etag) {
        return Ok(not_modified_response("no-cache", Some(etag.as_str())));
    }
    Ok(json_bytes_response(
        Bytes::from(body),
        "no-cache",
        Some(etag.as_str()),
    ))
}

pub async fn import_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = find_plan(&state, &id)?;
    let assigned = session.facade.lock().await.load_assignments(&body)?;
    session.mark_dirty();
    info!(plan = %id, assigned, "imported plan");
    Ok(Json(serde_json::json!({ "assigned": assigned })))
}

pub async fn dissolve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = find_plan(&state, &id)?;
    // Query outside the facade lock so edits are not blocked meanwhile.
    let geometry = session.facade.lock().await.geometry();
    let result = geometry.dissolve(None).await?;
    Ok(Json(serde_json::json!({
        "outlines": result.outlines_geojson(),
        "centroids": result.centroids_geojson(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CentroidsQuery {
    pub bbox: String,
}

pub async fn centroids(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CentroidsQuery>,
) -> Result<Json<geojson::FeatureCollection>, ApiError> {
    let bbox: BBox = query
        .bbox
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    let session = find_plan(&state, &id)?;
    let geometry = session.facade.lock().await.geometry();
    let result = geometry.centroids_in_view(bbox).await?;
    Ok(Json(result.centroids_geojson()))
}

#[derive(Debug, Deserialize)]
pub struct UnassignedParams {
    #[serde(default)]
    pub exclude: String,
}

fn parse_exclude(raw: &str) -> Vec<UnitId> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn unassigned(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UnassignedParams>,
) -> Result<Json<geojson::FeatureCollection>, ApiError> {
    let session = find_plan(&state, &id)?;
    let exclude = parse_exclude(&params.exclude);
    let query = session.facade.lock().await.unassigned_query(exclude);
    let result = query.run().await?;
    Ok(Json(result.to_geojson()))
}

fn json_bytes_response(body: Bytes, cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn not_modified_response(cache_control: &'static str, etag: Option<&str>) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Some(etag) = etag
        && let Ok(etag_header) = HeaderValue::from_str(etag)
    {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn normalize_etag(candidate: &str) -> &str {
    candidate.strip_prefix("W/").unwrap_or(candidate).trim()
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };

    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == normalize_etag(etag)
    })
}
