use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    let plan_routes = Router::new()
        .route(
            "/",
            get(routes::api::get_plan).delete(routes::api::delete_plan),
        )
        .route("/tiles", post(routes::api::load_tiles))
        .route("/paint", post(routes::api::paint))
        .route("/erase", post(routes::api::erase))
        .route("/strokes/begin", post(routes::api::begin_stroke))
        .route("/strokes/end", post(routes::api::end_stroke))
        .route("/shatter/{unit}", post(routes::api::shatter))
        .route("/heal/{unit}", post(routes::api::heal))
        .route("/undo", post(routes::api::undo))
        .route("/redo", post(routes::api::redo))
        .route("/locks", post(routes::api::set_locks))
        .route("/visibility", post(routes::api::set_visibility))
        .route("/captive", post(routes::api::set_captive))
        .route("/reset", post(routes::api::reset))
        .route("/export", get(routes::api::export_plan))
        .route("/import", post(routes::api::import_plan))
        .route("/dissolve", get(routes::api::dissolve))
        .route("/centroids", get(routes::api::centroids))
        .route("/unassigned", get(routes::api::unassigned))
        .route("/events", get(routes::sse::plan_events));

    Router::new()
        .route("/api/health", get(routes::api::health))
        .route("/api/plans", post(routes::api::create_plan))
        .nest("/api/plans/{id}", plan_routes)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
