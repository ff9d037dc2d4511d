pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{delete, get},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::health::StalenessMonitor;
use crate::store::ReadingStore;

#[derive(Clone)]
pub struct AppState {
    pub store: ReadingStore,
    pub monitor: StalenessMonitor,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/devices", get(handlers::list_devices))
        .route("/devices/{device_id}/latest", get(handlers::get_device_latest))
        .route(
            "/devices/{device_id}/history",
            get(handlers::get_device_history),
        )
        .route("/devices/{device_id}", delete(handlers::clear_device))
        .with_state(state)
        .split_for_parts();

    router.route(
        "/api-docs/openapi.json",
        get(move || async move { axum::Json(api) }),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
