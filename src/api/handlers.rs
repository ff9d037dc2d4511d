use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{DeviceStatusDto, ReadingDto},
    errors::ApiError,
    AppState,
};

/// One row per watched or seen device: current health plus latest reading.
#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Current state of every device", body = Vec<DeviceStatusDto>),
    ),
    tag = "devices"
)]
pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceStatusDto>> {
    let mut ids = state.monitor.watched_devices();
    ids.extend(state.store.device_ids());
    ids.sort();
    ids.dedup();

    Json(ids.into_iter().map(|id| device_status(&state, id)).collect())
}

/// Health and latest reading for one device. A device that has never
/// reported is still answered, as `offline` with no reading.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/latest",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    responses(
        (status = 200, description = "Current device state", body = DeviceStatusDto),
    ),
    tag = "devices"
)]
pub async fn get_device_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Json<DeviceStatusDto> {
    Json(device_status(&state, device_id))
}

/// Short-term history buffer for one device, oldest first.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/history",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    responses(
        (status = 200, description = "Recent readings", body = Vec<ReadingDto>),
        (status = 404, description = "No readings recorded for this device"),
    ),
    tag = "devices"
)]
pub async fn get_device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<ReadingDto>>, ApiError> {
    let history = state.store.history(&device_id);
    if history.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no readings recorded for device {device_id}"
        )));
    }
    Ok(Json(history.into_iter().map(Into::into).collect()))
}

/// Clear all cached state for a device (used when switching the
/// actively-monitored device).
#[utoipa::path(
    delete,
    path = "/devices/{device_id}",
    params(
        ("device_id" = String, Path, description = "Device ID"),
    ),
    responses(
        (status = 204, description = "Device state cleared"),
    ),
    tag = "devices"
)]
pub async fn clear_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> StatusCode {
    state.store.clear(&device_id);
    StatusCode::NO_CONTENT
}

fn device_status(state: &AppState, device_id: String) -> DeviceStatusDto {
    DeviceStatusDto {
        health: state.monitor.evaluate(&device_id),
        latest: state.store.latest(&device_id).map(Into::into),
        device_id,
    }
}

// ---------------------------------------------------------------------------
// OpenAPI spec struct (used in api/mod.rs)
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(list_devices, get_device_latest, get_device_history, clear_device),
    components(schemas(DeviceStatusDto, ReadingDto, crate::health::DeviceHealth)),
    tags((name = "devices", description = "Synchronized device state endpoints")),
    info(
        title = "Irrigation Monitor API",
        version = "0.1.0",
        description = "Read-only view of synchronized device readings and health"
    )
)]
pub struct ApiDoc;
