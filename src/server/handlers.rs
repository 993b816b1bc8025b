//! HTTP route handlers

use axum::{
    extract::{rejection::JsonRejection, Extension, Json, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, instrument, warn};

use crate::engine::Status;
use crate::error::Error;
use crate::model::{Capacities, LotCounters, LotId, VehicleType};
use crate::server::AppState;

/// Maximum lot name length
const MAX_NAME_LEN: usize = 255;

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct CreateLotRequest {
    pub name: String,
    /// Type name to count; spaces are numbered in the order given
    pub capacities: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct CapacitiesRequest {
    pub capacities: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ParkRequest {
    pub vehicle_type: String,
}

#[derive(Debug, Deserialize)]
pub struct UnparkRequest {
    pub space_number: i64,
}

#[derive(Debug, Serialize)]
pub struct LotResponse {
    pub success: bool,
    pub message: String,
    pub parking_lot_id: LotId,
}

#[derive(Debug, Serialize)]
pub struct ParkResponse {
    pub success: bool,
    pub message: String,
    pub space_number: u32,
}

#[derive(Debug, Serialize)]
pub struct UnparkResponse {
    pub success: bool,
    pub message: String,
    pub freed_spaces: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: Status,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub counters: LotCounters,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

// ===== Error mapping =====

/// Engine error carried to the client
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidArgument(rejection.body_text()))
    }
}

/// Transport status for an engine error
pub fn status_code(error: &Error) -> StatusCode {
    match error {
        Error::LotNotFound(_) | Error::SpaceNotFound { .. } => StatusCode::NOT_FOUND,
        Error::VehicleTypeUnknown(_) | Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::NoAvailableSpace { .. } => StatusCode::CONFLICT,
        Error::Conflict(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Storage(_) | Error::Cache(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ===== Input validation =====

fn lot_id(raw: &str) -> ApiResult<LotId> {
    Ok(raw.parse::<LotId>()?)
}

fn capacities(raw: Map<String, Value>) -> ApiResult<Capacities> {
    let mut pairs = Vec::with_capacity(raw.len());
    for (name, count) in raw {
        let count = count
            .as_u64()
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "capacity for {} must be a non-negative integer",
                    name
                ))
            })?;
        pairs.push((name, count));
    }
    Ok(Capacities::from_names(pairs)?)
}

// ===== Handlers =====

/// POST /api/parking-lots
#[instrument(skip(state, payload))]
pub async fn create_lot(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CreateLotRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<LotResponse>)> {
    let Json(req) = payload?;
    let name = req.name.trim().to_string();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "name must be between 1 and {} characters",
            MAX_NAME_LEN
        ))
        .into());
    }
    let capacities = capacities(req.capacities)?;

    let lot = state.engine.create_lot(Some(name), &capacities).await?;
    Ok((
        StatusCode::CREATED,
        Json(LotResponse {
            success: true,
            message: "New parking lot created successfully".to_string(),
            parking_lot_id: lot.id,
        }),
    ))
}

/// POST /api/parking-lots/:id/initialize
#[instrument(skip(state, payload))]
pub async fn initialize_lot(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CapacitiesRequest>, JsonRejection>,
) -> ApiResult<Json<LotResponse>> {
    let lot = lot_id(&id)?;
    let Json(req) = payload?;
    let capacities = capacities(req.capacities)?;

    let lot = state.engine.initialize_lot(lot, &capacities).await?;
    Ok(Json(LotResponse {
        success: true,
        message: "Parking lot initialized successfully".to_string(),
        parking_lot_id: lot.id,
    }))
}

/// PUT /api/parking-lots/:id/reinitialize
#[instrument(skip(state, payload))]
pub async fn reinitialize_lot(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CapacitiesRequest>, JsonRejection>,
) -> ApiResult<Json<LotResponse>> {
    let lot = lot_id(&id)?;
    let Json(req) = payload?;
    let capacities = capacities(req.capacities)?;

    let lot = state.engine.reinitialize_lot(lot, &capacities).await?;
    Ok(Json(LotResponse {
        success: true,
        message: "Parking lot reinitialized successfully".to_string(),
        parking_lot_id: lot.id,
    }))
}

/// POST /api/parking-lots/:id/park
#[instrument(skip(state, payload))]
pub async fn park(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ParkRequest>, JsonRejection>,
) -> ApiResult<Json<ParkResponse>> {
    let lot = lot_id(&id)?;
    let Json(req) = payload?;
    let vehicle_type: VehicleType = req.vehicle_type.parse()?;

    let space_number = state.engine.park(lot, vehicle_type).await?;
    Ok(Json(ParkResponse {
        success: true,
        message: "Vehicle parked successfully".to_string(),
        space_number,
    }))
}

/// POST /api/parking-lots/:id/unpark
#[instrument(skip(state, payload))]
pub async fn unpark(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UnparkRequest>, JsonRejection>,
) -> ApiResult<Json<UnparkResponse>> {
    let lot = lot_id(&id)?;
    let Json(req) = payload?;
    let space_number = u32::try_from(req.space_number)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| Error::InvalidArgument("space_number must be at least 1".to_string()))?;

    let freed_spaces = state.engine.unpark(lot, space_number).await?;
    Ok(Json(UnparkResponse {
        success: true,
        message: "Vehicle unparked successfully".to_string(),
        freed_spaces,
    }))
}

/// GET /api/parking-lots/:id/status
#[instrument(skip(state))]
pub async fn status(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let lot = lot_id(&id)?;
    let status = state.engine.status(lot).await?;
    Ok(Json(StatusResponse {
        success: true,
        status,
    }))
}

/// POST /api/parking-lots/:id/sync-capacity-cache
#[instrument(skip(state))]
pub async fn sync_capacity_cache(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<SyncResponse>> {
    let lot = lot_id(&id)?;
    let drift = state.engine.verify_cache(lot).await?;
    if !drift.is_consistent() {
        warn!(lot = %lot, "Repairing availability cache drift");
    }
    let counters = state.engine.sync_cache(lot).await?;
    Ok(Json(SyncResponse {
        success: true,
        message: "Capacity cache synchronized successfully".to_string(),
        counters,
    }))
}
