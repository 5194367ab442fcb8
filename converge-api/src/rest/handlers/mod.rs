mod objects;

use axum::extract::{Query, State};
use axum::{Json, http::StatusCode, response::IntoResponse};
use converge_engine::{ObjectKey, QueueError, RecordedEvent, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

pub use objects::*;

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u32,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            code: 404,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            code: 400,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            404 => StatusCode::NOT_FOUND,
            409 => StatusCode::CONFLICT,
            400 => StatusCode::BAD_REQUEST,
            503 => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => ApiError {
                error: format!("not found: {}", msg),
                code: 404,
            },
            StoreError::Conflict(msg) => ApiError {
                error: msg,
                code: 409,
            },
            e @ StoreError::VersionMismatch { .. } => ApiError {
                error: e.to_string(),
                code: 409,
            },
            StoreError::Internal(msg) => ApiError {
                error: msg,
                code: 500,
            },
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError {
            error: e.to_string(),
            code: 503,
        }
    }
}

/// Version information
#[derive(Serialize)]
pub struct VersionInfo {
    pub version: String,
}

/// Get service version
pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Deserialize)]
pub struct EventsQuery {
    /// Only events of this object (`<namespace>/<name>`).
    pub object: Option<String>,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub events: Vec<RecordedEvent>,
}

/// List recorded audit events, oldest first.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let object = query
        .object
        .map(|s| s.parse::<ObjectKey>())
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    Ok(Json(EventsResponse {
        events: state.events.events(object.as_ref()),
    }))
}
