//! HTTP status API for the relay server
//!
//! This module provides read-only HTTP endpoints:
//! - `GET /api` service banner
//! - `GET /api/health` liveness check
//! - `GET /api/spaces` live spaces with member counts and owners
//! - `GET /api/spaces/:space_id` members of one space
//!
//! The collaboration protocol itself is served on the WebSocket port.

pub mod error;
pub mod response;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::error::ApiError;
use crate::api::response::{ServiceInfo, SpaceDetail, SpacesResponse};
use crate::state::AppState;

/// Create the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api", get(service_info).fallback(method_not_allowed))
        .route("/api/health", get(health_check))
        .route("/api/spaces", get(list_spaces))
        .route("/api/spaces/:space_id", get(space_detail))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn service_info(State(state): State<Arc<AppState>>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: format!("{} API is running", state.config.server_name),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: crate::VERSION,
    })
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn list_spaces(State(state): State<Arc<AppState>>) -> Json<SpacesResponse> {
    let spaces = state.registry.summaries();
    Json(SpacesResponse {
        connections: state.session_manager.count(),
        space_count: spaces.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        spaces,
    })
}

async fn space_detail(
    State(state): State<Arc<AppState>>,
    Path(space_id): Path<String>,
) -> Result<Json<SpaceDetail>, ApiError> {
    if !state.registry.contains(&space_id) {
        return Err(ApiError::NotFound(format!("Space {}", space_id)));
    }
    Ok(Json(SpaceDetail {
        owner: state.registry.owner_of(&space_id),
        members: state.registry.members_of(&space_id),
        space_id,
    }))
}
