/// Health check endpoint
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected"
/// }
/// ```
///
/// The endpoint always answers 200; `status` is `degraded` when the database
/// is unreachable.

use crate::app::AppState;
use axum::{extract::State, Json};
use changemaker_shared::db::pool::health_check as db_health_check;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on the database probe
const DB_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,

    pub version: String,

    /// `connected` or `disconnected`
    pub database: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = matches!(
        tokio::time::timeout(DB_PROBE_TIMEOUT, db_health_check(&state.db)).await,
        Ok(Ok(()))
    );

    if !connected {
        tracing::warn!("Health check: database unreachable");
    }

    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
    })
}
