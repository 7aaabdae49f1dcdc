//! Liveness and legacy echo handlers.

use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - Liveness probe.
///
/// Does not touch storage: it reports healthy whenever the process serves
/// requests, regardless of earlier upload failures.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Echo response of the legacy processing endpoint.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub response: String,
}

/// POST /process - Echo a JSON body back to the caller.
pub async fn process_payload(Json(payload): Json<Value>) -> Json<ProcessResponse> {
    Json(ProcessResponse {
        response: format!("Received: {payload}"),
    })
}
