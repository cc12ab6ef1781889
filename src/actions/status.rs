//! Liveness and service identity endpoints

use axum::Json;
use serde::Serialize;

pub const SERVICE_NAME: &str = "safety-alert-bot";

#[derive(Debug, Serialize, PartialEq)]
pub struct ServiceIdentity {
    pub status: &'static str,
    pub service: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// GET /
pub async fn root() -> Json<ServiceIdentity> {
    Json(ServiceIdentity {
        status: "ok",
        service: SERVICE_NAME,
    })
}

/// GET /health
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}
