//! Endpoints the gateway answers itself.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::http::server::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: &'static str,
    pub timestamp: String,
    pub downstream: BTreeMap<String, String>,
}

/// `GET /`
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    let snapshot = state.snapshot.load();
    let service = &snapshot.config.service;
    Json(ServiceInfo {
        service: service.name.clone(),
        version: service.version.clone(),
        status: "running",
        timestamp: Utc::now().to_rfc3339(),
        downstream: service.downstream.clone(),
    })
}

/// `GET /health`. Liveness of the gateway process only.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
