use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::LoadBalancingPolicy;
use crate::http::server::AppState;
use crate::load_balancer::HealthState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub snapshot_version: u64,
    pub snapshot_loaded_at: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct RouteStatus {
    pub id: String,
    pub host: Option<String>,
    pub path_prefix: String,
    pub cluster: String,
    pub policy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub address: String,
    pub health: HealthState,
    pub active_requests: usize,
    pub max_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct ClusterStatus {
    pub id: String,
    pub load_balancing: LoadBalancingPolicy,
    pub healthy_members: usize,
    pub members: Vec<MemberStatus>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let snapshot = state.snapshot.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        snapshot_version: snapshot.version,
        snapshot_loaded_at: snapshot.loaded_at.to_rfc3339(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Rules in evaluation order.
pub async fn get_routes(State(state): State<AppState>) -> Json<Vec<RouteStatus>> {
    let snapshot = state.snapshot.load();
    let routes = snapshot
        .routes
        .rules()
        .iter()
        .map(|r| RouteStatus {
            id: r.id.clone(),
            host: r.host.as_ref().map(|h| h.host().to_string()),
            path_prefix: r.path.prefix().to_string(),
            cluster: r.cluster.clone(),
            policy: r.policy.clone(),
        })
        .collect();
    Json(routes)
}

pub async fn get_clusters(State(state): State<AppState>) -> Json<Vec<ClusterStatus>> {
    let snapshot = state.snapshot.load();
    let clusters = snapshot
        .clusters
        .clusters()
        .into_iter()
        .map(|c| ClusterStatus {
            id: c.id.clone(),
            load_balancing: c.policy,
            healthy_members: c.healthy_members(),
            members: c
                .members()
                .iter()
                .map(|m| MemberStatus {
                    name: m.name.clone(),
                    address: m.address.clone(),
                    health: m.health(),
                    active_requests: m.active_requests(),
                    max_connections: m.max_connections,
                })
                .collect(),
        })
        .collect();
    Json(clusters)
}
