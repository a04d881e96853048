//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every member of the current snapshot
//! - Update member health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::load_balancer::Backend;
use crate::observability::metrics;
use crate::pipeline::snapshot::SharedSnapshot;

pub struct HealthMonitor {
    snapshot: SharedSnapshot,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(snapshot: SharedSnapshot) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(2)));
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self { snapshot, client }
    }

    /// Probe on every tick until shutdown. Settings are re-read from the
    /// snapshot each tick, so reloads take effect without a restart.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut period = self.interval();
        let mut ticker = time::interval(period);

        tracing::info!(interval = ?period, "Health monitor starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.snapshot.load_full();
                    let config = &snapshot.config.health_check;
                    if config.enabled {
                        self.check_all(snapshot.clusters.all_backends(), config).await;
                    }

                    let next = self.interval();
                    if next != period {
                        tracing::info!(interval = ?next, "Health check interval changed");
                        period = next;
                        ticker = time::interval_at(time::Instant::now() + period, period);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.snapshot.load().config.health_check.interval_secs.max(1))
    }

    async fn check_all(&self, backends: Vec<Arc<Backend>>, config: &HealthCheckConfig) {
        join_all(backends.iter().map(|b| self.check_one(b, config))).await;
    }

    async fn check_one(&self, backend: &Backend, config: &HealthCheckConfig) {
        let uri = format!("http://{}{}", backend.authority, config.path);
        let request = match Request::builder()
            .method("GET")
            .uri(&uri)
            .header(header::USER_AGENT, "marketplace-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(uri = %uri, error = %e, "Failed to build health check request");
                return;
            }
        };

        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let healthy = match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(member = %backend.id(), status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(member = %backend.id(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(member = %backend.id(), "Health check failed: timeout");
                false
            }
        };

        if healthy {
            if backend.mark_success(config.healthy_threshold as usize) {
                tracing::info!(member = %backend.id(), "Member recovered");
            }
        } else if backend.mark_failure(config.unhealthy_threshold as usize) {
            tracing::warn!(member = %backend.id(), "Member marked unhealthy");
        }

        metrics::record_backend_health(&backend.id(), backend.is_healthy());
    }
}
