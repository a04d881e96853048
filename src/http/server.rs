//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway's own endpoints and the proxy fallback
//! - Wire up middleware (request ID, tracing, CORS, body limit)
//! - Bind server to listener
//! - Apply config updates as snapshot swaps
//! - Run background tasks (health monitor, quota sweeper) until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, GatewayConfig};
use crate::health::HealthMonitor;
use crate::http::info;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::observability::metrics;
use crate::pipeline::snapshot::{self, GatewaySnapshot, SharedSnapshot};
use crate::pipeline::GatewayPipeline;
use crate::security::cors::cors_layer;
use crate::security::rate_limit::{run_sweeper, QuotaTracker};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub snapshot: SharedSnapshot,
    pub pipeline: Arc<GatewayPipeline>,
    pub started_at: Instant,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
    tracker: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
}

impl HttpServer {
    /// Validate `config` and build the first snapshot.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GatewayConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let snapshot = GatewaySnapshot::build(config, None)?.into_shared();
        let tracker = Arc::new(QuotaTracker::new());
        let pipeline = Arc::new(GatewayPipeline::new(tracker.clone(), clock.clone()));

        Ok(Self {
            state: AppState {
                snapshot,
                pipeline,
                started_at: Instant::now(),
            },
            tracker,
            clock,
        })
    }

    /// State shared with the admin listener.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        self.state.snapshot.clone()
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// CORS and the body limit are fixed at startup.
    pub fn router(&self) -> Router {
        let snapshot = self.state.snapshot.load();
        let config = &snapshot.config;

        Router::new()
            .route("/", get(info::service_info).fallback(proxy_handler))
            .route("/health", get(info::health).fallback(proxy_handler))
            .fallback(proxy_handler)
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(cors_layer(&config.cors))
                    .map_response(|res: Response<_>| res.map(Body::new))
                    .layer(RequestBodyLimitLayer::new(config.security.max_body_size)),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let monitor = HealthMonitor::new(self.state.snapshot.clone());
        tokio::spawn(monitor.run(shutdown.resubscribe()));

        let sweep = Duration::from_secs(
            self.state
                .snapshot
                .load()
                .config
                .ip_rate_limiting
                .sweep_interval_secs
                .max(1),
        );
        tokio::spawn(run_sweeper(
            self.tracker.clone(),
            self.clock.clone(),
            sweep,
            shutdown.resubscribe(),
        ));

        let shared = self.state.snapshot.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => {
                        let Some(config) = update else { break };
                        apply_update(&shared, config);
                    }
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn apply_update(shared: &SharedSnapshot, config: GatewayConfig) {
    match snapshot::reload(shared, config) {
        Ok(version) => {
            tracing::info!(version, "Configuration reloaded");
            metrics::record_config_reload(true);
        }
        Err(e) => {
            tracing::error!(error = %e, "Rejected configuration update, keeping current snapshot");
            metrics::record_config_reload(false);
        }
    }
}

/// Everything that is not one of the gateway's own endpoints.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let snapshot = state.snapshot.load_full();
    state.pipeline.handle(snapshot, request, peer).await
}
