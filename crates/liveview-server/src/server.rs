//! `LiveServer`: Axum HTTP + WebSocket host for liveview pages.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use liveview_core::constants::SESSIONS_REJECTED_TOTAL;
use liveview_core::SessionId;
use liveview_runtime::RuntimeConfig;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::page::Page;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{run_session, SessionLimiter, SessionParams};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Runtime settings handed to every session.
    pub runtime: RuntimeConfig,
    /// Shutdown coordinator; sessions run under its child tokens.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Connected-session cap.
    pub limiter: Arc<SessionLimiter>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
    /// Number of mounted pages.
    pub pages: usize,
}

/// The liveview server.
pub struct LiveServer {
    config: Arc<ServerConfig>,
    runtime: RuntimeConfig,
    pages: Vec<Arc<Page>>,
    shutdown: Arc<ShutdownCoordinator>,
    limiter: Arc<SessionLimiter>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl LiveServer {
    /// Create a server with no pages mounted.
    pub fn new(config: ServerConfig, runtime: RuntimeConfig) -> Self {
        let limiter = Arc::new(SessionLimiter::new(config.max_connections));
        Self {
            config: Arc::new(config),
            runtime,
            pages: Vec::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            limiter,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Mount a page. A page at an already mounted path replaces it.
    #[must_use]
    pub fn page(mut self, page: Page) -> Self {
        if let Some(pos) = self.pages.iter().position(|p| p.path() == page.path()) {
            warn!(path = page.path(), "page already mounted, replacing");
            let _ = self.pages.remove(pos);
        }
        self.pages.push(Arc::new(page));
        self
    }

    /// Serve `GET /metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: Arc::clone(&self.config),
            runtime: self.runtime.clone(),
            shutdown: Arc::clone(&self.shutdown),
            limiter: Arc::clone(&self.limiter),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            pages: self.pages.len(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler));

        for page in &self.pages {
            let shell = {
                let page = Arc::clone(page);
                move || {
                    let page = Arc::clone(&page);
                    async move { Html(page.render_shell()) }
                }
            };
            let upgrade = {
                let page = Arc::clone(page);
                move |ws: WebSocketUpgrade, State(state): State<AppState>| {
                    ws_handler(ws, state, Arc::clone(&page))
                }
            };

            let path = page.path();
            if path != "/" {
                router = router.route(path.trim_end_matches('/'), get(shell.clone()));
            }
            router = router
                .route(path, get(shell))
                .route(&page.ws_path(), get(upgrade));
            debug!(path, ws = %page.ws_path(), "page mounted");
        }

        router.with_state(state).layer(TraceLayer::new_for_http())
    }

    /// Bind and serve in the background.
    ///
    /// Returns the bound address and the serve task. The task ends once
    /// [`ShutdownCoordinator::shutdown`] is called.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = result {
                error!(error = %err, "server terminated with error");
            }
        });

        info!(
            addr = %local_addr,
            pages = self.pages.len(),
            max_connections = self.config.max_connections,
            "liveview server listening"
        );
        Ok((local_addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sessions currently connected.
    pub fn active_sessions(&self) -> usize {
        self.limiter.active()
    }

    /// Mounted page paths, in mount order.
    pub fn page_paths(&self) -> Vec<&str> {
        self.pages.iter().map(|p| p.path()).collect()
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.limiter.active(),
        state.limiter.max(),
        state.pages,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET `<page>ws_goliveview`: claim a session slot, then upgrade.
async fn ws_handler(ws: WebSocketUpgrade, state: AppState, page: Arc<Page>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let Some(permit) = state.limiter.try_acquire() else {
        counter!(SESSIONS_REJECTED_TOTAL).increment(1);
        warn!(
            max = state.limiter.max(),
            path = page.path(),
            "session limit reached, rejecting upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
    };

    let params = SessionParams {
        runtime: state.runtime.clone(),
        heartbeat: state.config.heartbeat_interval(),
        cancel: state.shutdown.session_token(),
    };
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            let _ = run_session(socket, SessionId::new(), page, params).await;
        })
}
