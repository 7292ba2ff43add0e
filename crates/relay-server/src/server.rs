//! `RelayServer`: axum HTTP and `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::anonymous_user_id;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::control::{broadcast_handler, notify_handler, status_handler};
use crate::error::{ApiError, HubError};
use crate::health::HealthResponse;
use crate::hub::Hub;
use crate::metrics::{WS_CONNECTIONS_REJECTED_TOTAL, render};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Header carrying the user id when the query parameter is absent.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The realtime hub.
    pub hub: Arc<Hub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server around `hub`.
    pub fn new(config: ServerConfig, hub: Arc<Hub>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/status", get(status_handler))
            .route("/broadcast", post(broadcast_handler))
            .route("/notify", post(notify_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .method_not_allowed_fallback(method_not_allowed)
            .fallback(not_found)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = self.shutdown.spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "relay server listening");
        Ok((addr, handle))
    }

    /// Stop accepting, close every session, and wait for the serve task.
    ///
    /// Returns `false` if the serve task had to be aborted.
    pub async fn stop(&self) -> bool {
        self.shutdown.shutdown();
        self.hub.shutdown().await;
        let clean = self.shutdown.drain(self.config.shutdown_timeout).await;
        info!(clean, "relay server stopped");
        clean
    }

    /// The hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Query parameters of `GET /ws`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Caller-supplied user id.
    pub user_id: Option<String>,
}

/// User id from the query, else the `X-User-ID` header, else a generated one.
pub fn resolve_user_id(query: Option<&str>, headers: &HeaderMap) -> String {
    query
        .filter(|id| !id.trim().is_empty())
        .map(str::to_owned)
        .or_else(|| {
            headers
                .get(USER_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|id| !id.trim().is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(anonymous_user_id)
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return ApiError::UpgradeRequired.into_response();
    };
    let admission = if state.shutdown.is_shutting_down() {
        Err(HubError::ShuttingDown)
    } else {
        state.hub.check_admission()
    };
    if let Err(e) = admission {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(error = %e, "rejecting websocket upgrade");
        return ApiError::from(e).into_response();
    }

    let user_id = resolve_user_id(params.user_id.as_deref(), &headers);
    let hub = state.hub.clone();
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match hub.connect(user_id) {
                Ok((session, outbound)) => run_ws_session(socket, hub, session, outbound).await,
                Err(e) => {
                    counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
                    warn!(error = %e, "dropping upgraded socket");
                }
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::of(&state.hub, state.start_time))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("metrics recorder not installed".into()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render(handle),
    )
        .into_response())
}

async fn method_not_allowed(method: Method, uri: Uri) -> ApiError {
    warn!(%method, path = uri.path(), "method not allowed");
    ApiError::MethodNotAllowed
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_owned())
}
