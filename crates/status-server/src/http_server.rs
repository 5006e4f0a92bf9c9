//! HTTP surface: status reads, the event stream and Prometheus metrics.

use crate::broadcaster::Broadcaster;
use crate::inventory::Inventory;
use crate::metrics::MetricsRegistry;
use crate::topic::JwtTopicResolver;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use healthcheck::{HostId, StatusCache};
use prometheus_client::encoding::text::encode;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<StatusCache>,
    pub inventory: Arc<dyn Inventory>,
    pub auth: Arc<JwtTopicResolver>,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

/// Build the application router.
///
/// The broadcaster's streaming handler is mounted at `/api/events`.
pub fn router(state: AppState, broadcaster: &dyn Broadcaster) -> Router {
    Router::new()
        .route("/api/servers/status", get(list_statuses))
        .route("/api/servers/:id/status", get(host_status))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .nest("/api/events", broadcaster.http_handler())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// HTTP server bound to a listener
pub struct HttpServer {
    listener: TcpListener,
    app: Router,
}

impl HttpServer {
    pub fn new(listener: TcpListener, app: Router) -> Self {
        Self { listener, app }
    }

    /// Serve until `cancel` fires, then finish in-flight requests
    pub async fn run(self, cancel: CancellationToken) -> std::io::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "HTTP server listening");
        }

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Handler for `GET /api/servers/status`
async fn list_statuses(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match state.auth.authenticate(&headers) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Status request rejected");
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    };

    Json(state.cache.list_by_owner(claims.user_id).await).into_response()
}

/// Handler for `GET /api/servers/:id/status`
async fn host_status(
    State(state): State<AppState>,
    Path(host_id): Path<HostId>,
    headers: HeaderMap,
) -> Response {
    let claims = match state.auth.authenticate(&headers) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "Status request rejected");
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized");
        }
    };

    match state.inventory.get_host(claims.user_id, host_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "host not found"),
        Err(e) => {
            warn!(host_id, error = %e, "Inventory lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    }

    match state.cache.get(host_id).await {
        Some(record) => Json(record).into_response(),
        None => {
            error!(host_id, "Host is in the inventory but not in the status cache");
            if let Some(ref metrics) = state.metrics {
                metrics.record_error("cache_inconsistency");
            }
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "status unavailable")
        }
    }
}

/// Handler for `GET /metrics`
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(metrics) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &metrics.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
