//! HTTP API.
//!
//! Routes:
//!
//! | Method | Path                           | Operation            |
//! |--------|--------------------------------|----------------------|
//! | GET    | `/health`                      | status + backend     |
//! | GET    | `/metrics`                     | Prometheus metrics   |
//! | GET    | `/stores`                      | list stores          |
//! | PUT    | `/stores/{store}`              | create store         |
//! | DELETE | `/stores/{store}`              | delete store         |
//! | POST   | `/stores/{store}/set`          | set scalar           |
//! | GET    | `/stores/{store}/get/{key}`    | get scalar           |
//! | PUT    | `/stores/{store}/update`       | update scalar        |
//! | DELETE | `/stores/{store}/del/{key}`    | delete key           |
//! | GET    | `/stores/{store}/keys`         | list keys            |
//! | GET    | `/stores/{store}/items`        | list entries         |
//! | POST   | `/command`                     | list/set commands    |
//! | GET    | `/search`                      | cached search        |
//! | POST   | `/admin/snapshot`              | snapshot now         |

mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{debug, error, info, warn};

use crate::constants::SHUTDOWN_TIMEOUT;
use crate::context::AppContext;
use crate::error::Error;
use types::ErrorResponse;

/// State shared by every handler.
pub struct AppState {
    pub ctx: Arc<AppContext>,
    /// Renders `/metrics`; `None` serves an empty body.
    pub metrics: Option<PrometheusHandle>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(ctx: Arc<AppContext>, metrics: Option<PrometheusHandle>) -> SharedState {
        Arc::new(Self { ctx, metrics })
    }
}

/// Error returned by handlers.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Store(Error),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self::Store(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            Self::Store(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, err.kind(), err.to_string())
            },
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = kind, %message, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = kind, %message, "Request rejected");
        }
        let body = ErrorResponse {
            ok: false,
            error: kind,
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router over shared state.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/stores", get(handlers::list_stores))
        .route(
            "/stores/{store}",
            put(handlers::create_store).delete(handlers::delete_store),
        )
        .route("/stores/{store}/set", post(handlers::set_item))
        .route("/stores/{store}/get/{key}", get(handlers::get_item))
        .route("/stores/{store}/update", put(handlers::update_item))
        .route(
            "/stores/{store}/del/{key}",
            axum::routing::delete(handlers::delete_item),
        )
        .route("/stores/{store}/keys", get(handlers::list_keys))
        .route("/stores/{store}/items", get(handlers::list_items))
        .route("/command", post(handlers::run_command))
        .route("/search", get(handlers::search))
        .route("/admin/snapshot", post(handlers::snapshot_now))
        .with_state(state)
}

/// Serves the API until Ctrl-C / SIGTERM, then drains in-flight requests
/// for at most [`SHUTDOWN_TIMEOUT`].
pub async fn serve(state: SharedState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "rdict listening");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let app = router(state);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            return result
                .context("HTTP server task failed")?
                .context("HTTP server error");
        },
        () = shutdown_signal() => {},
    }

    info!("Shutdown signal received, draining connections");
    let _ = stop_tx.send(());
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await {
        Ok(joined) => joined
            .context("HTTP server task failed")?
            .context("HTTP server error")?,
        Err(_) => warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        ),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
