//! Read-only HTTP view of the status ledger
//!
//! Serves each year's status document as stored on disk, for the
//! monitoring dashboard.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::ledger::StatusLedger;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct AppState {
    pub status_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(status_dir: PathBuf) -> Self {
        Self {
            status_dir: Arc::new(status_dir),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no status document for {0}")]
    NotFound(i32),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = json!({ "code": self.code(), "message": self.to_string() });
        (self.status_code(), Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status/{year}", get(status_document))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(address: SocketAddr, status_dir: PathBuf) -> Result<(), AnyError> {
    info!(status_dir = %status_dir.display(), "Serving status documents");
    let app = router(AppState::new(status_dir));

    let listener = TcpListener::bind(address).await?;
    info!(%address, "nightrelay status server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status_document(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> Result<Response, ServerError> {
    let path = StatusLedger::document_path(&state.status_dir, year);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Ok(([(header::CONTENT_TYPE, "application/json")], text).into_response()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(ServerError::NotFound(year)),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read status document");
            Err(ServerError::Internal(e.to_string()))
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
