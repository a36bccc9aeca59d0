//! Status HTTP server.
//!
//! Serves the engine's [`StatusSnapshot`] as JSON at `GET /status`.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::status::{SharedStatus, StatusSnapshot};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

async fn get_status(State(status): State<SharedStatus>) -> Json<StatusSnapshot> {
    let snapshot = status.read().await.clone();
    Json(snapshot)
}

pub fn create_status_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(status)
}

/// Serve `status` on `addr` until the task is dropped
pub async fn run_status_server(status: SharedStatus, addr: SocketAddr) -> Result<(), ServerError> {
    let app = create_status_router(status);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
