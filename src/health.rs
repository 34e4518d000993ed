//! Liveness endpoint for hosting platforms that probe over HTTP.

use std::net::SocketAddr;

use anyhow::Context;
use axum::{response::Html, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "telegrab";

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    timestamp: String,
}

async fn index() -> Html<&'static str> {
    Html("<html><body><h1>telegrab is running</h1><p>Status: Active ✅</p></body></html>")
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "healthy",
        service: SERVICE,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

/// Serve until `token` is cancelled.
pub async fn serve(bind: SocketAddr, token: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("unable to bind health endpoint on {bind}"))?;
    tracing::info!(%bind, "health endpoint listening");
    axum::serve(listener, router())
        .with_graceful_shutdown(token.cancelled_owned())
        .await
        .context("health endpoint failed")
}
