// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! HTTP endpoints exposing a prometheus registry in the text format

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const METRICS_PATH: &str = "/metrics";
const HEALTHZ_PATH: &str = "/healthz";

const METRICS_INDEX: &str = r#"<html>
<head><title>Istio Metrics Server</title></head>
<body>
<h1>Istio Metrics</h1>
<ul>
<li><a href="/metrics">metrics</a></li>
<li><a href="/healthz">healthz</a></li>
</ul>
</body>
</html>"#;

const TELEMETRY_INDEX: &str = r#"<html>
<head><title>Istio-State-Metrics Metrics Server</title></head>
<body>
<h1>Istio-State-Metrics Metrics</h1>
<ul>
<li><a href="/metrics">metrics</a></li>
</ul>
</body>
</html>"#;

/// Router for the resource metrics endpoint
pub fn metrics_router(registry: prometheus::Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(handle_metrics))
        .route(HEALTHZ_PATH, get(|| async { "ok" }))
        .route("/", get(|| async { Html(METRICS_INDEX) }))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Router for the exporter's own metrics
pub fn telemetry_router(registry: prometheus::Registry) -> Router {
    Router::new()
        .route(METRICS_PATH, get(handle_metrics))
        .route("/", get(|| async { Html(TELEMETRY_INDEX) }))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn handle_metrics(State(registry): State<prometheus::Registry>) -> Response {
    // Collection walks every snapshot; keep it off the async workers
    let rendered = tokio::task::spawn_blocking(move || render(&registry)).await;
    match rendered {
        Ok(Ok(body)) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Metrics rendering task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e)).into_response()
        }
    }
}

/// Gather `registry` and encode it in the text exposition format
pub fn render(registry: &prometheus::Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics are not valid UTF-8")
}

/// Serve `router` on `addr` until `token` is cancelled
pub async fn serve(
    name: &'static str,
    addr: String,
    router: Router,
    token: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {} server to {}", name, addr))?;
    info!(server = %name, address = %addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .with_context(|| format!("{} server failed", name))?;

    info!(server = %name, "Server stopped");
    Ok(())
}
