use std::time::Instant;

use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use tracing::{debug, error, info, warn};

/// Logs method, path, status and latency of every request. Health probes
/// are logged at debug level only.
pub async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(req).await;
    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    if path.starts_with("/health") {
        debug!(%method, %path, status, latency_ms, "request");
    } else if response.status().is_server_error() {
        error!(%method, %path, status, latency_ms, "request");
    } else if response.status().is_client_error() {
        warn!(%method, %path, status, latency_ms, "request");
    } else {
        info!(%method, %path, status, latency_ms, "request");
    }

    response
}
