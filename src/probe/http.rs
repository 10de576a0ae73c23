//! HTTP probe implementation.

use std::time::{Duration, Instant};

use super::ProbeError;

/// Run an HTTP probe against the given address.
///
/// Any 2xx-4xx response counts as reachable; what matters is that the
/// service answered. Returns latency in milliseconds.
pub async fn run_http_probe(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let start = Instant::now();

    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    if response.status().is_server_error() {
        return Err(ProbeError::Network(format!(
            "server error: {}",
            response.status()
        )));
    }

    // Read the full body to measure complete transfer time.
    let _body = response
        .bytes()
        .await
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    Ok(start.elapsed().as_secs_f64() * 1000.0)
}
