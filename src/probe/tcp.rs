//! TCP connect probe implementation.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use super::ProbeError;

/// Run a TCP probe: open a connection to `host:port` and measure how long
/// the handshake takes. Returns latency in milliseconds.
pub async fn run_tcp_probe(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    if !address.contains(':') {
        return Err(ProbeError::Config(format!(
            "tcp target must be host:port, got {}",
            address
        )));
    }

    let start = Instant::now();

    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("connect failed: {}", e)))?;

    let latency = start.elapsed().as_secs_f64() * 1000.0;
    drop(stream);

    Ok(latency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_port_is_a_config_error() {
        let result = run_tcp_probe("example.com", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }

    #[tokio::test]
    async fn closed_port_fails() {
        let result = run_tcp_probe("127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn open_port_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let latency = run_tcp_probe(&addr.to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(latency >= 0.0);
    }
}
