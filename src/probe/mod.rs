//! Probe gateway: executes one probe attempt for a channel.
//!
//! Supports HTTP, TCP, and DNS probes. The gateway always resolves to an
//! outcome within the channel's timeout plus a small grace margin; probe
//! errors never escape this boundary.

mod dns;
mod http;
mod tcp;

pub use dns::run_dns_probe;
pub use http::run_http_probe;
pub use tcp::run_tcp_probe;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::model::Channel;

/// Probe error types. Internal to the gateway: callers only see outcomes.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result of one probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn ok(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms: 0.0,
            error: Some(error.into()),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes one probe attempt. Must resolve (never reject), bounded by the
/// channel's timeout.
pub trait ProbeGateway: Send + Sync {
    fn probe<'a>(&'a self, channel: &'a Channel) -> BoxFuture<'a, ProbeOutcome>;
}

/// The real gateway: dispatches on the channel's probe type and enforces
/// the timeout as an outer bound in case a probe misbehaves.
pub struct NetworkGateway;

impl ProbeGateway for NetworkGateway {
    fn probe<'a>(&'a self, channel: &'a Channel) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            let timeout = Duration::from_secs_f64(channel.timeout_secs.max(0.001));
            // Grace margin so the inner probe's own timeout fires first.
            let bound = timeout + Duration::from_millis(250);

            let result = tokio::time::timeout(bound, run_probe(channel, timeout)).await;

            match result {
                Ok(Ok(latency_ms)) => ProbeOutcome::ok(latency_ms),
                Ok(Err(e)) => ProbeOutcome::failed(e.to_string()),
                Err(_) => ProbeOutcome::failed(ProbeError::Timeout(timeout).to_string()),
            }
        })
    }
}

/// Run a single probe attempt, returning latency in milliseconds.
async fn run_probe(channel: &Channel, timeout: Duration) -> Result<f64, ProbeError> {
    match channel.probe_type.as_str() {
        "http" => run_http_probe(&channel.target, timeout).await,
        "tcp" => run_tcp_probe(&channel.target, timeout).await,
        "dns" => run_dns_probe(&channel.target, timeout).await,
        other => Err(ProbeError::Config(format!("unknown probe type: {}", other))),
    }
}
