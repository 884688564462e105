//! Preflight reachability check.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{error, info};

use crate::contract::ReachabilityProbe;

/// Probe backed by a bare TCP connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        reachable(host, port, timeout).await
    }
}

/// True only if a TCP connection to `host:port` completes within `timeout`.
/// The connection is dropped straight away.
pub async fn reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            info!(host, port, "Preflight check succeeded");
            true
        }
        Ok(Err(e)) => {
            error!(host, port, error = %e, "Preflight check failed");
            false
        }
        Err(_) => {
            error!(host, port, timeout_ms = timeout.as_millis() as u64, "Preflight check timed out");
            false
        }
    }
}
