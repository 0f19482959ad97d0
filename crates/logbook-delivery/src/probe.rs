//! Reachability check used before every send attempt.

use async_trait::async_trait;
use logbook_types::{ConnectivityProbe, ProbeConfig, MAX_PROBE_TIMEOUT};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Opens (and immediately drops) a TCP connection to a well-known address.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout: timeout.min(MAX_PROBE_TIMEOUT),
        }
    }

    pub fn from_config(cfg: &ProbeConfig) -> Self {
        Self::new(cfg.addr.clone(), cfg.timeout())
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.addr, error = %e, "probe connect failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.addr, timeout_ms = self.timeout.as_millis() as u64, "probe timed out");
                false
            }
        }
    }
}
