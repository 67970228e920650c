//! Connectivity probes used to tell "no internet" apart from "collector down".
//!
//! Both probes resolve to a plain `bool`; no error escapes this module.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::client::{build_http_client, ClientError};
use crate::config::Config;

/// Reachability checks consulted by the delivery engine on send failure.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Single round-trip reachability check against a well-known external
    /// host. Must resolve within a bounded time.
    async fn probe_external(&self, host: &str) -> bool;

    /// GET the collector's health endpoint; `true` only on HTTP 200.
    async fn probe_collector_health(&self, url: &str) -> bool;
}

/// Probe backed by a TCP handshake and a reqwest GET.
pub struct NetworkProber {
    client: Client,
    probe_timeout: Duration,
}

impl NetworkProber {
    /// Create a prober from the service configuration.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            config.connect_timeout,
            config.read_timeout,
            config.probe_timeout,
        )
    }

    /// Create a prober with custom timeouts.
    pub fn with_settings(
        connect_timeout: Duration,
        read_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(connect_timeout, read_timeout)?,
            probe_timeout,
        })
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe_external(&self, host: &str) -> bool {
        match timeout(self.probe_timeout, TcpStream::connect(host)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(host = %host, error = %e, "External probe failed");
                false
            }
            Err(_) => {
                debug!(
                    host = %host,
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "External probe timed out"
                );
                false
            }
        }
    }

    async fn probe_collector_health(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status != StatusCode::OK {
                    debug!(url = %url, status = %status, "Collector health check failed");
                }
                status == StatusCode::OK
            }
            Err(e) => {
                debug!(url = %url, error = %ClientError::from(e), "Collector health check failed");
                false
            }
        }
    }
}
