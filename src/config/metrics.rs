//! Metrics endpoint configuration

use serde::Deserialize;
use std::net::SocketAddr;

/// Prometheus HTTP endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve /metrics and /health
    pub enabled: bool,
    /// HTTP bind address
    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,
}

fn default_metrics_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9464))
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}
