//! Gateway client configuration

use serde::Deserialize;
use std::time::Duration;

use super::receptionist::{default_buffer_size, default_max_frame_size, MIN_FRAME_SIZE};

/// Settings of the external-side gateway client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Receptionist address as `host:port`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Commands buffered per caller before the oldest are dropped.
    /// 0 disables buffering.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Deadline of a one-shot ask round trip
    #[serde(default = "default_ask_timeout", with = "humantime_serde")]
    pub ask_timeout: Duration,

    /// Deadline for establishing a connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_endpoint() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_ask_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            buffer_size: default_buffer_size(),
            ask_timeout: default_ask_timeout(),
            connect_timeout: default_connect_timeout(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ClientConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("client.endpoint must not be empty".to_string());
        }
        if self.ask_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err("client timeouts must be greater than zero".to_string());
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(format!(
                "client.max_frame_size must be at least {} bytes",
                MIN_FRAME_SIZE
            ));
        }
        Ok(())
    }
}
