//! Receptionist (gateway server) configuration

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

/// Smallest frame limit that still fits a handshake
pub(crate) const MIN_FRAME_SIZE: usize = 64;

/// Settings of the cluster-side gateway
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceptionistConfig {
    /// TCP bind address for client connections
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Replies buffered per session before the oldest are dropped.
    /// 0 disables buffering.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// How long a one-shot ask waits for the target's reply (e.g. "5s")
    #[serde(default = "default_ask_send_timeout", with = "humantime_serde")]
    pub ask_send_timeout: Duration,

    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Answer `send` to an unknown path with `NoRouteFound`
    pub reply_on_no_match: bool,
}

pub(crate) fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50051))
}

pub(crate) fn default_buffer_size() -> usize {
    1000
}

fn default_ask_send_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(crate) fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

impl Default for ReceptionistConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            buffer_size: default_buffer_size(),
            ask_send_timeout: default_ask_send_timeout(),
            max_frame_size: default_max_frame_size(),
            reply_on_no_match: false,
        }
    }
}

impl ReceptionistConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.ask_send_timeout.is_zero() {
            return Err("receptionist.ask_send_timeout must be greater than zero".to_string());
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(format!(
                "receptionist.max_frame_size must be at least {} bytes",
                MIN_FRAME_SIZE
            ));
        }
        Ok(())
    }
}
