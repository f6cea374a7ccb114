//! Configuration
//!
//! One TOML file describes both sides of the gateway:
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [receptionist]
//! bind = "0.0.0.0:50051"
//! ask_send_timeout = "5s"
//!
//! [client]
//! endpoint = "${GATEWAY_HOST:-127.0.0.1}:50051"
//!
//! [metrics]
//! enabled = true
//! ```
//!
//! `${VAR}` / `${VAR:-default}` references are expanded before parsing, and
//! `VIBEGATE__<SECTION>__<KEY>` environment variables override file values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use regex::{Captures, Regex};
use serde::Deserialize;

pub use client::ClientConfig;
pub use metrics::MetricsConfig;
pub use receptionist::ReceptionistConfig;

mod client;
mod metrics;
mod receptionist;


const ENV_PREFIX: &str = "VIBEGATE";

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read
    Read { path: PathBuf, source: std::io::Error },
    /// Malformed TOML or a value of the wrong shape
    Toml(toml::de::Error),
    /// Merging file, environment and defaults failed
    Layer(config::ConfigError),
    /// Values parsed but make no sense together
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            Self::Toml(e) => write!(f, "invalid TOML: {}", e),
            Self::Layer(e) => write!(f, "{}", e),
            Self::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Toml(e) => Some(e),
            Self::Layer(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        Self::Layer(e)
    }
}

/// Replace `${VAR}` and `${VAR:-default}` with values from the environment.
/// Unset variables without a default expand to the empty string.
fn expand_env_refs(content: &str) -> String {
    static ENV_REF: OnceLock<Regex> = OnceLock::new();
    let re = ENV_REF.get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap());

    re.replace_all(content, |caps: &Captures| {
        std::env::var(&caps[1])
            .unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
    })
    .into_owned()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    /// Cluster-side gateway
    pub receptionist: ReceptionistConfig,
    /// External-side gateway
    pub client: ClientConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug or trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (a missing file means "defaults only"), then apply
    /// `VIBEGATE__*` overrides and validate.
    ///
    /// `VIBEGATE__RECEPTIONIST__BIND=0.0.0.0:50051` overrides `receptionist.bind`,
    /// `VIBEGATE__CLIENT__ASK_TIMEOUT=10s` overrides `client.ask_timeout`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = Self::layered_defaults()?;
        if let Some(content) = read_optional(path.as_ref())? {
            builder = builder.add_source(File::from_str(&expand_env_refs(&content), FileFormat::Toml));
        }

        let merged = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = merged.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, no file
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse TOML directly; no expansion and no environment overrides
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults registered with the layered builder, so environment
    /// overrides of single keys still deserialize into complete sections
    fn layered_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = Config::default();
        let receptionist = &defaults.receptionist;
        let client = &defaults.client;

        Ok(config::Config::builder()
            .set_default("log.level", defaults.log.level.clone())?
            .set_default("receptionist.bind", receptionist.bind.to_string())?
            .set_default("receptionist.buffer_size", receptionist.buffer_size as u64)?
            .set_default("receptionist.ask_send_timeout", millis(receptionist.ask_send_timeout))?
            .set_default("receptionist.max_frame_size", receptionist.max_frame_size as u64)?
            .set_default("receptionist.reply_on_no_match", receptionist.reply_on_no_match)?
            .set_default("client.endpoint", client.endpoint.clone())?
            .set_default("client.buffer_size", client.buffer_size as u64)?
            .set_default("client.ask_timeout", millis(client.ask_timeout))?
            .set_default("client.connect_timeout", millis(client.connect_timeout))?
            .set_default("client.max_frame_size", client.max_frame_size as u64)?
            .set_default("metrics.enabled", defaults.metrics.enabled)?
            .set_default("metrics.bind", defaults.metrics.bind.to_string())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.log.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "log.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log.level
            )));
        }

        self.receptionist.validate().map_err(ConfigError::Invalid)?;
        self.client.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

/// Duration in a form `humantime-serde` reads back
fn millis(duration: std::time::Duration) -> String {
    format!("{}ms", duration.as_millis())
}

/// File contents, or None if there is no file at `path`
fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}
