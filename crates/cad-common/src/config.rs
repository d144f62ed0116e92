//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the simulator runtime."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_initial_readings() -> usize {
    8640
}

fn default_min_watts() -> u32 {
    50
}

fn default_max_watts() -> u32 {
    1000
}

fn default_variance_watts() -> u32 {
    20
}

fn default_change_rate() -> f64 {
    0.3
}

fn default_cost_per_kwh() -> f64 {
    0.12
}

fn default_device_tick() -> Duration {
    Duration::from_millis(5000)
}

fn default_broadcast_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_keep_alive_timeout() -> Duration {
    Duration::from_millis(15_000)
}

fn default_timeout_notice() -> String {
    "Connection Timing Out".to_owned()
}

fn default_outbound_capacity() -> usize {
    32
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_subprotocol() -> String {
    "echo-protocol".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_file_enabled() -> bool {
    true
}

/// Primary configuration object for the simulator daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CAD_SIM_CONFIG";

    /// Load configuration from disk, respecting the `CAD_SIM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// The environment override must point at a readable file. Candidates are
    /// probed in order and skipped when absent; if none exist the defaults of
    /// the reference deployment are returned.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.device.validate()?;
        self.broker.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Parameters of the simulated metering device.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Number of synthetic readings seeded at start (24h at 10s spacing).
    #[serde(default = "default_initial_readings")]
    pub initial_readings: usize,
    #[serde(default = "default_min_watts")]
    pub min_watts: u32,
    #[serde(default = "default_max_watts")]
    pub max_watts: u32,
    #[serde(default = "default_variance_watts")]
    pub variance_watts: u32,
    /// Probability per generated reading that the baseline jumps.
    #[serde(default = "default_change_rate")]
    pub change_rate: f64,
    #[serde(default = "default_cost_per_kwh")]
    pub cost_per_kwh: f64,
    #[serde(default = "default_device_tick")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    /// Fixed seed for reproducible runs; entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            initial_readings: default_initial_readings(),
            min_watts: default_min_watts(),
            max_watts: default_max_watts(),
            variance_watts: default_variance_watts(),
            change_rate: default_change_rate(),
            cost_per_kwh: default_cost_per_kwh(),
            tick_interval: default_device_tick(),
            seed: None,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_watts > self.max_watts {
            return Err(anyhow!(
                "device.min_watts ({}) must not exceed device.max_watts ({})",
                self.min_watts,
                self.max_watts
            ));
        }
        if !(0.0..=1.0).contains(&self.change_rate) {
            return Err(anyhow!(
                "device.change_rate must lie within [0, 1], got {}",
                self.change_rate
            ));
        }
        if !self.cost_per_kwh.is_finite() || self.cost_per_kwh < 0.0 {
            return Err(anyhow!(
                "device.cost_per_kwh must be a non-negative number, got {}",
                self.cost_per_kwh
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(anyhow!("device.tick_interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Subscription, keep-alive and push settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broadcast_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub broadcast_interval: Duration,
    #[serde(default = "default_keep_alive_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub keep_alive_timeout: Duration,
    #[serde(default = "default_timeout_notice")]
    pub timeout_notice: String,
    /// Per-client queue depth; pushes beyond it are dropped for that client.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default)]
    pub echo_messages: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: default_broadcast_interval(),
            keep_alive_timeout: default_keep_alive_timeout(),
            timeout_notice: default_timeout_notice(),
            outbound_capacity: default_outbound_capacity(),
            echo_messages: false,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.broadcast_interval.is_zero() {
            return Err(anyhow!("broker.broadcast_interval must be greater than zero"));
        }
        if self.keep_alive_timeout.is_zero() {
            return Err(anyhow!("broker.keep_alive_timeout must be greater than zero"));
        }
        if self.outbound_capacity == 0 {
            return Err(anyhow!("broker.outbound_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            subprotocol: default_subprotocol(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subprotocol.trim().is_empty() {
            return Err(anyhow!("server.subprotocol cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_file_enabled")]
    pub file_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_enabled: default_file_enabled(),
        }
    }
}
