// ABOUTME: Fleet configuration loading and validation.
// ABOUTME: TOML file with connection timing, ports, framing limits, and the agent list.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::backoff::BackoffPolicy;
use crate::codec::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_NAVIGATION_PRECISION, MAX_NAVIGATION_PRECISION};
use crate::connection::ConnectionSettings;
use crate::error::{FleetError, Result};
use crate::link::LinkSettings;
use crate::types::AgentConfiguration;

pub const STATUS_DATA_PORT: u16 = 48101;
/// Reserved by the firmware for map streaming; never connected.
pub const MAP_DATA_PORT: u16 = 48102;
pub const CONTROL_CMD_PORT: u16 = 48201;
pub const NAVIGATION_CMD_PORT: u16 = 48202;

/// Top-level configuration structure for fleetcomm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub ports: PortConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfiguration>,
}

/// Reconnect timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Extra random delay as a fraction of the base delay, in `[0, 1]`.
    pub jitter: f64,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            jitter: 0.2,
            connect_timeout_ms: 3_000,
        }
    }
}

/// Per-agent TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub status: u16,
    pub map: u16,
    pub control: u16,
    pub navigation: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            status: STATUS_DATA_PORT,
            map: MAP_DATA_PORT,
            control: CONTROL_CMD_PORT,
            navigation: NAVIGATION_CMD_PORT,
        }
    }
}

/// Wire framing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    pub max_frame_bytes: usize,
    /// Decimal places used for navigation coordinates.
    pub navigation_precision: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            navigation_precision: DEFAULT_NAVIGATION_PRECISION,
        }
    }
}

impl FleetConfig {
    /// Load configuration from the specified path or default location.
    ///
    /// Default location: `~/.config/fleetcomm/fleet.toml`
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML text, expanding `$VAR` references first.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        // Undefined variables expand to empty with a warning.
        let contents = shellexpand::env_with_context_no_errors(contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        let config: FleetConfig = toml::from_str(&contents)
            .map_err(|e| FleetError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path (~/.config/fleetcomm/fleet.toml).
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("fleetcomm").join("fleet.toml"))
            .ok_or_else(|| FleetError::Config("Could not determine config path".into()))
    }

    /// Check ranges and uniqueness.
    pub fn validate(&self) -> Result<()> {
        let c = &self.connection;
        if c.initial_backoff_ms == 0 {
            return Err(FleetError::Config(
                "connection.initial_backoff_ms must be greater than 0".into(),
            ));
        }
        if c.max_backoff_ms < c.initial_backoff_ms {
            return Err(FleetError::Config(
                "connection.max_backoff_ms must be >= initial_backoff_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.jitter) {
            return Err(FleetError::Config(
                "connection.jitter must be between 0 and 1".into(),
            ));
        }
        if c.connect_timeout_ms == 0 {
            return Err(FleetError::Config(
                "connection.connect_timeout_ms must be greater than 0".into(),
            ));
        }

        let p = &self.ports;
        if [p.status, p.map, p.control, p.navigation].contains(&0) {
            return Err(FleetError::Config("ports must be non-zero".into()));
        }

        if self.framing.max_frame_bytes == 0 {
            return Err(FleetError::Config(
                "framing.max_frame_bytes must be greater than 0".into(),
            ));
        }
        if self.framing.navigation_precision > MAX_NAVIGATION_PRECISION {
            return Err(FleetError::Config(format!(
                "framing.navigation_precision must be at most {}",
                MAX_NAVIGATION_PRECISION
            )));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.id.as_str().is_empty() {
                return Err(FleetError::Config(format!(
                    "agent '{}' has an empty id",
                    agent.name
                )));
            }
            if !seen.insert(&agent.id) {
                return Err(FleetError::Config(format!(
                    "duplicate agent id {}",
                    agent.id
                )));
            }
        }
        Ok(())
    }

    /// Settings every agent link is built with.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            connection: ConnectionSettings {
                backoff: BackoffPolicy::new(
                    Duration::from_millis(self.connection.initial_backoff_ms),
                    Duration::from_millis(self.connection.max_backoff_ms),
                )
                .with_jitter(self.connection.jitter),
                connect_timeout: Duration::from_millis(self.connection.connect_timeout_ms),
            },
            ports: self.ports,
            max_frame_bytes: self.framing.max_frame_bytes,
            navigation_precision: self.framing.navigation_precision,
        }
    }
}
