//! Configuration for allowance-rs

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AllowanceError, Result};
use crate::quota::{Cadence, CalendarBoundary, Zone};

/// Environment prefix for [`Config::load`] overrides
pub const ENV_PREFIX: &str = "ALLOWANCE";

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub period: PeriodConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Quota tracker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// Save on every `consume` / `grant_extra` unless told otherwise
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    /// Allowance for participants without a stored quota
    #[serde(default = "default_initial_allowance")]
    pub initial_allowance: u32,
    /// Grant one implicit bonus per period
    #[serde(default = "default_true")]
    pub time_bonus: bool,
}

/// Replenishment period configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeriodConfig {
    #[serde(default)]
    pub cadence: Cadence,
    /// Time zone the calendar is evaluated in: an IANA name ("Europe/Paris")
    /// or a fixed offset ("+02:00")
    #[serde(default = "default_timezone", alias = "utc_offset")]
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_initial_allowance() -> u32 {
    crate::quota::DEFAULT_ALLOWANCE
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_database_url() -> String {
    "sqlite://allowance.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            initial_allowance: default_initial_allowance(),
            time_bonus: true,
        }
    }
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            timezone: default_timezone(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PeriodConfig {
    /// Build the calendar boundary this section describes
    pub fn boundary(&self) -> Result<CalendarBoundary> {
        let zone = Zone::parse(&self.timezone)?;
        Ok(CalendarBoundary::new(self.cadence, zone))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AllowanceError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| AllowanceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load an optional TOML file, then apply `ALLOWANCE__<SECTION>__<KEY>`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AllowanceError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tracker.initial_allowance == 0 {
            return Err(AllowanceError::Config(
                "initial_allowance must be at least 1".to_string(),
            ));
        }

        if self.storage.database_url.trim().is_empty() {
            return Err(AllowanceError::Config(
                "database_url must not be empty".to_string(),
            ));
        }

        self.period.boundary()?;

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(AllowanceError::Config(format!(
                "Unknown log format '{}'",
                other
            ))),
        }
    }
}
