//! Settings loaded with Figment.
//!
//! Settings are merged from, in increasing priority:
//! 1. built-in defaults
//! 2. `config/measurement_group.toml`
//! 3. environment variables prefixed with `MNTGRP_`, sections separated by `__`
//!
//! # Example
//! ```no_run
//! use daq_measurement_group::settings::MeasurementGroupSettings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // MNTGRP_DEFAULTS__NB_STARTS=3 overrides [defaults] nb_starts
//! let settings = MeasurementGroupSettings::load()?;
//! settings.validate()?;
//! println!("nb_starts: {}", settings.defaults.nb_starts);
//! # Ok(())
//! # }
//! ```

use crate::defs::{AcqMode, SynchDomain};
use crate::error::AppResult;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "config/measurement_group.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MNTGRP_";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementGroupSettings {
    /// Initial acquisition parameters of new groups
    #[serde(default)]
    pub defaults: GroupDefaults,
    /// Logging setup
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Initial acquisition parameters of new groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefaults {
    /// Starts armed by each prepare
    #[serde(default = "default_nb_starts")]
    pub nb_starts: u64,
    /// Acquisition mode
    #[serde(default)]
    pub acquisition_mode: AcqMode,
    /// Domain the software synchronizer starts in
    #[serde(default)]
    pub sw_synch_initial_domain: SynchDomain,
    /// Rewrite configuration names into their canonical form
    #[serde(default = "default_use_fqdn")]
    pub use_fqdn: bool,
    /// Capacity of the element event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Capacity of the change notification channel
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

/// Logging setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_nb_starts() -> u64 {
    1
}

fn default_use_fqdn() -> bool {
    true
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_notification_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for GroupDefaults {
    fn default() -> Self {
        Self {
            nb_starts: default_nb_starts(),
            acquisition_mode: AcqMode::default(),
            sw_synch_initial_domain: SynchDomain::default(),
            use_fqdn: default_use_fqdn(),
            event_queue_capacity: default_event_queue_capacity(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Accepted log levels
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Accepted log formats
pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl MeasurementGroupSettings {
    /// Load from the default settings file and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load from a specific file path and environment variables.
    ///
    /// A missing file is not an error: defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.defaults.nb_starts == 0 {
            return Err("Invalid nb_starts 0. Must be at least 1".to_string());
        }

        if self.defaults.event_queue_capacity == 0 || self.defaults.notification_capacity == 0 {
            return Err("Channel capacities must be at least 1".to_string());
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        let format = self.logging.format.to_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                LOG_FORMATS.join(", ")
            ));
        }

        Ok(())
    }
}
