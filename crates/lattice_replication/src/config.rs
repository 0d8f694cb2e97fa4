//! # Replication Configuration
//!
//! Sizing for the registries, loaded once at startup from TOML.
//!
//! ```toml
//! max_objects = 131072
//! max_groups = 2048
//! initial_poller_slots = 8
//! tick_rate = 30
//! ```
//!
//! Every field is optional and falls back to [`ReplicationConfig::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default object capacity.
pub const DEFAULT_MAX_OBJECTS: usize = 65_536;

/// Default group capacity.
pub const DEFAULT_MAX_GROUPS: usize = 1024;

/// Default number of poller slots reserved up front.
pub const DEFAULT_POLLER_SLOTS: usize = 4;

/// Default scheduler tick rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Sizing shared by the dirty, group and poll registries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Number of dense object indices the registries address.
    pub max_objects: usize,
    /// Number of group slots, excluding the reserved handle 0.
    pub max_groups: usize,
    /// Poller slots reserved up front; more are added on demand.
    pub initial_poller_slots: usize,
    /// Scheduler ticks per second, used to turn update rates into periods.
    pub tick_rate: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_objects: DEFAULT_MAX_OBJECTS,
            max_groups: DEFAULT_MAX_GROUPS,
            initial_poller_slots: DEFAULT_POLLER_SLOTS,
            tick_rate: DEFAULT_TICK_RATE,
        }
    }
}

impl ReplicationConfig {
    /// Parses and validates a config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML and
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise
    /// the errors of [`ReplicationConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            max_objects = config.max_objects,
            max_groups = config.max_groups,
            "loaded replication config"
        );
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_objects == 0 {
            return Err(ConfigError::Invalid("max_objects must be greater than zero".into()));
        }
        if self.max_objects > u32::MAX as usize {
            return Err(ConfigError::Invalid("max_objects cannot exceed u32::MAX".into()));
        }
        if self.max_groups == 0 {
            return Err(ConfigError::Invalid("max_groups must be greater than zero".into()));
        }
        // Handle 0 is reserved, so u16::MAX usable handles at most.
        if self.max_groups > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_groups cannot exceed {}",
                u16::MAX
            )));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be greater than zero".into()));
        }
        Ok(())
    }
}
