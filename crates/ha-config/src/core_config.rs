//! Core Home Assistant configuration
//!
//! Parses the `homeassistant:` section of configuration.yaml, including the
//! `platform_setup:` policy that governs platform setup retries and timeouts.

use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;
use crate::time_period::{deserialize_optional_period, deserialize_period};

/// Core configuration from the `homeassistant:` section
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub platform_setup: PlatformSetupConfig,
}

/// How platforms are set up and retried
///
/// A platform that is not ready is retried after
/// `retry_interval × min(attempt, retry_max_multiplier)`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSetupConfig {
    #[serde(default = "default_retry_interval", deserialize_with = "deserialize_period")]
    pub retry_interval: Duration,

    #[serde(default = "default_retry_max_multiplier")]
    pub retry_max_multiplier: u32,

    /// Give up after this many retries; unbounded when unset
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_slow_setup_warning", deserialize_with = "deserialize_period")]
    pub slow_setup_warning: Duration,

    #[serde(default = "default_setup_timeout", deserialize_with = "deserialize_period")]
    pub setup_timeout: Duration,

    /// Default poll interval for platforms that declare none
    #[serde(default, deserialize_with = "deserialize_optional_period")]
    pub default_scan_interval: Option<Duration>,
}

fn default_name() -> String {
    "Home".to_string()
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_max_multiplier() -> u32 {
    6
}

fn default_slow_setup_warning() -> Duration {
    Duration::from_secs(10)
}

fn default_setup_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for PlatformSetupConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            retry_max_multiplier: default_retry_max_multiplier(),
            max_retries: None,
            slow_setup_warning: default_slow_setup_warning(),
            setup_timeout: default_setup_timeout(),
            default_scan_interval: None,
        }
    }
}

impl PlatformSetupConfig {
    /// Delay before retry number `tries` (1-based)
    pub fn retry_delay(&self, tries: u32) -> Duration {
        self.retry_interval
            .saturating_mul(tries.clamp(1, self.retry_max_multiplier.max(1)))
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            platform_setup: PlatformSetupConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load core configuration from `configuration.yaml` in a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), "configuration.yaml")?;
        Self::from_yaml(&yaml)
    }

    /// Parse from the root of a loaded configuration
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let mapping = yaml
            .as_mapping()
            .ok_or_else(|| ConfigError::invalid("root", "configuration must be a mapping"))?;

        match mapping.get("homeassistant") {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(section) => serde_yaml::from_value(section.clone())
                .map_err(|e| ConfigError::invalid("homeassistant", e)),
        }
    }
}
