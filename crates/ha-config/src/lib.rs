//! YAML configuration loading for Home Assistant
//!
//! Loads `configuration.yaml` with Home Assistant's custom tags (`!include`,
//! `!include_dir_*`, `!secret`, `!env_var`), extracts per-platform blocks for
//! a domain and parses the core `homeassistant:` section.
//!
//! ```ignore
//! let config = ha_config::load_yaml("/config", "configuration.yaml")?;
//! for platform in ha_config::config_per_platform(&config, "sensor") {
//!     println!("{} every {:?}", platform.platform, platform.scan_interval);
//! }
//! ```

mod core_config;
mod error;
mod loader;
mod platforms;
mod time_period;

pub use core_config::{CoreConfig, PlatformSetupConfig};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};
pub use platforms::{
    config_per_platform, configured_domains, extract_domain_configs, is_domain_key,
    PlatformConfig, CONF_ENTITY_NAMESPACE, CONF_PLATFORM, CONF_SCAN_INTERVAL,
};
pub use time_period::{parse_time_period, parse_time_period_str};

pub use serde_yaml::Value;
