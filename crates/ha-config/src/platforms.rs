//! Per-platform configuration blocks
//!
//! A domain's platforms may be configured under the domain key itself or
//! under any `"{domain} <suffix>"` key, so several files can contribute:
//!
//! ```yaml
//! sensor:
//!   - platform: demo
//!     scan_interval: 15
//! sensor 2:
//!   platform: demo
//!   entity_namespace: garage
//! ```

use crate::time_period::parse_time_period;
use serde_yaml::Value;
use std::time::Duration;
use tracing::error;

/// Key holding the platform name in a platform block
pub const CONF_PLATFORM: &str = "platform";
pub const CONF_SCAN_INTERVAL: &str = "scan_interval";
pub const CONF_ENTITY_NAMESPACE: &str = "entity_namespace";

/// One validated platform block
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub platform: String,
    pub scan_interval: Option<Duration>,
    pub entity_namespace: Option<String>,
    /// The whole block as JSON, handed to the platform adapter
    pub config: serde_json::Value,
}

impl PlatformConfig {
    /// A block with only a platform name
    pub fn new(platform: impl Into<String>) -> Self {
        let platform = platform.into();
        Self {
            config: serde_json::json!({ CONF_PLATFORM: platform }),
            platform,
            scan_interval: None,
            entity_namespace: None,
        }
    }

    /// Get a typed option from the block
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn from_block(block: &Value) -> Result<Self, String> {
        let map = block
            .as_mapping()
            .ok_or_else(|| "platform block must be a mapping".to_string())?;

        let platform = match map.get(CONF_PLATFORM) {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Some(_) => return Err("'platform' must be a non-empty string".to_string()),
            None => return Err("required key 'platform' not provided".to_string()),
        };

        let scan_interval = match map.get(CONF_SCAN_INTERVAL) {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                parse_time_period(value).map_err(|e| format!("{}: {}", CONF_SCAN_INTERVAL, e))?,
            ),
        };

        let entity_namespace = match map.get(CONF_ENTITY_NAMESPACE) {
            None | Some(Value::Null) => None,
            Some(Value::String(ns)) => Some(ns.clone()),
            Some(other) => {
                return Err(format!("{} must be a string, got {:?}", CONF_ENTITY_NAMESPACE, other))
            }
        };

        let config = serde_json::to_value(block).map_err(|e| e.to_string())?;

        Ok(Self {
            platform,
            scan_interval,
            entity_namespace,
            config,
        })
    }
}

/// Whether `key` is `domain` or `"{domain} <suffix>"`
pub fn is_domain_key(key: &str, domain: &str) -> bool {
    match key.strip_prefix(domain) {
        Some("") => true,
        Some(rest) => rest.starts_with(' ') && !rest.trim().is_empty(),
        None => false,
    }
}

/// Top-level keys of the configuration that configure `domain`
pub fn extract_domain_configs(config: &Value, domain: &str) -> Vec<String> {
    config
        .as_mapping()
        .map(|map| {
            map.keys()
                .filter_map(|k| k.as_str())
                .filter(|k| is_domain_key(k, domain))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Every valid platform block configured for `domain`
///
/// Blocks that fail validation are logged and skipped so the remaining
/// platforms still load.
pub fn config_per_platform(config: &Value, domain: &str) -> Vec<PlatformConfig> {
    let Some(map) = config.as_mapping() else {
        return Vec::new();
    };

    let mut platforms = Vec::new();
    for key in extract_domain_configs(config, domain) {
        let blocks: Vec<&Value> = match map.get(key.as_str()) {
            None | Some(Value::Null) => continue,
            Some(Value::Sequence(seq)) => seq.iter().collect(),
            Some(single) => vec![single],
        };

        for block in blocks {
            match PlatformConfig::from_block(block) {
                Ok(platform) => platforms.push(platform),
                Err(reason) => {
                    error!(domain = %domain, key = %key, "Invalid config for [{}]: {}", key, reason)
                }
            }
        }
    }
    platforms
}

/// Top-level domains present in the configuration, suffixes stripped
pub fn configured_domains(config: &Value) -> Vec<String> {
    let mut domains: Vec<String> = config
        .as_mapping()
        .map(|map| {
            map.keys()
                .filter_map(|k| k.as_str())
                .map(|k| k.split(' ').next().unwrap_or(k).to_string())
                .collect()
        })
        .unwrap_or_default();
    domains.sort();
    domains.dedup();
    domains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_domain_keys() {
        assert!(is_domain_key("sensor", "sensor"));
        assert!(is_domain_key("sensor 2", "sensor"));
        assert!(is_domain_key("sensor garage", "sensor"));
        assert!(!is_domain_key("sensors", "sensor"));
        assert!(!is_domain_key("sensor ", "sensor"));
        assert!(!is_domain_key("binary_sensor", "sensor"));
    }

    #[test]
    fn test_list_and_suffixed_blocks() {
        let config = yaml(
            r#"
sensor:
  - platform: demo
    scan_interval: 15
  - platform: other
    host: 10.0.0.2
sensor 2:
  platform: demo
  entity_namespace: garage
switch:
  - platform: demo
"#,
        );

        let platforms = config_per_platform(&config, "sensor");
        assert_eq!(platforms.len(), 3);
        assert_eq!(platforms[0].scan_interval, Some(Duration::from_secs(15)));
        assert_eq!(platforms[1].get::<String>("host").as_deref(), Some("10.0.0.2"));
        assert_eq!(platforms[2].entity_namespace.as_deref(), Some("garage"));
    }

    #[test]
    fn test_invalid_blocks_are_skipped() {
        let config = yaml(
            r#"
switch:
  - host: missing-platform
  - platform: demo
    scan_interval: whenever
  - platform: demo
"#,
        );

        let platforms = config_per_platform(&config, "switch");
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms[0].platform, "demo");
    }

    #[test]
    fn test_configured_domains() {
        let config = yaml("homeassistant: {}\nsensor: []\nsensor 2: {platform: demo}\nswitch: []\n");
        assert_eq!(configured_domains(&config), vec!["homeassistant", "sensor", "switch"]);
    }
}
