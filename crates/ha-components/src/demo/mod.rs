//! Demo integration
//!
//! Provides a `demo` platform for the `sensor` and `switch` components, set
//! up either from YAML:
//!
//! ```yaml
//! sensor:
//!   - platform: demo
//! switch:
//!   - platform: demo
//!     switches:
//!       - name: Porch light
//!         initial: true
//! ```
//!
//! or from a config entry of domain `demo`, forwarded to both components.

mod sensor;
mod switch;

pub use sensor::{DemoSensor, DemoSensorPlatform, SensorConfig};
pub use switch::{DemoSwitch, DemoSwitchPlatform, SwitchConfig, SWITCH_SERVICES};

use ha_entity_platform::{PlatformError, PlatformRegistry, PlatformResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// Integration name, also the domain of demo config entries
pub const DEMO_DOMAIN: &str = "demo";

/// Register the demo adapters for every component they support
pub fn register_demo_platforms(platforms: &PlatformRegistry) {
    platforms.register("sensor", DEMO_DOMAIN, DemoSensorPlatform);
    platforms.register("switch", DEMO_DOMAIN, DemoSwitchPlatform);
    debug!("Registered demo platforms");
}

/// Read the item list under `key`, or `defaults` when the block has none
///
/// Items that fail to deserialize are logged and skipped so the rest of the
/// list still loads.
fn parse_items<T: DeserializeOwned>(
    config: &Value,
    key: &str,
    defaults: impl FnOnce() -> Vec<T>,
) -> PlatformResult<Vec<T>> {
    let items = match config.get(key) {
        None | Some(Value::Null) => return Ok(defaults()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(PlatformError::failed(format!(
                "invalid demo config: {} must be a list",
                key
            )))
        }
    };

    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<T>(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(index, "Skipping invalid item in demo {}: {}", key, err);
                None
            }
        })
        .collect())
}

/// Render a number without a trailing `.0`
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", (value * 100.0).round() / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(54.0), "54");
        assert_eq!(format_number(-5.0), "-5");
        assert_eq!(format_number(15.6), "15.6");
        assert_eq!(format_number(15.6 + 0.2), "15.8");
    }

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Item {
        name: String,
    }

    #[test]
    fn test_parse_items_skips_invalid_entries() {
        let config = serde_json::json!({"items": [{"name": "a"}, {"nom": "b"}, 7, {"name": "c"}]});
        let items: Vec<Item> = parse_items(&config, "items", Vec::new).unwrap();
        let names: Vec<_> = items.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_parse_items_defaults_and_bad_shape() {
        let defaults = || vec![Item { name: "default".into() }];
        let missing: Vec<Item> = parse_items(&serde_json::json!({}), "items", defaults).unwrap();
        assert_eq!(missing, defaults());

        let scalar = parse_items::<Item>(&serde_json::json!({"items": "a"}), "items", Vec::new);
        assert!(scalar.is_err());
    }

    #[test]
    fn test_registers_both_components() {
        let platforms = PlatformRegistry::new();
        register_demo_platforms(&platforms);

        assert!(platforms.contains("sensor", DEMO_DOMAIN));
        assert!(platforms.contains("switch", DEMO_DOMAIN));
        assert_eq!(platforms.len(), 2);
    }
}
