//! Time period parsing for `scan_interval` and the platform setup policy
//!
//! Accepted forms:
//! - a number of seconds (`30`, `2.5`)
//! - `"HH:MM"` or `"HH:MM:SS"` (seconds may carry a fraction)
//! - a mapping of `days`, `hours`, `minutes`, `seconds`, `milliseconds`

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;
use std::time::Duration;

pub fn parse_time_period(value: &Value) -> ConfigResult<Duration> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ConfigError::InvalidTimePeriod(n.to_string()))
            .and_then(seconds),
        Value::String(s) => parse_time_period_str(s),
        Value::Mapping(map) => {
            let mut total = 0.0;
            for (key, amount) in map {
                let unit = key
                    .as_str()
                    .ok_or_else(|| ConfigError::InvalidTimePeriod(format!("{:?}", key)))?;
                let factor = match unit {
                    "days" => 86_400.0,
                    "hours" => 3_600.0,
                    "minutes" => 60.0,
                    "seconds" => 1.0,
                    "milliseconds" => 0.001,
                    other => {
                        return Err(ConfigError::InvalidTimePeriod(format!(
                            "unknown unit '{}'",
                            other
                        )))
                    }
                };
                let amount = amount
                    .as_f64()
                    .ok_or_else(|| ConfigError::InvalidTimePeriod(format!("{}: {:?}", unit, amount)))?;
                total += amount * factor;
            }
            seconds(total)
        }
        other => Err(ConfigError::InvalidTimePeriod(format!("{:?}", other))),
    }
}

/// Parse `"HH:MM"`, `"HH:MM:SS"` or a bare number of seconds
pub fn parse_time_period_str(text: &str) -> ConfigResult<Duration> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<f64>() {
        return seconds(secs);
    }

    let invalid = || ConfigError::InvalidTimePeriod(text.to_string());
    let parts: Vec<&str> = text.split(':').collect();
    let (hours, minutes, secs) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };

    let hours: u64 = hours.parse().map_err(|_| invalid())?;
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    let secs: f64 = secs.parse().map_err(|_| invalid())?;
    seconds((hours * 3_600 + minutes * 60) as f64 + secs)
}

fn seconds(value: f64) -> ConfigResult<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidTimePeriod(value.to_string()));
    }
    Ok(Duration::from_secs_f64(value))
}

/// `deserialize_with` helper for a required time period
pub fn deserialize_period<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_time_period(&value).map_err(serde::de::Error::custom)
}

/// `deserialize_with` helper for an optional time period
pub fn deserialize_optional_period<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => parse_time_period(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
