//! Service call type for invoking Home Assistant services

use crate::attrs::ATTR_ENTITY_ID;
use crate::{Context, ENTITY_MATCH_ALL};
use serde::{Deserialize, Serialize};

/// A call to a registered service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// The domain the service belongs to (e.g., "light", "switch")
    pub domain: String,

    /// The service name (e.g., "turn_on", "turn_off", "toggle")
    pub service: String,

    /// Data passed to the service (e.g., entity_id, brightness)
    pub service_data: serde_json::Value,

    pub context: Context,
}

/// What the `entity_id` field of a service call addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTarget {
    /// The call carried no `entity_id` field
    Missing,
    /// `entity_id: all`
    All,
    /// Explicit ids, lowercased, in call order
    Ids(Vec<String>),
}

impl ServiceCall {
    /// Create a new service call
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// Get the full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Get a value from service_data
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get entity_id(s) from service data
    ///
    /// Accepts a single id, a comma separated string, or a list.
    pub fn entity_ids(&self) -> Vec<String> {
        match self.entity_target() {
            EntityTarget::Ids(ids) => ids,
            _ => vec![],
        }
    }

    /// Classify the `entity_id` field of this call
    pub fn entity_target(&self) -> EntityTarget {
        let raw = match self.service_data.get(ATTR_ENTITY_ID) {
            None | Some(serde_json::Value::Null) => return EntityTarget::Missing,
            Some(value) => value,
        };

        let ids: Vec<String> = match raw {
            serde_json::Value::String(s) => {
                if s.trim().eq_ignore_ascii_case(ENTITY_MATCH_ALL) {
                    return EntityTarget::All;
                }
                s.split(',')
                    .map(|part| part.trim().to_lowercase())
                    .filter(|part| !part.is_empty())
                    .collect()
            }
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_lowercase())
                .collect(),
            _ => vec![],
        };

        EntityTarget::Ids(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(data: serde_json::Value) -> ServiceCall {
        ServiceCall::new("light", "turn_on", data, Context::new())
    }

    #[test]
    fn test_get_service_data() {
        let call = call(json!({"brightness": 200, "transition": 2.5}));
        assert_eq!(call.get::<i32>("brightness"), Some(200));
        assert_eq!(call.get::<f64>("transition"), Some(2.5));
        assert_eq!(call.get::<String>("missing"), None);
        assert_eq!(call.service_id(), "light.turn_on");
    }

    #[test]
    fn test_entity_target_missing() {
        assert_eq!(call(json!({})).entity_target(), EntityTarget::Missing);
        assert_eq!(
            call(json!({"entity_id": null})).entity_target(),
            EntityTarget::Missing
        );
    }

    #[test]
    fn test_entity_target_all() {
        assert_eq!(
            call(json!({"entity_id": "all"})).entity_target(),
            EntityTarget::All
        );
    }

    #[test]
    fn test_entity_target_list_and_comma_string() {
        assert_eq!(
            call(json!({"entity_id": ["light.a", "Light.B"]})).entity_ids(),
            vec!["light.a", "light.b"]
        );
        assert_eq!(
            call(json!({"entity_id": "light.a, light.b"})).entity_ids(),
            vec!["light.a", "light.b"]
        );
    }
}
