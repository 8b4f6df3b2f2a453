//! Core types for Home Assistant
//!
//! This crate provides the fundamental types shared by every other crate in
//! the workspace: EntityId, State, Event, Context and ServiceCall, plus the
//! well-known attribute names, state values and event payloads the entity
//! platform publishes.

mod context;
mod entity_id;
mod event;
mod service_call;
mod slug;
mod state;

pub use context::Context;
pub use entity_id::{split_entity_id, valid_entity_id, EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use service_call::{EntityTarget, ServiceCall};
pub use slug::slugify;
pub use state::State;

/// Maximum length for a state value
pub const MAX_STATE_LENGTH: usize = 255;

/// Service-call target matching every entity of a component
pub const ENTITY_MATCH_ALL: &str = "all";

/// Name used for entities that don't provide one
pub const DEVICE_DEFAULT_NAME: &str = "Unnamed Device";

/// Domain of group entities
pub const GROUP_DOMAIN: &str = "group";

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_UNKNOWN: &str = "unknown";
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Well-known attribute keys
pub mod attrs {
    pub const ATTR_ENTITY_ID: &str = "entity_id";
    pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
    pub const ATTR_UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
    pub const ATTR_ICON: &str = "icon";
    pub const ATTR_DEVICE_CLASS: &str = "device_class";
    pub const ATTR_ASSUMED_STATE: &str = "assumed_state";
    pub const ATTR_SUPPORTED_FEATURES: &str = "supported_features";
    pub const ATTR_HIDDEN: &str = "hidden";
}

/// Standard event types used by Home Assistant
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for service calls
    pub const CALL_SERVICE: &str = "call_service";

    /// Event type fired when an integration announces a discovered platform
    pub const PLATFORM_DISCOVERED: &str = "platform_discovered";

    /// Event type for Home Assistant stop
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for CALL_SERVICE events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct CallServiceData {
        pub domain: String,
        pub service: String,
        pub service_data: serde_json::Value,
    }

    impl EventData for CallServiceData {
        fn event_type() -> &'static str {
            CALL_SERVICE
        }
    }

    /// Data for PLATFORM_DISCOVERED events
    ///
    /// `service` is `load_platform.{component}`; `platform` names the
    /// adapter to load inside that component.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct PlatformDiscoveredData {
        pub service: String,
        pub platform: String,
        #[serde(default)]
        pub discovered: serde_json::Value,
    }

    impl EventData for PlatformDiscoveredData {
        fn event_type() -> &'static str {
            PLATFORM_DISCOVERED
        }
    }

    /// Service name used in PLATFORM_DISCOVERED events for a component
    pub fn load_platform_service(component: &str) -> String {
        format!("load_platform.{}", component)
    }
}
