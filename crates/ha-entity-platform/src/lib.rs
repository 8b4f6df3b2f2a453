//! Entity platforms and components for Home Assistant
//!
//! - [`Entity`]: a device or service exposed as one state
//! - [`PlatformAdapter`]: an integration that creates entities for a domain
//! - [`EntityPlatform`]: one adapter bound to one domain; owns setup retries,
//!   entity id assignment, polling and teardown
//! - [`EntityComponent`]: every platform of a domain, plus discovery, config
//!   entries and entity services
//! - [`HomeAssistant`]: the container of core subsystems passed to all of them

pub mod adapter;
pub mod discovery;
pub mod entity;
pub mod entity_component;
pub mod entity_platform;
pub mod error;
pub mod hass;
pub mod registry;
pub mod service;

pub use adapter::{AddEntities, BlockingPlatformAdapter, PlatformAdapter, PlatformContext};
pub use discovery::{listen_platform, load_platform};
pub use entity::{entity_handle, Entity, EntityHandle, StateWriter, UpdateKind};
pub use entity_component::{
    ComponentOptions, EntityComponent, EntityRef, EntryForwarder, PlatformKey,
};
pub use entity_platform::{
    EntityPlatform, MembershipListener, PlatformOptions, PlatformState, DEFAULT_SCAN_INTERVAL,
};
pub use error::{ComponentError, EntityError, EntityPlatformError, PlatformError, PlatformResult};
pub use hass::{HomeAssistant, LoadedComponents};
pub use registry::PlatformRegistry;
pub use service::{expand_entity_ids, group_members};
