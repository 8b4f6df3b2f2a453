//! The HomeAssistant container passed to components, platforms and adapters

use std::path::Path;
use std::sync::Arc;

use dashmap::DashSet;
use ha_config::PlatformSetupConfig;
use ha_config_entries::ConfigEntries;
use ha_event_bus::EventBus;
use ha_registries::{EntityRegistry, Storage};
use ha_service_registry::ServiceRegistry;
use ha_state_store::StateStore;

use crate::registry::PlatformRegistry;

/// Shared handles to every core subsystem
///
/// Cloning is cheap; all fields are reference counted.
#[derive(Clone)]
pub struct HomeAssistant {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub services: Arc<ServiceRegistry>,
    pub entity_registry: Arc<EntityRegistry>,
    pub config_entries: Arc<ConfigEntries>,
    pub platforms: Arc<PlatformRegistry>,
    /// `domain.platform` names that finished setup
    pub components: Arc<LoadedComponents>,
    pub settings: Arc<PlatformSetupConfig>,
    /// Entity ids currently owned by a platform
    pub(crate) entity_ids: Arc<DashSet<String>>,
}

impl HomeAssistant {
    /// Build the core with registries persisted under `config_dir/.storage`
    pub fn new(config_dir: impl AsRef<Path>, settings: PlatformSetupConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            states: Arc::new(StateStore::new(Arc::clone(&bus))),
            services: Arc::new(ServiceRegistry::with_event_bus(Arc::clone(&bus))),
            entity_registry: Arc::new(EntityRegistry::new(Arc::clone(&storage))),
            config_entries: Arc::new(ConfigEntries::new(storage)),
            platforms: Arc::new(PlatformRegistry::new()),
            components: Arc::new(LoadedComponents::default()),
            settings: Arc::new(settings),
            entity_ids: Arc::new(DashSet::new()),
            bus,
        }
    }

    /// Whether some platform currently owns `entity_id`
    pub fn is_entity_owned(&self, entity_id: &str) -> bool {
        self.entity_ids.contains(entity_id)
    }
}

/// Set of loaded `domain.platform` names
#[derive(Debug, Default)]
pub struct LoadedComponents(DashSet<String>);

impl LoadedComponents {
    /// Record a loaded name, returning false if it was already present
    pub fn add(&self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// All names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
