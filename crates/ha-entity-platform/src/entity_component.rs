//! EntityComponent: every platform of one domain
//!
//! A component sets up the platforms configured under its domain key, loads
//! platforms announced through discovery, owns one platform per config
//! entry, routes entity services to the entities they target and maintains
//! the optional all-entities group (`group.all_switches`).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use ha_config::{config_per_platform, PlatformConfig};
use ha_config_entries::{ConfigEntry, ConfigEntryHandler, EntrySetupError};
use ha_core::attrs::{ATTR_ENTITY_ID, ATTR_FRIENDLY_NAME, ATTR_HIDDEN};
use ha_core::events::StateChangedData;
use ha_core::{
    slugify, Context, EntityId, EntityTarget, ServiceCall, GROUP_DOMAIN, STATE_OFF, STATE_ON,
};
use ha_service_registry::{ServiceError, ServiceResult};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::PlatformAdapter;
use crate::discovery::listen_platform;
use crate::entity::EntityHandle;
use crate::entity_platform::{EntityPlatform, MembershipListener, PlatformOptions, PlatformState};
use crate::error::{ComponentError, EntityError};
use crate::hass::HomeAssistant;
use crate::service::expand_entity_ids;

/// How a component keys its platforms
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlatformKey {
    /// A YAML block or discovery request
    Config {
        platform: String,
        scan_interval: Option<Duration>,
        namespace: Option<String>,
    },
    /// A config entry, by entry id
    Entry(String),
}

#[derive(Debug, Clone, Default)]
pub struct ComponentOptions {
    /// Default poll interval for this domain's platforms
    pub scan_interval: Option<Duration>,
    /// Friendly name of the all-entities group, e.g. `all switches`; no
    /// group when unset
    pub group_name: Option<String>,
}

/// An entity together with the platform that owns it
#[derive(Clone)]
pub struct EntityRef {
    pub entity_id: EntityId,
    pub handle: EntityHandle,
    pub platform: Arc<EntityPlatform>,
}

impl std::fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRef")
            .field("entity_id", &self.entity_id)
            .field("platform", &self.platform.full_name())
            .finish()
    }
}

struct ComponentInner {
    hass: HomeAssistant,
    domain: String,
    options: ComponentOptions,
    platforms: Mutex<IndexMap<PlatformKey, Arc<EntityPlatform>>>,
    discovery_task: Mutex<Option<JoinHandle<()>>>,
    group_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ComponentInner {
    fn platforms(&self) -> Vec<Arc<EntityPlatform>> {
        lock(&self.platforms).values().cloned().collect()
    }

    fn entity_ids(&self) -> Vec<String> {
        self.platforms()
            .iter()
            .flat_map(|platform| platform.entity_ids())
            .collect()
    }

    /// `group.{slug of the group name}`, e.g. `group.all_switches`
    fn group_id(&self) -> Option<EntityId> {
        let name = self.options.group_name.as_ref()?;
        EntityId::new(GROUP_DOMAIN, slugify(name)).ok()
    }

    /// Rewrite the group state from the current membership
    fn update_group(&self) {
        let (Some(name), Some(group_id)) = (&self.options.group_name, self.group_id()) else {
            return;
        };

        let mut members = self.entity_ids();
        members.sort();
        let any_on = members
            .iter()
            .any(|id| self.hass.states.is_state(id, STATE_ON));

        let attributes = HashMap::from([
            (ATTR_ENTITY_ID.to_string(), json!(members)),
            (ATTR_FRIENDLY_NAME.to_string(), json!(name)),
            (ATTR_HIDDEN.to_string(), json!(true)),
        ]);
        self.hass.states.set(
            group_id,
            if any_on { STATE_ON } else { STATE_OFF },
            attributes,
            Context::new(),
        );
    }
}

/// Aggregates the platforms of one domain
///
/// Cloning is cheap and clones share the same platforms.
#[derive(Clone)]
pub struct EntityComponent {
    inner: Arc<ComponentInner>,
}

impl EntityComponent {
    pub fn new(hass: HomeAssistant, domain: impl Into<String>) -> Self {
        Self::with_options(hass, domain, ComponentOptions::default())
    }

    pub fn with_options(
        hass: HomeAssistant,
        domain: impl Into<String>,
        options: ComponentOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ComponentInner {
                hass,
                domain: domain.into(),
                options,
                platforms: Mutex::new(IndexMap::new()),
                discovery_task: Mutex::new(None),
                group_task: Mutex::new(None),
            }),
        }
    }

    fn from_weak(inner: &Weak<ComponentInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    pub fn hass(&self) -> &HomeAssistant {
        &self.inner.hass
    }

    pub fn platforms(&self) -> Vec<Arc<EntityPlatform>> {
        self.inner.platforms()
    }

    pub fn get_platform(&self, key: &PlatformKey) -> Option<Arc<EntityPlatform>> {
        lock(&self.inner.platforms).get(key).cloned()
    }

    /// Set up every platform configured for this domain
    ///
    /// Platforms are set up concurrently; one failing never stops the
    /// others. Also starts listening for discovered platforms.
    pub async fn setup(&self, config: &ha_config::Value) {
        self.start_listeners();

        let blocks = config_per_platform(config, &self.inner.domain);
        debug!(domain = %self.inner.domain, platforms = blocks.len(), "Setting up component");

        join_all(blocks.into_iter().map(|block| async move {
            if let Err(err) = self.setup_platform(block, None).await {
                error!(domain = %self.inner.domain, "{}", err);
            }
        }))
        .await;
    }

    /// Set up one platform block, reusing the platform with the same key
    pub async fn setup_platform(
        &self,
        config: PlatformConfig,
        discovery_info: Option<Value>,
    ) -> Result<bool, ComponentError> {
        let adapter = self.adapter(&config.platform)?;
        let key = PlatformKey::Config {
            platform: config.platform.clone(),
            scan_interval: config.scan_interval,
            namespace: config.entity_namespace.clone(),
        };

        let platform = {
            let mut platforms = lock(&self.inner.platforms);
            let platform = platforms.entry(key).or_insert_with(|| {
                self.new_platform(
                    config.platform.clone(),
                    adapter,
                    PlatformOptions {
                        scan_interval: config.scan_interval,
                        default_scan_interval: self.inner.options.scan_interval,
                        entity_namespace: config.entity_namespace.clone(),
                        config_entry: None,
                    },
                )
            });
            Arc::clone(platform)
        };

        Ok(platform.setup(config, discovery_info).await)
    }

    /// Set up the platform for a config entry
    ///
    /// The entry's domain names the platform adapter to use.
    pub async fn setup_entry(&self, entry: &ConfigEntry) -> Result<bool, ComponentError> {
        let adapter = self.adapter(&entry.domain)?;
        let key = PlatformKey::Entry(entry.entry_id.clone());

        let platform = {
            let mut platforms = lock(&self.inner.platforms);
            if platforms.contains_key(&key) {
                return Err(ComponentError::EntryAlreadySetUp(entry.entry_id.clone()));
            }
            let platform = self.new_platform(
                entry.domain.clone(),
                adapter,
                PlatformOptions {
                    default_scan_interval: self.inner.options.scan_interval,
                    config_entry: Some(entry.clone()),
                    ..Default::default()
                },
            );
            platforms.insert(key, Arc::clone(&platform));
            platform
        };

        self.start_listeners();
        Ok(platform.setup_entry().await)
    }

    /// Reset and forget the platform of a config entry
    pub async fn unload_entry(&self, entry_id: &str) -> Result<(), ComponentError> {
        let platform = lock(&self.inner.platforms)
            .shift_remove(&PlatformKey::Entry(entry_id.to_string()))
            .ok_or_else(|| ComponentError::EntryNotLoaded(entry_id.to_string()))?;

        platform.reset().await;
        info!(domain = %self.inner.domain, entry_id = %entry_id, "Unloaded config entry");
        Ok(())
    }

    pub fn entry_platform(&self, entry_id: &str) -> Option<Arc<EntityPlatform>> {
        self.get_platform(&PlatformKey::Entry(entry_id.to_string()))
    }

    fn adapter(&self, platform: &str) -> Result<Arc<dyn PlatformAdapter>, ComponentError> {
        self.inner
            .hass
            .platforms
            .get(&self.inner.domain, platform)
            .ok_or_else(|| ComponentError::UnknownPlatform {
                domain: self.inner.domain.clone(),
                platform: platform.to_string(),
            })
    }

    fn new_platform(
        &self,
        platform_name: String,
        adapter: Arc<dyn PlatformAdapter>,
        options: PlatformOptions,
    ) -> Arc<EntityPlatform> {
        let weak = Arc::downgrade(&self.inner);
        let listener: MembershipListener = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.update_group();
            }
        });

        EntityPlatform::build(
            self.inner.hass.clone(),
            self.inner.domain.clone(),
            platform_name,
            adapter,
            options,
            Some(listener),
        )
    }

    fn start_listeners(&self) {
        let mut discovery = lock(&self.inner.discovery_task);
        if discovery.is_none() {
            let weak = Arc::downgrade(&self.inner);
            *discovery = Some(listen_platform(
                &self.inner.hass.bus,
                &self.inner.domain,
                move |platform, discovered| {
                    let component = Self::from_weak(&weak);
                    async move {
                        let Some(component) = component else {
                            return;
                        };
                        // Setup may wait on retries; don't hold up the listener
                        tokio::spawn(async move {
                            let config = PlatformConfig::new(platform);
                            if let Err(err) = component.setup_platform(config, Some(discovered)).await {
                                error!(domain = %component.domain(), "{}", err);
                            }
                        });
                    }
                },
            ));
        }
        drop(discovery);

        if self.inner.options.group_name.is_some() {
            let mut group = lock(&self.inner.group_task);
            if group.is_none() {
                *group = Some(self.track_group_members());
            }
        }
    }

    /// Recompute the group whenever a member's state changes
    fn track_group_members(&self) -> JoinHandle<()> {
        let mut rx = self.inner.hass.bus.subscribe_typed::<StateChangedData>();
        let weak = Arc::downgrade(&self.inner);
        let domain = self.inner.domain.clone();

        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if event.data.entity_id.domain() != domain {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let changed = event.data.entity_id.to_string();
                if inner.entity_ids().contains(&changed) {
                    inner.update_group();
                }
            }
        })
    }

    /// Every entity of every platform
    pub fn entities(&self) -> Vec<EntityRef> {
        self.inner
            .platforms()
            .into_iter()
            .flat_map(|platform| {
                platform
                    .entities()
                    .into_iter()
                    .map(move |(entity_id, handle)| EntityRef {
                        entity_id,
                        handle,
                        platform: Arc::clone(&platform),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<EntityRef> {
        self.inner.platforms().into_iter().find_map(|platform| {
            let handle = platform.get_entity(entity_id)?;
            Some(EntityRef {
                entity_id: entity_id.parse().ok()?,
                handle,
                platform,
            })
        })
    }

    /// Remove an entity from whichever platform owns it
    pub async fn remove_entity(&self, entity_id: &str) -> Result<(), ComponentError> {
        for platform in self.inner.platforms() {
            if platform.remove_entity(entity_id).await {
                return Ok(());
            }
        }
        Err(ComponentError::EntityNotFound(entity_id.to_string()))
    }

    /// Available entities addressed by a service call
    ///
    /// `entity_id: all` addresses every entity. With `expand_group`, group
    /// ids are replaced by their members.
    pub async fn extract_from_service(
        &self,
        call: &ServiceCall,
        expand_group: bool,
    ) -> Vec<EntityRef> {
        let wanted: Option<HashSet<String>> = match call.entity_target() {
            EntityTarget::Missing => {
                warn!(
                    "Not passing an entity ID to a service to target all entities is deprecated. \
                     Update your call to {} to be instead: entity_id: all",
                    call.service_id()
                );
                None
            }
            EntityTarget::All => None,
            EntityTarget::Ids(ids) if expand_group => {
                Some(expand_entity_ids(&self.inner.hass.states, ids).into_iter().collect())
            }
            EntityTarget::Ids(ids) => Some(ids.into_iter().collect()),
        };

        let mut targets = Vec::new();
        for entity in self.entities() {
            if let Some(wanted) = &wanted {
                if !wanted.contains(&entity.entity_id.to_string()) {
                    continue;
                }
            }
            if entity.handle.lock().await.available() {
                targets.push(entity);
            }
        }
        targets
    }

    /// Register `{domain}.{service}`, dispatched to the targeted entities
    ///
    /// Polling entities are refreshed after handling the call.
    pub fn register_entity_service(&self, service: &str) {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .hass
            .services
            .register(self.inner.domain.clone(), service, move |call: ServiceCall| {
                let component = Self::from_weak(&weak);
                async move {
                    match component {
                        Some(component) => component.handle_entity_service(call).await,
                        None => Err(ServiceError::CallFailed(format!(
                            "{} is no longer loaded",
                            call.domain
                        ))),
                    }
                }
            });
    }

    async fn handle_entity_service(&self, call: ServiceCall) -> ServiceResult {
        let targets = self.extract_from_service(&call, true).await;
        let results = join_all(targets.iter().map(|target| self.call_entity(target, &call))).await;

        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(ServiceError::CallFailed(err.to_string())),
            None => Ok(()),
        }
    }

    async fn call_entity(&self, target: &EntityRef, call: &ServiceCall) -> Result<(), EntityError> {
        let should_poll = {
            let mut entity = target.handle.lock().await;
            if let Err(err) = entity.handle_service(&call.service, &call.service_data).await {
                error!(
                    entity_id = %target.entity_id,
                    "Error calling {} on {}: {}",
                    call.service_id(),
                    target.entity_id,
                    err
                );
                return Err(err);
            }
            entity.should_poll()
        };

        if should_poll {
            target
                .platform
                .refresh_entity(&target.entity_id.to_string())
                .await;
        }
        Ok(())
    }

    /// Reset every platform, stop listening and drop the group
    pub async fn reset(&self) {
        for slot in [&self.inner.discovery_task, &self.inner.group_task] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }

        let platforms: Vec<Arc<EntityPlatform>> = lock(&self.inner.platforms)
            .drain(..)
            .map(|(_, platform)| platform)
            .collect();
        join_all(platforms.iter().map(|platform| platform.reset())).await;

        if let Some(group_id) = self.inner.group_id() {
            self.inner.hass.states.remove(&group_id, Context::new());
        }
        info!(domain = %self.inner.domain, platforms = platforms.len(), "Component reset");
    }

    /// Reset, then set up again from `config`
    pub async fn reload(&self, config: &ha_config::Value) {
        self.reset().await;
        self.setup(config).await;
    }
}

#[async_trait]
impl ConfigEntryHandler for EntityComponent {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), EntrySetupError> {
        match EntityComponent::setup_entry(self, entry).await {
            Ok(_) => {}
            Err(err) => return Err(EntrySetupError::Failed(err.to_string())),
        }

        // A platform waiting to retry stays loaded; one that failed is
        // dropped so the entry can be set up again.
        let failed = self
            .entry_platform(&entry.entry_id)
            .is_some_and(|platform| platform.state() == PlatformState::Failed);
        if failed {
            let _ = EntityComponent::unload_entry(self, &entry.entry_id).await;
            return Err(EntrySetupError::Failed(format!(
                "platform {} failed to set up",
                entry.domain
            )));
        }
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        EntityComponent::unload_entry(self, &entry.entry_id)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Forwards an integration's config entries to the components it provides
/// platforms for
///
/// Registered under the integration's domain, e.g. `demo` forwarding to the
/// `sensor` and `switch` components.
pub struct EntryForwarder {
    components: Vec<EntityComponent>,
}

impl EntryForwarder {
    pub fn new(components: Vec<EntityComponent>) -> Self {
        Self { components }
    }

    fn targets(&self, entry: &ConfigEntry) -> impl Iterator<Item = &EntityComponent> + '_ {
        let integration = entry.domain.clone();
        self.components.iter().filter(move |component| {
            component
                .hass()
                .platforms
                .contains(component.domain(), &integration)
        })
    }
}

#[async_trait]
impl ConfigEntryHandler for EntryForwarder {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), EntrySetupError> {
        let results = join_all(
            self.targets(entry)
                .map(|component| ConfigEntryHandler::setup_entry(component, entry)),
        )
        .await;
        results.into_iter().collect()
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String> {
        let results = join_all(
            self.targets(entry)
                .map(|component| ConfigEntryHandler::unload_entry(component, entry)),
        )
        .await;
        results.into_iter().collect()
    }
}
