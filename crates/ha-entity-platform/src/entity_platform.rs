//! EntityPlatform: one adapter bound to one domain
//!
//! ```text
//! Uninitialized → SettingUp → Ready → Resetting → TornDown
//!                     ↓  ↑
//!                  RetryWait
//!                     ↓
//!                   Failed
//! ```
//!
//! A platform drives its adapter's setup (with timeout and not-ready
//! retries), assigns entity ids, publishes entity state, polls entities on
//! the scan interval and tears everything down on reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use ha_config::PlatformConfig;
use ha_config_entries::ConfigEntry;
use ha_core::{Context, EntityId, DEVICE_DEFAULT_NAME};
use ha_registries::{DisabledBy, EntryOptions};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::adapter::{AddEntities, PlatformAdapter, PlatformContext};
use crate::entity::{publish_state, run_update, Entity, EntityHandle, StateWriter, UpdateKind};
use crate::error::{EntityPlatformError, PlatformError};
use crate::hass::HomeAssistant;

/// Poll interval when neither config, adapter nor component sets one
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformState {
    Uninitialized,
    SettingUp,
    /// Adapter reported not ready; a retry is scheduled
    RetryWait,
    Ready,
    /// Setup failed for good, timed out, or ran out of retries
    Failed,
    Resetting,
    TornDown,
}

impl PlatformState {
    fn accepts_entities(self) -> bool {
        !matches!(self, PlatformState::Resetting | PlatformState::TornDown)
    }
}

/// Construction options for an [`EntityPlatform`]
#[derive(Debug, Clone, Default)]
pub struct PlatformOptions {
    /// Interval from the platform's config block
    pub scan_interval: Option<Duration>,
    /// The owning component's default interval
    pub default_scan_interval: Option<Duration>,
    pub entity_namespace: Option<String>,
    pub config_entry: Option<ConfigEntry>,
}

/// Called after entities are added to or removed from a platform
pub type MembershipListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
enum SetupRequest {
    Platform {
        config: PlatformConfig,
        discovery_info: Option<Value>,
    },
    Entry(ConfigEntry),
}

#[derive(Clone)]
struct PlatformEntity {
    entity_id: EntityId,
    handle: EntityHandle,
    removed: Arc<AtomicBool>,
    name_override: Option<String>,
    should_poll: bool,
}

struct Inner {
    state: PlatformState,
    entities: IndexMap<String, PlatformEntity>,
    /// Scheduled retries, one per not-ready setup request
    retry_tasks: Vec<JoinHandle<()>>,
    /// Retries still sleeping before their next attempt
    waiting_retries: usize,
    poll_task: Option<JoinHandle<()>>,
    poll_cycle: Option<JoinHandle<()>>,
}

pub struct EntityPlatform {
    hass: HomeAssistant,
    domain: String,
    platform_name: String,
    adapter: Arc<dyn PlatformAdapter>,
    scan_interval: Duration,
    entity_namespace: Option<String>,
    config_entry: Option<ConfigEntry>,
    async_updates: Option<Arc<Semaphore>>,
    blocking_updates: Option<Arc<Semaphore>>,
    membership_listener: Option<MembershipListener>,
    inner: Mutex<Inner>,
    poll_lock: Arc<tokio::sync::Mutex<()>>,
    add_lock: tokio::sync::Mutex<()>,
}

impl EntityPlatform {
    pub fn new(
        hass: HomeAssistant,
        domain: impl Into<String>,
        platform_name: impl Into<String>,
        adapter: Arc<dyn PlatformAdapter>,
        options: PlatformOptions,
    ) -> Arc<Self> {
        Self::build(hass, domain.into(), platform_name.into(), adapter, options, None)
    }

    pub(crate) fn build(
        hass: HomeAssistant,
        domain: String,
        platform_name: String,
        adapter: Arc<dyn PlatformAdapter>,
        options: PlatformOptions,
        membership_listener: Option<MembershipListener>,
    ) -> Arc<Self> {
        let scan_interval = options
            .scan_interval
            .or_else(|| adapter.scan_interval())
            .or(options.default_scan_interval)
            .or(hass.settings.default_scan_interval)
            .unwrap_or(DEFAULT_SCAN_INTERVAL);

        // Blocking entities default to one update at a time, async ones to
        // unbounded; a declared limit applies to both.
        let (async_updates, blocking_updates) = match adapter.parallel_updates() {
            None => (None, Some(Arc::new(Semaphore::new(1)))),
            Some(0) => (None, None),
            Some(limit) => {
                let semaphore = Arc::new(Semaphore::new(limit));
                (Some(Arc::clone(&semaphore)), Some(semaphore))
            }
        };

        Arc::new(Self {
            hass,
            domain,
            platform_name,
            adapter,
            scan_interval,
            entity_namespace: options.entity_namespace,
            config_entry: options.config_entry,
            async_updates,
            blocking_updates,
            membership_listener,
            inner: Mutex::new(Inner {
                state: PlatformState::Uninitialized,
                entities: IndexMap::new(),
                retry_tasks: Vec::new(),
                waiting_retries: 0,
                poll_task: None,
                poll_cycle: None,
            }),
            poll_lock: Arc::new(tokio::sync::Mutex::new(())),
            add_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    /// `domain.platform`, the name recorded in `hass.components`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.domain, self.platform_name)
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn config_entry(&self) -> Option<&ConfigEntry> {
        self.config_entry.as_ref()
    }

    pub fn state(&self) -> PlatformState {
        self.inner().state
    }

    /// Setup requests waiting to be retried after a not-ready result
    pub fn pending_retries(&self) -> usize {
        self.inner().waiting_retries
    }

    pub fn is_polling(&self) -> bool {
        self.inner().poll_task.is_some()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.inner().entities.keys().cloned().collect()
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<EntityHandle> {
        self.inner()
            .entities
            .get(entity_id)
            .map(|e| Arc::clone(&e.handle))
    }

    /// Every entity in the order it was added
    pub fn entities(&self) -> Vec<(EntityId, EntityHandle)> {
        self.inner()
            .entities
            .values()
            .map(|e| (e.entity_id.clone(), Arc::clone(&e.handle)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().entities.is_empty()
    }

    /// Set up from a YAML block or a discovery payload
    ///
    /// Returns true once the adapter finished successfully. A not-ready
    /// adapter is retried in the background and this returns false.
    pub async fn setup(
        self: &Arc<Self>,
        config: PlatformConfig,
        discovery_info: Option<Value>,
    ) -> bool {
        self.run_setup(
            SetupRequest::Platform {
                config,
                discovery_info,
            },
            0,
        )
        .await
    }

    /// Set up from the config entry this platform was built for
    pub async fn setup_entry(self: &Arc<Self>) -> bool {
        match self.config_entry.clone() {
            Some(entry) => self.run_setup(SetupRequest::Entry(entry), 0).await,
            None => {
                error!(platform = %self.full_name(), "Platform has no config entry to set up");
                false
            }
        }
    }

    /// One setup attempt; `tries` counts this request's earlier not-ready
    /// results
    async fn run_setup(self: &Arc<Self>, request: SetupRequest, tries: u32) -> bool {
        {
            let mut inner = self.inner();
            if !inner.state.accepts_entities() {
                return false;
            }
            inner.state = PlatformState::SettingUp;
        }

        let full_name = self.full_name();
        let settings = Arc::clone(&self.hass.settings);
        info!(platform = %full_name, "Setting up {}", full_name);

        let slow_warning = tokio::spawn({
            let full_name = full_name.clone();
            let after = settings.slow_setup_warning;
            async move {
                tokio::time::sleep(after).await;
                warn!(
                    "Setup of platform {} is taking over {} seconds.",
                    full_name,
                    after.as_secs()
                );
            }
        });

        let ctx = PlatformContext {
            hass: self.hass.clone(),
            domain: self.domain.clone(),
            platform_name: self.platform_name.clone(),
            add_entities: AddEntities::new(self),
        };
        let adapter = Arc::clone(&self.adapter);
        let attempt = request.clone();

        // The adapter runs in its own task so a timeout abandons the wait
        // without cancelling setup.
        let task = tokio::spawn(async move {
            match attempt {
                SetupRequest::Platform {
                    config,
                    discovery_info,
                } => adapter.setup_platform(ctx, config, discovery_info).await,
                SetupRequest::Entry(entry) => adapter.setup_entry(ctx, entry).await,
            }
        });

        let outcome = tokio::time::timeout(settings.setup_timeout, task).await;
        slow_warning.abort();

        match outcome {
            Err(_) => {
                error!(
                    "Setup of platform {} is taking longer than {} seconds. Startup will proceed without waiting any longer.",
                    full_name,
                    settings.setup_timeout.as_secs()
                );
                self.set_state(PlatformState::Failed);
                false
            }
            Ok(Err(join_error)) => {
                error!("Error while setting up platform {}: {}", full_name, join_error);
                self.set_state(PlatformState::Failed);
                false
            }
            Ok(Ok(Ok(()))) => {
                {
                    let mut inner = self.inner();
                    if !inner.state.accepts_entities() {
                        return false;
                    }
                    inner.state = if inner.waiting_retries > 0 {
                        PlatformState::RetryWait
                    } else {
                        PlatformState::Ready
                    };
                }
                self.hass.components.add(full_name);
                true
            }
            Ok(Ok(Err(PlatformError::NotReady(reason)))) => {
                self.schedule_retry(request, tries + 1, reason);
                false
            }
            Ok(Ok(Err(err))) => {
                error!("Error while setting up platform {}: {}", full_name, err);
                self.set_state(PlatformState::Failed);
                false
            }
        }
    }

    fn set_state(&self, state: PlatformState) {
        let mut inner = self.inner();
        if inner.state.accepts_entities() {
            inner.state = state;
        }
    }

    fn schedule_retry(self: &Arc<Self>, request: SetupRequest, tries: u32, reason: String) {
        let full_name = self.full_name();
        let settings = Arc::clone(&self.hass.settings);
        let mut inner = self.inner();
        if !inner.state.accepts_entities() {
            return;
        }

        if settings.max_retries.is_some_and(|max| tries > max) {
            error!(
                "Platform {} not ready after {} retries, giving up: {}",
                full_name,
                tries - 1,
                reason
            );
            inner.state = if inner.waiting_retries > 0 {
                PlatformState::RetryWait
            } else {
                PlatformState::Failed
            };
            return;
        }

        let delay = settings.retry_delay(tries);
        warn!(
            reason = %reason,
            "Platform {} not ready yet. Retrying in {} seconds.",
            full_name,
            delay.as_secs()
        );
        inner.state = PlatformState::RetryWait;
        inner.waiting_retries += 1;
        inner.retry_tasks.retain(|task| !task.is_finished());

        let platform = Arc::downgrade(self);
        inner.retry_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(platform) = platform.upgrade() {
                platform.retry_started();
                platform.run_setup(request, tries).await;
            }
        }));
    }

    fn retry_started(&self) {
        let mut inner = self.inner();
        inner.waiting_retries = inner.waiting_retries.saturating_sub(1);
    }

    /// Add a batch of entities
    ///
    /// Entities are added one after another. A failure affects only that
    /// entity; the first failure is returned once the batch is done.
    pub async fn add_entities(
        self: &Arc<Self>,
        entities: Vec<Box<dyn Entity>>,
        update_before_add: bool,
    ) -> Result<(), EntityPlatformError> {
        if entities.is_empty() {
            return Ok(());
        }

        let _batch = self.add_lock.lock().await;
        let mut first_error = None;

        for entity in entities {
            let handle: EntityHandle = Arc::new(tokio::sync::Mutex::new(entity));
            match self.add_entity(handle, update_before_add).await {
                Ok(()) => {}
                Err(EntityPlatformError::PlatformReset) => {
                    first_error.get_or_insert(EntityPlatformError::PlatformReset);
                    break;
                }
                Err(err) => {
                    error!(platform = %self.full_name(), "Error adding entity: {}", err);
                    first_error.get_or_insert(err);
                }
            }
        }

        self.start_polling();
        self.notify_membership();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn add_entity(
        self: &Arc<Self>,
        handle: EntityHandle,
        update_before_add: bool,
    ) -> Result<(), EntityPlatformError> {
        if update_before_add {
            let _permit = self.update_permit(&handle).await;
            if let Err(err) = run_update(&handle).await {
                let name = handle.lock().await.name();
                error!(
                    platform = %self.full_name(),
                    "Update for {} fails: {}",
                    name.as_deref().unwrap_or(DEVICE_DEFAULT_NAME),
                    err
                );
                return Ok(());
            }
        }

        let mut entity = handle.lock().await;

        let name = entity.name();
        let mut name_override = None;
        let known_ids = self.known_entity_ids();

        let entity_id = if let Some(unique_id) = entity.unique_id() {
            let disabled_by = if !entity.entity_registry_enabled_default()
                || self
                    .config_entry
                    .as_ref()
                    .is_some_and(|e| e.pref_disable_new_entities)
            {
                Some(DisabledBy::Integration)
            } else {
                None
            };
            let suggested_object_id = entity
                .requested_entity_id()
                .and_then(|id| id.split_once('.').map(|(_, object_id)| object_id.to_string()))
                .or_else(|| Some(self.suggested_name(name.as_deref())));

            let entry = self.hass.entity_registry.get_or_create(
                &self.domain,
                &self.platform_name,
                &unique_id,
                EntryOptions {
                    suggested_object_id,
                    known_object_ids: known_ids,
                    config_entry_id: self.config_entry.as_ref().map(|e| e.entry_id.clone()),
                    disabled_by,
                    original_name: name.clone(),
                },
            );

            if entry.is_disabled() {
                info!(
                    "Not adding entity {} because it's disabled",
                    name.as_deref().unwrap_or(&entry.entity_id)
                );
                return Ok(());
            }
            name_override = entry.name.clone();
            entry.entity_id.clone()
        } else if let Some(requested) = entity.requested_entity_id() {
            requested
        } else {
            self.hass.entity_registry.generate_entity_id(
                &self.domain,
                &self.suggested_name(name.as_deref()),
                &known_ids,
            )
        };

        let entity_id: EntityId = entity_id
            .parse()
            .map_err(|_| EntityPlatformError::InvalidEntityId(entity_id.clone()))?;
        let id = entity_id.to_string();

        if self.hass.states.contains(&id) || !self.hass.entity_ids.insert(id.clone()) {
            return Err(EntityPlatformError::DuplicateEntityId(id));
        }

        let removed = Arc::new(AtomicBool::new(false));
        {
            let mut inner = self.inner();
            if !inner.state.accepts_entities() {
                drop(inner);
                self.hass.entity_ids.remove(&id);
                return Err(EntityPlatformError::PlatformReset);
            }
            inner.entities.insert(
                id.clone(),
                PlatformEntity {
                    entity_id: entity_id.clone(),
                    handle: Arc::clone(&handle),
                    removed: Arc::clone(&removed),
                    name_override: name_override.clone(),
                    should_poll: entity.should_poll(),
                },
            );
        }

        publish_state(
            &self.hass.states,
            &entity_id,
            name_override.as_deref(),
            &**entity,
            Context::new(),
        );

        let writer = StateWriter::new(
            entity_id,
            &handle,
            Arc::clone(&self.hass.states),
            name_override,
            removed,
        );
        entity.added_to_hass(writer).await;
        debug!(platform = %self.full_name(), entity_id = %id, "Added entity");
        Ok(())
    }

    /// `[namespace ]name`, the text entity ids are slugified from
    fn suggested_name(&self, name: Option<&str>) -> String {
        let name = name.unwrap_or(DEVICE_DEFAULT_NAME);
        match &self.entity_namespace {
            Some(namespace) => format!("{} {}", namespace, name),
            None => name.to_string(),
        }
    }

    /// Ids an automatically generated id must avoid
    fn known_entity_ids(&self) -> Vec<String> {
        let mut known: Vec<String> = self.hass.entity_ids.iter().map(|id| id.key().clone()).collect();
        known.extend(self.hass.states.entity_ids(&self.domain));
        known
    }

    async fn update_permit(&self, handle: &EntityHandle) -> Option<OwnedSemaphorePermit> {
        let kind = handle.lock().await.update_kind();
        let semaphore = match kind {
            UpdateKind::Blocking => self.blocking_updates.as_ref(),
            UpdateKind::Async => self.async_updates.as_ref(),
            UpdateKind::None => None,
        }?;
        Arc::clone(semaphore).acquire_owned().await.ok()
    }

    /// Update an entity and publish its state
    ///
    /// Returns false when the entity is unknown or its update failed.
    pub async fn refresh_entity(&self, entity_id: &str) -> bool {
        let entry = self.inner().entities.get(entity_id).cloned();
        match entry {
            Some(entry) => self.refresh(&entry).await,
            None => false,
        }
    }

    async fn refresh(&self, entry: &PlatformEntity) -> bool {
        let permit = self.update_permit(&entry.handle).await;
        if let Err(err) = run_update(&entry.handle).await {
            error!(entity_id = %entry.entity_id, "Update for {} fails: {}", entry.entity_id, err);
            return false;
        }
        drop(permit);

        let entity = entry.handle.lock().await;
        if entry.removed.load(Ordering::Acquire) {
            return false;
        }
        publish_state(
            &self.hass.states,
            &entry.entity_id,
            entry.name_override.as_deref(),
            &**entity,
            Context::new(),
        );
        true
    }

    /// Start the poll timer if a polling entity exists and it isn't running
    fn start_polling(self: &Arc<Self>) {
        if self
            .config_entry
            .as_ref()
            .is_some_and(|e| e.pref_disable_polling)
        {
            return;
        }

        let mut inner = self.inner();
        if inner.poll_task.is_some()
            || !inner.state.accepts_entities()
            || !inner.entities.values().any(|e| e.should_poll)
        {
            return;
        }

        debug!(
            platform = %self.full_name(),
            interval = ?self.scan_interval,
            "Starting entity polling"
        );
        let weak = Arc::downgrade(self);
        let period = self.scan_interval;
        inner.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(platform) => platform.begin_poll_cycle(),
                    None => break,
                }
            }
        }));
    }

    /// Run one poll cycle unless the previous one is still going
    fn begin_poll_cycle(self: &Arc<Self>) {
        let Ok(guard) = Arc::clone(&self.poll_lock).try_lock_owned() else {
            warn!(
                "Updating {} {} took longer than the scheduled update interval {:?}",
                self.platform_name, self.domain, self.scan_interval
            );
            return;
        };

        let platform = Arc::clone(self);
        let cycle = tokio::spawn(async move { platform.poll_cycle(guard).await });
        self.inner().poll_cycle = Some(cycle);
    }

    async fn poll_cycle(&self, _guard: OwnedMutexGuard<()>) {
        let targets: Vec<PlatformEntity> = self
            .inner()
            .entities
            .values()
            .filter(|e| e.should_poll)
            .cloned()
            .collect();

        join_all(targets.iter().map(|entry| self.refresh(entry))).await;
    }

    fn stop_polling(&self) {
        let mut inner = self.inner();
        if let Some(task) = inner.poll_task.take() {
            task.abort();
            debug!(platform = %self.full_name(), "Stopped entity polling");
        }
    }

    /// Remove one entity, returning false if this platform doesn't own it
    pub async fn remove_entity(&self, entity_id: &str) -> bool {
        let (entry, still_polling) = {
            let mut inner = self.inner();
            let entry = inner.entities.shift_remove(entity_id);
            let still_polling = inner.entities.values().any(|e| e.should_poll);
            (entry, still_polling)
        };
        let Some(entry) = entry else {
            return false;
        };

        self.finish_removal(entry).await;
        if !still_polling {
            self.stop_polling();
        }
        self.notify_membership();
        true
    }

    async fn finish_removal(&self, entry: PlatformEntity) {
        let mut entity = entry.handle.lock().await;
        entity.will_remove_from_hass().await;
        entry.removed.store(true, Ordering::Release);
        self.hass.states.remove(&entry.entity_id, Context::new());
        self.hass.entity_ids.remove(&entry.entity_id.to_string());
        debug!(entity_id = %entry.entity_id, "Removed entity");
    }

    /// Cancel retries, stop polling, remove every entity and tear down
    ///
    /// The platform accepts no entities afterwards.
    pub async fn reset(&self) {
        let (entities, tasks) = {
            let mut inner = self.inner();
            if matches!(inner.state, PlatformState::Resetting | PlatformState::TornDown) {
                return;
            }
            inner.state = PlatformState::Resetting;
            inner.waiting_retries = 0;
            let mut tasks: Vec<JoinHandle<()>> = inner.retry_tasks.drain(..).collect();
            tasks.extend(inner.poll_task.take());
            tasks.extend(inner.poll_cycle.take());
            let entities: Vec<PlatformEntity> =
                inner.entities.drain(..).map(|(_, e)| e).collect();
            (entities, tasks)
        };

        for task in tasks {
            task.abort();
        }

        let removed = entities.len();
        join_all(entities.into_iter().map(|e| self.finish_removal(e))).await;
        self.adapter.teardown().await;

        self.inner().state = PlatformState::TornDown;
        if removed > 0 {
            self.notify_membership();
        }
        info!(platform = %self.full_name(), removed, "Platform reset");
    }

    fn notify_membership(&self) {
        if let Some(listener) = &self.membership_listener {
            listener();
        }
    }
}

impl std::fmt::Debug for EntityPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPlatform")
            .field("domain", &self.domain)
            .field("platform", &self.platform_name)
            .field("scan_interval", &self.scan_interval)
            .field("state", &self.state())
            .finish()
    }
}
