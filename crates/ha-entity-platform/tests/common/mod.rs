//! Shared test utilities for entity platform tests
//!
//! - `MockEntity`: configurable entity with update/service probes
//! - `MockPlatform`: scripted platform adapter
//! - `test_hass`: a HomeAssistant backed by a temporary config dir

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ha_config::{PlatformConfig, PlatformSetupConfig};
use ha_config_entries::ConfigEntry;
use ha_entity_platform::{
    Entity, EntityError, HomeAssistant, PlatformAdapter, PlatformContext, PlatformError,
    PlatformResult, StateWriter, UpdateKind,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::time::Instant;

pub const DOMAIN: &str = "test_domain";

/// Counters shared between a test and the entities it creates
#[derive(Debug, Clone, Default)]
pub struct Probe {
    started: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    added: Arc<AtomicUsize>,
    removed: Arc<AtomicUsize>,
    services: Arc<Mutex<Vec<String>>>,
    writers: Arc<Mutex<Vec<StateWriter>>>,
}

impl Probe {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn services(&self) -> Vec<String> {
        self.services.lock().unwrap().clone()
    }

    pub fn writer(&self, index: usize) -> StateWriter {
        self.writers.lock().unwrap()[index].clone()
    }
}

/// A mock entity for testing
#[derive(Debug, Clone)]
pub struct MockEntity {
    pub name: Option<String>,
    pub unique_id: Option<String>,
    pub entity_id: Option<String>,
    pub state: Option<String>,
    pub attributes: HashMap<String, Value>,
    pub available: bool,
    pub should_poll: bool,
    pub enabled_default: bool,
    pub update_kind: UpdateKind,
    pub update_delay: Duration,
    pub fail_updates: bool,
    /// State set by a successful update
    pub state_after_update: Option<String>,
    pub probe: Probe,
    writer: Option<StateWriter>,
}

impl MockEntity {
    pub fn new() -> Self {
        Self {
            name: None,
            unique_id: None,
            entity_id: None,
            state: None,
            attributes: HashMap::new(),
            available: true,
            should_poll: false,
            enabled_default: true,
            update_kind: UpdateKind::None,
            update_delay: Duration::ZERO,
            fail_updates: false,
            state_after_update: None,
            probe: Probe::default(),
            writer: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn polling(mut self) -> Self {
        self.should_poll = true;
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_default = false;
        self
    }

    /// Async update that takes `delay` and then sets `state`
    pub fn with_async_update(mut self, delay: Duration, state: impl Into<String>) -> Self {
        self.update_kind = UpdateKind::Async;
        self.update_delay = delay;
        self.state_after_update = Some(state.into());
        self
    }

    /// Blocking update that sleeps the thread for `delay`
    pub fn with_blocking_update(mut self, delay: Duration, state: impl Into<String>) -> Self {
        self.update_kind = UpdateKind::Blocking;
        self.update_delay = delay;
        self.state_after_update = Some(state.into());
        self
    }

    pub fn failing_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    pub fn with_probe(mut self, probe: &Probe) -> Self {
        self.probe = probe.clone();
        self
    }

    pub fn boxed(self) -> Box<dyn Entity> {
        Box::new(self)
    }

    fn finish_update(&mut self) -> Result<(), EntityError> {
        if self.fail_updates {
            return Err(EntityError::UpdateFailed("device offline".into()));
        }
        if let Some(state) = &self.state_after_update {
            self.state = Some(state.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl Entity for MockEntity {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn unique_id(&self) -> Option<String> {
        self.unique_id.clone()
    }

    fn requested_entity_id(&self) -> Option<String> {
        self.entity_id.clone()
    }

    fn should_poll(&self) -> bool {
        self.should_poll
    }

    fn available(&self) -> bool {
        self.available
    }

    fn state(&self) -> Option<String> {
        self.state.clone()
    }

    fn attributes(&self) -> HashMap<String, Value> {
        self.attributes.clone()
    }

    fn entity_registry_enabled_default(&self) -> bool {
        self.enabled_default
    }

    fn update_kind(&self) -> UpdateKind {
        self.update_kind
    }

    async fn update(&mut self) -> Result<(), EntityError> {
        self.probe.enter();
        tokio::time::sleep(self.update_delay).await;
        self.probe.exit();
        self.finish_update()
    }

    fn update_blocking(&mut self) -> Result<(), EntityError> {
        self.probe.enter();
        std::thread::sleep(self.update_delay);
        self.probe.exit();
        self.finish_update()
    }

    async fn added_to_hass(&mut self, writer: StateWriter) {
        self.probe.added.fetch_add(1, Ordering::SeqCst);
        self.probe.writers.lock().unwrap().push(writer.clone());
        self.writer = Some(writer);
    }

    async fn will_remove_from_hass(&mut self) {
        self.probe.removed.fetch_add(1, Ordering::SeqCst);
    }

    async fn handle_service(&mut self, service: &str, data: &Value) -> Result<(), EntityError> {
        self.probe.services.lock().unwrap().push(service.to_string());
        match service {
            "set_state" => {
                let state = data
                    .get("state")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EntityError::InvalidData("state is required".into()))?;
                self.state = Some(state.to_string());
                if let Some(writer) = &self.writer {
                    writer.write_from(&*self);
                }
                Ok(())
            }
            "refresh" => Ok(()),
            other => Err(EntityError::NotSupported(other.to_string())),
        }
    }
}

/// What a [`MockPlatform`] does on one setup attempt
#[derive(Debug, Clone)]
pub enum SetupStep {
    NotReady,
    Fail,
    Panic,
    /// Sleep, then succeed
    Hang(Duration),
}

/// Scripted platform adapter
///
/// Plays `steps` in order, one per attempt; once they run out every attempt
/// succeeds and adds the configured entities.
#[derive(Clone, Default)]
pub struct MockPlatform {
    steps: Arc<Mutex<VecDeque<SetupStep>>>,
    entities: Arc<Mutex<Vec<MockEntity>>>,
    update_before_add: bool,
    scan_interval: Option<Duration>,
    parallel_updates: Option<usize>,
    supports_entries: bool,
    attempts: Arc<Mutex<Vec<Instant>>>,
    discovery_info: Arc<Mutex<Vec<Option<Value>>>>,
    teardowns: Arc<AtomicUsize>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = SetupStep>) -> Self {
        self.steps.lock().unwrap().extend(steps);
        self
    }

    pub fn with_entities(self, entities: Vec<MockEntity>) -> Self {
        *self.entities.lock().unwrap() = entities;
        self
    }

    pub fn update_before_add(mut self) -> Self {
        self.update_before_add = true;
        self
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    pub fn with_parallel_updates(mut self, limit: usize) -> Self {
        self.parallel_updates = Some(limit);
        self
    }

    pub fn with_entry_support(mut self) -> Self {
        self.supports_entries = true;
        self
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Seconds between consecutive setup attempts
    pub fn attempt_gaps(&self) -> Vec<u64> {
        self.attempts()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs_f64().round() as u64)
            .collect()
    }

    pub fn discovery_info(&self) -> Vec<Option<Value>> {
        self.discovery_info.lock().unwrap().clone()
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    async fn attempt(&self, ctx: PlatformContext) -> PlatformResult<()> {
        self.attempts.lock().unwrap().push(Instant::now());
        let step = self.steps.lock().unwrap().pop_front();

        match step {
            Some(SetupStep::NotReady) => return Err(PlatformError::not_ready("device offline")),
            Some(SetupStep::Fail) => return Err(PlatformError::failed("bad credentials")),
            Some(SetupStep::Panic) => panic!("adapter bug"),
            Some(SetupStep::Hang(duration)) => tokio::time::sleep(duration).await,
            None => {}
        }

        let entities: Vec<Box<dyn Entity>> = self
            .entities
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(MockEntity::boxed)
            .collect();
        ctx.add_entities.add(entities, self.update_before_add).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    fn scan_interval(&self) -> Option<Duration> {
        self.scan_interval
    }

    fn parallel_updates(&self) -> Option<usize> {
        self.parallel_updates
    }

    async fn setup_platform(
        &self,
        ctx: PlatformContext,
        _config: PlatformConfig,
        discovery_info: Option<Value>,
    ) -> PlatformResult<()> {
        self.discovery_info.lock().unwrap().push(discovery_info);
        self.attempt(ctx).await
    }

    async fn setup_entry(&self, ctx: PlatformContext, _entry: ConfigEntry) -> PlatformResult<()> {
        if !self.supports_entries {
            return Err(PlatformError::NotSupported);
        }
        self.attempt(ctx).await
    }

    async fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// A HomeAssistant with default setup policy in a temporary config dir
pub fn test_hass() -> (TempDir, HomeAssistant) {
    test_hass_with(PlatformSetupConfig::default())
}

pub fn test_hass_with(settings: PlatformSetupConfig) -> (TempDir, HomeAssistant) {
    let dir = tempfile::tempdir().expect("create temp config dir");
    let hass = HomeAssistant::new(dir.path(), settings);
    (dir, hass)
}

/// Register `adapter` as platform `name` of the test domain
pub fn register(hass: &HomeAssistant, name: &str, adapter: &MockPlatform) {
    hass.platforms.register(DOMAIN, name, adapter.clone());
}

/// Parse a configuration.yaml snippet
pub fn yaml(dir: &TempDir, content: &str) -> ha_config::Value {
    ha_config::load_yaml_string(dir.path(), content).expect("valid yaml")
}

pub fn state_of(hass: &HomeAssistant, entity_id: &str) -> Option<String> {
    hass.states.get_state(entity_id)
}
