//! The Entity trait and the handle entities use to publish their state

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ha_core::attrs::{
    ATTR_ASSUMED_STATE, ATTR_DEVICE_CLASS, ATTR_FRIENDLY_NAME, ATTR_ICON, ATTR_SUPPORTED_FEATURES,
    ATTR_UNIT_OF_MEASUREMENT,
};
use ha_core::{Context, EntityId, State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_state_store::StateStore;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::EntityError;

/// How an entity refreshes itself when polled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateKind {
    /// Nothing to fetch; polling only republishes state
    #[default]
    None,
    /// `update` is awaited on the runtime
    Async,
    /// `update_blocking` runs on the blocking pool
    Blocking,
}

/// A device, sensor or service exposed as one `domain.object_id` state
///
/// Every method has a default so an implementation only overrides what it
/// provides. State is read through the accessor methods each time the
/// platform publishes.
#[async_trait]
pub trait Entity: Send + Sync + 'static {
    fn name(&self) -> Option<String> {
        None
    }

    /// Stable id used to key the entity registry
    fn unique_id(&self) -> Option<String> {
        None
    }

    /// Explicit entity id, used when the registry has none
    fn requested_entity_id(&self) -> Option<String> {
        None
    }

    fn should_poll(&self) -> bool {
        true
    }

    fn available(&self) -> bool {
        true
    }

    /// Current state value; `None` publishes `unknown`
    fn state(&self) -> Option<String> {
        None
    }

    /// Extra attributes merged under the standard ones
    fn attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    fn unit_of_measurement(&self) -> Option<String> {
        None
    }

    fn icon(&self) -> Option<String> {
        None
    }

    fn device_class(&self) -> Option<String> {
        None
    }

    fn assumed_state(&self) -> bool {
        false
    }

    fn supported_features(&self) -> Option<u32> {
        None
    }

    /// Fire `state_changed` on every write, even when nothing changed
    fn force_update(&self) -> bool {
        false
    }

    /// Whether a newly registered entity starts enabled
    fn entity_registry_enabled_default(&self) -> bool {
        true
    }

    fn update_kind(&self) -> UpdateKind {
        UpdateKind::None
    }

    async fn update(&mut self) -> Result<(), EntityError> {
        Ok(())
    }

    fn update_blocking(&mut self) -> Result<(), EntityError> {
        Ok(())
    }

    /// Called once the entity has an id and its first state is published
    async fn added_to_hass(&mut self, _writer: StateWriter) {}

    async fn will_remove_from_hass(&mut self) {}

    /// Handle an entity service registered on the owning component
    async fn handle_service(&mut self, service: &str, _data: &Value) -> Result<(), EntityError> {
        Err(EntityError::NotSupported(service.to_string()))
    }
}

/// Shared handle to an entity owned by a platform
pub type EntityHandle = Arc<Mutex<Box<dyn Entity>>>;

pub fn entity_handle(entity: impl Entity) -> EntityHandle {
    Arc::new(Mutex::new(Box::new(entity)))
}

/// Lets an entity publish its own state outside the poll cycle
///
/// Holds the entity weakly: once the platform drops the entity, or marks it
/// removed, every write is ignored.
#[derive(Clone)]
pub struct StateWriter {
    entity_id: EntityId,
    entity: Weak<Mutex<Box<dyn Entity>>>,
    states: Arc<StateStore>,
    name_override: Option<String>,
    removed: Arc<AtomicBool>,
}

impl StateWriter {
    pub(crate) fn new(
        entity_id: EntityId,
        entity: &EntityHandle,
        states: Arc<StateStore>,
        name_override: Option<String>,
        removed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            entity_id,
            entity: Arc::downgrade(entity),
            states,
            name_override,
            removed,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire) || self.entity.strong_count() == 0
    }

    /// Lock the entity and publish its current state
    ///
    /// Must not be awaited while the entity lock is already held, e.g. from
    /// inside an `Entity` method; use [`StateWriter::write_from`] there.
    pub async fn write(&self) -> Option<State> {
        if self.is_removed() {
            return None;
        }
        let entity = self.entity.upgrade()?;
        let entity = entity.lock().await;
        self.write_from(&**entity)
    }

    /// Publish state read from an entity the caller already borrows
    pub fn write_from(&self, entity: &dyn Entity) -> Option<State> {
        if self.is_removed() {
            return None;
        }
        Some(publish_state(
            &self.states,
            &self.entity_id,
            self.name_override.as_deref(),
            entity,
            Context::new(),
        ))
    }
}

impl std::fmt::Debug for StateWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateWriter")
            .field("entity_id", &self.entity_id)
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// State value and attributes an entity currently exposes
///
/// An unavailable entity keeps only the standard attributes.
pub(crate) fn render_state(
    entity: &dyn Entity,
    name_override: Option<&str>,
) -> (String, HashMap<String, Value>) {
    let (state, mut attributes) = if entity.available() {
        (
            entity.state().unwrap_or_else(|| STATE_UNKNOWN.to_string()),
            entity.attributes(),
        )
    } else {
        (STATE_UNAVAILABLE.to_string(), HashMap::new())
    };

    if let Some(unit) = entity.unit_of_measurement() {
        attributes.insert(ATTR_UNIT_OF_MEASUREMENT.to_string(), Value::String(unit));
    }
    if let Some(name) = name_override.map(str::to_string).or_else(|| entity.name()) {
        attributes.insert(ATTR_FRIENDLY_NAME.to_string(), Value::String(name));
    }
    if let Some(icon) = entity.icon() {
        attributes.insert(ATTR_ICON.to_string(), Value::String(icon));
    }
    if let Some(class) = entity.device_class() {
        attributes.insert(ATTR_DEVICE_CLASS.to_string(), Value::String(class));
    }
    if entity.assumed_state() {
        attributes.insert(ATTR_ASSUMED_STATE.to_string(), Value::Bool(true));
    }
    if let Some(features) = entity.supported_features() {
        attributes.insert(ATTR_SUPPORTED_FEATURES.to_string(), Value::from(features));
    }

    (state, attributes)
}

pub(crate) fn publish_state(
    states: &StateStore,
    entity_id: &EntityId,
    name_override: Option<&str>,
    entity: &dyn Entity,
    context: Context,
) -> State {
    let (state, attributes) = render_state(entity, name_override);
    if entity.force_update() {
        states.set_forced(entity_id.clone(), state, attributes, context)
    } else {
        states.set(entity_id.clone(), state, attributes, context)
    }
}

/// Run the entity's own refresh, if it has one
///
/// Blocking updates take the entity lock on a blocking-pool thread.
pub(crate) async fn run_update(handle: &EntityHandle) -> Result<(), EntityError> {
    let kind = handle.lock().await.update_kind();
    match kind {
        UpdateKind::None => Ok(()),
        UpdateKind::Async => handle.lock().await.update().await,
        UpdateKind::Blocking => {
            let handle = Arc::clone(handle);
            tokio::task::spawn_blocking(move || handle.blocking_lock().update_blocking())
                .await
                .map_err(|e| EntityError::UpdateFailed(format!("update task failed: {}", e)))?
        }
    }
}
