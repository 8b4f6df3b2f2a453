//! Platform adapters: the integration side of an entity platform
//!
//! An adapter knows how to talk to one kind of device or service and creates
//! entities for it. The platform machinery calls it once per setup attempt
//! and hands it an [`AddEntities`] callback.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use ha_config::PlatformConfig;
use ha_config_entries::ConfigEntry;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::entity::Entity;
use crate::entity_platform::EntityPlatform;
use crate::error::{EntityPlatformError, PlatformError, PlatformResult};
use crate::hass::HomeAssistant;

/// Everything an adapter gets during setup
#[derive(Clone)]
pub struct PlatformContext {
    pub hass: HomeAssistant,
    /// Component domain, e.g. `sensor`
    pub domain: String,
    /// Adapter name, e.g. `demo`
    pub platform_name: String,
    pub add_entities: AddEntities,
}

/// Async platform integration
#[async_trait]
pub trait PlatformAdapter: Send + Sync + 'static {
    /// Poll interval this platform prefers when the config sets none
    fn scan_interval(&self) -> Option<Duration> {
        None
    }

    /// Maximum concurrent entity updates; `Some(0)` means unbounded
    fn parallel_updates(&self) -> Option<usize> {
        None
    }

    /// Set up from a YAML platform block or a discovery event
    async fn setup_platform(
        &self,
        ctx: PlatformContext,
        config: PlatformConfig,
        discovery_info: Option<Value>,
    ) -> PlatformResult<()>;

    /// Set up from a config entry
    async fn setup_entry(&self, _ctx: PlatformContext, _entry: ConfigEntry) -> PlatformResult<()> {
        Err(PlatformError::NotSupported)
    }

    /// Release connections after every entity has been removed
    async fn teardown(&self) {}
}

/// Platform integration whose setup blocks the calling thread
///
/// Registered through [`crate::PlatformRegistry::register_blocking`], which
/// runs setup on the blocking pool.
pub trait BlockingPlatformAdapter: Send + Sync + 'static {
    fn scan_interval(&self) -> Option<Duration> {
        None
    }

    fn parallel_updates(&self) -> Option<usize> {
        None
    }

    fn setup_platform(
        &self,
        ctx: PlatformContext,
        config: PlatformConfig,
        discovery_info: Option<Value>,
    ) -> PlatformResult<()>;
}

/// Runs a [`BlockingPlatformAdapter`] as a [`PlatformAdapter`]
pub(crate) struct BlockingAdapter<A>(Arc<A>);

impl<A> BlockingAdapter<A> {
    pub(crate) fn new(adapter: A) -> Self {
        Self(Arc::new(adapter))
    }
}

#[async_trait]
impl<A: BlockingPlatformAdapter> PlatformAdapter for BlockingAdapter<A> {
    fn scan_interval(&self) -> Option<Duration> {
        self.0.scan_interval()
    }

    fn parallel_updates(&self) -> Option<usize> {
        self.0.parallel_updates()
    }

    async fn setup_platform(
        &self,
        ctx: PlatformContext,
        config: PlatformConfig,
        discovery_info: Option<Value>,
    ) -> PlatformResult<()> {
        let adapter = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || adapter.setup_platform(ctx, config, discovery_info))
            .await
            .map_err(|e| EntityPlatformError::Join(e.to_string()))?
    }
}

/// Callback adapters use to hand new entities to their platform
///
/// Holds the platform weakly; once the platform is gone every call fails
/// with [`EntityPlatformError::PlatformReset`].
#[derive(Clone)]
pub struct AddEntities {
    platform: Weak<EntityPlatform>,
    runtime: Handle,
}

impl AddEntities {
    pub(crate) fn new(platform: &Arc<EntityPlatform>) -> Self {
        Self {
            platform: Arc::downgrade(platform),
            runtime: Handle::current(),
        }
    }

    /// Add a batch of entities, optionally updating each one first
    ///
    /// Every entity is attempted; the first failure is returned after the
    /// rest of the batch has been added.
    pub async fn add(
        &self,
        entities: Vec<Box<dyn Entity>>,
        update_before_add: bool,
    ) -> Result<(), EntityPlatformError> {
        let platform = self
            .platform
            .upgrade()
            .ok_or(EntityPlatformError::PlatformReset)?;
        platform.add_entities(entities, update_before_add).await
    }

    /// [`AddEntities::add`] for callers on a blocking-pool thread
    ///
    /// Must not be called from inside the async runtime.
    pub fn add_blocking(
        &self,
        entities: Vec<Box<dyn Entity>>,
        update_before_add: bool,
    ) -> Result<(), EntityPlatformError> {
        self.runtime.block_on(self.add(entities, update_before_add))
    }
}
