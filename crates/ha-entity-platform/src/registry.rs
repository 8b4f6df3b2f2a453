//! Startup-time table of platform adapters

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::adapter::{BlockingAdapter, BlockingPlatformAdapter, PlatformAdapter};

/// Adapters keyed by `(domain, platform_name)`, e.g. `("sensor", "demo")`
#[derive(Default)]
pub struct PlatformRegistry {
    adapters: DashMap<(String, String), Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same key
    pub fn register(
        &self,
        domain: impl Into<String>,
        platform: impl Into<String>,
        adapter: impl PlatformAdapter,
    ) {
        self.insert(domain.into(), platform.into(), Arc::new(adapter));
    }

    /// Register an adapter whose setup runs on the blocking pool
    pub fn register_blocking(
        &self,
        domain: impl Into<String>,
        platform: impl Into<String>,
        adapter: impl BlockingPlatformAdapter,
    ) {
        self.insert(
            domain.into(),
            platform.into(),
            Arc::new(BlockingAdapter::new(adapter)),
        );
    }

    fn insert(&self, domain: String, platform: String, adapter: Arc<dyn PlatformAdapter>) {
        debug!(domain = %domain, platform = %platform, "Registered platform adapter");
        self.adapters.insert((domain, platform), adapter);
    }

    pub fn get(&self, domain: &str, platform: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters
            .get(&(domain.to_string(), platform.to_string()))
            .map(|a| Arc::clone(a.value()))
    }

    pub fn contains(&self, domain: &str, platform: &str) -> bool {
        self.adapters
            .contains_key(&(domain.to_string(), platform.to_string()))
    }

    /// Platform names registered for `domain`, sorted
    pub fn platforms(&self, domain: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .adapters
            .iter()
            .filter(|entry| entry.key().0 == domain)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
