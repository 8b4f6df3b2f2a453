//! Config Entries Manager
//!
//! Persists config entries and drives their setup and unload through the
//! handler registered for each entry's domain.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ha_registries::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::InvalidTransition;

pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Entry not ready: {0}")]
    NotReady(String),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed: {0}")]
    UnloadFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Outcome of a failed entry setup, as reported by a handler
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntrySetupError {
    /// The device or service isn't reachable yet; setup may be retried
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("{0}")]
    Failed(String),
}

/// Sets up and unloads the config entries of one domain
#[async_trait]
pub trait ConfigEntryHandler: Send + Sync {
    async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), EntrySetupError>;

    async fn unload_entry(&self, entry: &ConfigEntry) -> Result<(), String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub struct ConfigEntries {
    storage: Arc<Storage>,
    entries: DashMap<String, ConfigEntry>,
    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,
    /// Serializes setup and unload
    setup_lock: Mutex<()>,
    handlers: DashMap<String, Arc<dyn ConfigEntryHandler>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            handlers: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                self.index_entry(entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.iter().collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        if let Some(unique_id) = &entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }
        self.entries.insert(entry.entry_id.clone(), entry);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.iter().filter(|e| e.domain == domain).collect()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add and persist a new entry
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(unique_id) = &entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(entry.clone());
        self.save().await?;
        info!("Added config entry: {} ({}) [{}]", entry.title, entry.domain, entry.entry_id);
        Ok(entry)
    }

    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let updated = {
            let mut entry = self
                .entries
                .get_mut(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
            if let Some(title) = update.title {
                entry.title = title;
            }
            if let Some(data) = update.data {
                entry.data = data;
            }
            if let Some(options) = update.options {
                entry.options = options;
            }
            if let Some(pref) = update.pref_disable_new_entities {
                entry.pref_disable_new_entities = pref;
            }
            if let Some(pref) = update.pref_disable_polling {
                entry.pref_disable_polling = pref;
            }
            entry.modified_at = Utc::now();
            entry.clone()
        };

        self.save().await?;
        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Unload (if loaded) and remove an entry
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state != ConfigEntryState::NotLoaded {
            self.unload(entry_id).await?;
        }

        self.entries.remove(entry_id);
        if let Some(unique_id) = &entry.unique_id {
            self.by_unique_id.remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.save().await?;

        info!("Removed config entry: {} ({}) [{}]", entry.title, entry.domain, entry_id);
        Ok(entry)
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(entry.clone())
    }

    /// Register the handler that sets up entries of `domain`
    pub fn register_handler(&self, domain: impl Into<String>, handler: Arc<dyn ConfigEntryHandler>) {
        let domain = domain.into();
        debug!("Registered config entry handler for domain: {}", domain);
        self.handlers.insert(domain, handler);
    }

    /// Set up an entry through its domain's handler
    ///
    /// A not-ready outcome leaves the entry in `SetupRetry`, any other
    /// failure in `SetupError`.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let current = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if current.is_disabled() {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }

        let entry = self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;
        let handler = self.handlers.get(&entry.domain).map(|h| Arc::clone(h.value()));

        let Some(handler) = handler else {
            debug!("No handler for domain {}, marking entry as loaded", entry.domain);
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            return Ok(());
        };

        match handler.setup_entry(&entry).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(EntrySetupError::NotReady(reason)) => {
                warn!("Config entry {} for {} not ready yet: {}", entry.title, entry.domain, reason);
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                Err(ConfigEntriesError::NotReady(reason))
            }
            Err(EntrySetupError::Failed(reason)) => {
                warn!("Setup failed for entry {}: {}", entry_id, reason);
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;
        let handler = self.handlers.get(&entry.domain).map(|h| Arc::clone(h.value()));

        if let Some(handler) = handler {
            if let Err(reason) = handler.unload_entry(&entry).await {
                self.transition(entry_id, ConfigEntryState::FailedUnload, Some(reason.clone()))?;
                return Err(ConfigEntriesError::UnloadFailed(reason));
            }
        }

        self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!("Unloaded entry: {} ({})", entry.title, entry_id);
        Ok(())
    }

    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let state = self
            .get(entry_id)
            .map(|e| e.state)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        if state != ConfigEntryState::NotLoaded {
            self.unload(entry_id).await?;
        }
        self.setup(entry_id).await
    }

    /// Set up every entry of `domain`, returning per-entry results
    pub async fn setup_domain(&self, domain: &str) -> Vec<(String, ConfigEntriesResult<()>)> {
        let mut results = Vec::new();
        for entry in self.get_by_domain(domain) {
            let result = self.setup(&entry.entry_id).await;
            results.push((entry.entry_id, result));
        }
        results
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    /// Domains that have at least one entry
    pub fn domains(&self) -> Vec<String> {
        let domains: HashSet<String> = self.iter().map(|e| e.domain).collect();
        let mut domains: Vec<String> = domains.into_iter().collect();
        domains.sort();
        domains
    }
}
