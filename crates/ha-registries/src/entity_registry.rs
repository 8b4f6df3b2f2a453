//! Entity Registry
//!
//! Maps `(domain, platform, unique_id)` to a stable entity_id so an entity
//! keeps its id across restarts, and remembers which entities were disabled.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::slugify;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity id {0} is already registered")]
    EntityIdTaken(String),
}

/// Storage key for entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    ConfigEntry,
    Hass,
    /// The integration marked the entity as disabled by default
    Integration,
    User,
}

/// Identity of a registry entry
pub type RegistryKey = (String, String, String);

/// A registered entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal ULID
    pub id: String,
    pub entity_id: String,
    pub unique_id: String,
    /// Platform that provides this entity
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,
    /// User-set name, overrides the entity's own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    fn new(entity_id: String, platform: &str, unique_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id,
            unique_id: unique_id.to_string(),
            platform: platform.to_string(),
            config_entry_id: None,
            name: None,
            original_name: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    fn key(&self) -> RegistryKey {
        (
            self.domain().to_string(),
            self.platform.clone(),
            self.unique_id.clone(),
        )
    }
}

/// Optional inputs to [`EntityRegistry::get_or_create`]
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// Object id to try before falling back to `{platform}_{unique_id}`
    pub suggested_object_id: Option<String>,
    /// Entity ids in use outside the registry (live states, ids allocated in
    /// the current batch)
    pub known_object_ids: Vec<String>,
    pub config_entry_id: Option<String>,
    /// Applied only when the entry is created
    pub disabled_by: Option<DisabledBy>,
    pub original_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
    /// Soft-deleted entries, restored if the same unique_id comes back
    #[serde(default)]
    pub deleted_entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Entity Registry
///
/// Entries are stored as `Arc<EntityEntry>` in insertion order; a secondary
/// index maps `(domain, platform, unique_id)` to the entity_id.
pub struct EntityRegistry {
    storage: Arc<Storage>,
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,
    by_key: DashMap<RegistryKey, String>,
    deleted: RwLock<IndexMap<RegistryKey, Arc<EntityEntry>>>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_key: DashMap::new(),
            deleted: RwLock::new(IndexMap::new()),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<EntityRegistryData>().await? {
            info!("Loading {} entities from storage", data.entities.len());

            for entry in data.entities {
                self.index_entry(Arc::new(entry));
            }
            if let Ok(mut deleted) = self.deleted.write() {
                for entry in data.deleted_entities {
                    deleted.insert(entry.key(), Arc::new(entry));
                }
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = EntityRegistryData {
            entities: self.iter().iter().map(|e| (**e).clone()).collect(),
            deleted_entities: self
                .deleted
                .read()
                .map(|d| d.values().map(|e| (**e).clone()).collect())
                .unwrap_or_default(),
        };
        let count = data.entities.len();
        self.storage.save(&data).await?;
        debug!("Saved {} entities to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        self.by_key.insert(entry.key(), entry.entity_id.clone());
        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entry.entity_id.clone(), entry);
        }
    }

    fn unindex_entry(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))?;
        self.by_key.remove(&entry.key());
        Some(entry)
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Entity id registered for `(domain, platform, unique_id)`
    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        self.by_key
            .get(&(domain.to_string(), platform.to_string(), unique_id.to_string()))
            .map(|id| id.clone())
    }

    /// Return the entry for `(domain, platform, unique_id)`, creating it if needed
    ///
    /// A soft-deleted entry with the same key is restored, keeping its old
    /// entity_id when that id is still free. A new entry gets an id generated
    /// from the suggested object id, avoiding registered and known ids.
    pub fn get_or_create(
        &self,
        domain: &str,
        platform: &str,
        unique_id: &str,
        options: EntryOptions,
    ) -> Arc<EntityEntry> {
        if let Some(entity_id) = self.get_entity_id(domain, platform, unique_id) {
            if let Some(existing) = self.get(&entity_id) {
                if options.config_entry_id.is_some()
                    && existing.config_entry_id != options.config_entry_id
                {
                    if let Ok(updated) = self.update(&entity_id, |entry| {
                        entry.config_entry_id = options.config_entry_id.clone();
                    }) {
                        return updated;
                    }
                }
                return existing;
            }
        }

        let key: RegistryKey = (domain.to_string(), platform.to_string(), unique_id.to_string());
        let restored = self
            .deleted
            .write()
            .ok()
            .and_then(|mut d| d.shift_remove(&key));

        let entry = match restored {
            Some(deleted) => {
                let mut entry = (*deleted).clone();
                if self.is_registered(&entry.entity_id)
                    || options.known_object_ids.contains(&entry.entity_id)
                {
                    entry.entity_id = self.generate_entity_id(
                        domain,
                        entry.entity_id.split_once('.').map(|(_, o)| o).unwrap_or(unique_id),
                        &options.known_object_ids,
                    );
                }
                if options.config_entry_id.is_some() {
                    entry.config_entry_id = options.config_entry_id;
                }
                entry.modified_at = Utc::now();
                info!(entity_id = %entry.entity_id, "Restored deleted entity");
                entry
            }
            None => {
                let suggested = options
                    .suggested_object_id
                    .unwrap_or_else(|| format!("{} {}", platform, unique_id));
                let entity_id =
                    self.generate_entity_id(domain, &suggested, &options.known_object_ids);
                let mut entry = EntityEntry::new(entity_id, platform, unique_id);
                entry.config_entry_id = options.config_entry_id;
                entry.disabled_by = options.disabled_by;
                entry.original_name = options.original_name;
                info!(entity_id = %entry.entity_id, "Registered new entity");
                entry
            }
        };

        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        entry
    }

    /// Apply `f` to a copy of the entry and store the result
    ///
    /// Changing `entity_id` inside `f` is rejected when the new id is taken.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let current = self
            .get(entity_id)
            .ok_or_else(|| EntityRegistryError::NotFound(entity_id.to_string()))?;

        let mut entry = (*current).clone();
        f(&mut entry);
        entry.modified_at = Utc::now();

        if entry.entity_id != entity_id && self.is_registered(&entry.entity_id) {
            return Err(EntityRegistryError::EntityIdTaken(entry.entity_id));
        }

        self.unindex_entry(entity_id);
        let entry = Arc::new(entry);
        self.index_entry(Arc::clone(&entry));
        Ok(entry)
    }

    /// Remove an entity, keeping it as a soft-deleted entry
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self.unindex_entry(entity_id)?;
        if let Ok(mut deleted) = self.deleted.write() {
            deleted.insert(entry.key(), Arc::clone(&entry));
        }
        info!("Removed entity: {}", entity_id);
        Some(entry)
    }

    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    pub fn is_deleted(&self, domain: &str, platform: &str, unique_id: &str) -> bool {
        let key = (domain.to_string(), platform.to_string(), unique_id.to_string());
        self.deleted
            .read()
            .map(|d| d.contains_key(&key))
            .unwrap_or(false)
    }

    /// Generate an entity_id in `domain` not taken by the registry or `known_ids`
    ///
    /// The suggested object id is slugified; collisions get `_2`, `_3`, ...
    pub fn generate_entity_id(
        &self,
        domain: &str,
        suggested_object_id: &str,
        known_ids: &[String],
    ) -> String {
        let preferred = format!("{}.{}", domain, slugify(suggested_object_id));
        let is_free =
            |candidate: &str| !self.is_registered(candidate) && !known_ids.iter().any(|k| k == candidate);

        if is_free(&preferred) {
            return preferred;
        }

        (2..)
            .map(|n| format!("{}_{}", preferred, n))
            .find(|candidate| is_free(candidate))
            .unwrap_or(preferred)
    }

    /// All entries in insertion order
    pub fn iter(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Entries created for a config entry
    pub fn entries_for_config_entry(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        self.iter()
            .into_iter()
            .filter(|e| e.config_entry_id.as_deref() == Some(config_entry_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
