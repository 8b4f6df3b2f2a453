//! Home Assistant registries
//!
//! The entity registry and the versioned JSON storage it persists through,
//! kept in the `.storage/` directory of the configuration.

pub mod entity_registry;
pub mod storage;

pub use entity_registry::{
    DisabledBy, EntityEntry, EntityRegistry, EntityRegistryData, EntityRegistryError,
    EntryOptions,
};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
