//! Error types for platforms, entities and components

use thiserror::Error;

/// What a platform adapter's setup can fail with
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The device or service isn't reachable yet; setup is retried
    #[error("not ready: {0}")]
    NotReady(String),

    /// The adapter has no implementation for this entry point
    #[error("entry point not supported by this platform")]
    NotSupported,

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Entity(#[from] EntityPlatformError),
}

impl PlatformError {
    pub fn not_ready(reason: impl Into<String>) -> Self {
        PlatformError::NotReady(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        PlatformError::Failed(reason.into())
    }
}

/// Errors raised while adding or removing entities
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityPlatformError {
    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("Entity id already exists: {0}")]
    DuplicateEntityId(String),

    /// The platform was reset while the operation was in flight
    #[error("Platform has been reset")]
    PlatformReset,

    #[error("Task failed: {0}")]
    Join(String),
}

/// Errors returned by entity updates and entity service handlers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityError {
    #[error("update failed: {0}")]
    UpdateFailed(String),

    #[error("service {0} not supported")]
    NotSupported(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComponentError {
    #[error("Config entry {0} has already been set up")]
    EntryAlreadySetUp(String),

    #[error("Config entry {0} was never loaded")]
    EntryNotLoaded(String),

    #[error("Unable to find platform {platform} for {domain}")]
    UnknownPlatform { domain: String, platform: String },

    #[error("Entity {0} not found")]
    EntityNotFound(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;
