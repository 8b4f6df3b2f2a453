//! Config Entries
//!
//! Config entries are persisted, UI-configured instances of an integration.
//! The manager stores them in `.storage/core.config_entries` and drives
//! their lifecycle through the [`ConfigEntryHandler`] registered for each
//! domain.

pub mod entry;
pub mod manager;
pub mod state_machine;

pub use entry::{
    ConfigEntry, ConfigEntryDisabledBy, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate,
};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult,
    ConfigEntryHandler, EntrySetupError,
};
pub use state_machine::InvalidTransition;
