// Implementations of the moderation flag store.

pub mod in_memory;
pub mod sqlite_store;

pub use in_memory::InMemoryFlagStore;
pub use sqlite_store::SqliteFlagStore;
