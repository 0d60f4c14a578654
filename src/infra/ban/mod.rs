// Implementations of the ban store.

pub mod in_memory;
pub mod sqlite_store;

pub use in_memory::InMemoryBanStore;
pub use sqlite_store::SqliteBanStore;
