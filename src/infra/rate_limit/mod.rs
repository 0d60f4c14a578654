// Implementations of the rate-limit store.

pub mod in_memory;
pub mod sqlite_store;

pub use in_memory::InMemoryRateLimitStore;
pub use sqlite_store::SqliteRateLimitStore;
