// Content and account directories - stand-ins for the external content and
// identity stores.

pub mod in_memory;
pub mod json_store;

pub use in_memory::{InMemoryAccountDirectory, InMemoryContentDirectory};
pub use json_store::JsonContentDirectory;
