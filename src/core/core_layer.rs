// The core module contains all business logic.
// Each feature gets its own submodule.

pub mod clock;
pub mod collaborators;
pub mod context;
pub mod store_error;

#[path = "audit/mod.rs"]
pub mod audit;

#[path = "ban/mod.rs"]
pub mod ban;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "rate_limit/mod.rs"]
pub mod rate_limit;

#[path = "scanner/mod.rs"]
pub mod scanner;

pub use clock::{Clock, SystemClock};
pub use context::{KeyScope, RequestContext};
pub use store_error::StoreError;
