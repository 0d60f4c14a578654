// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

pub mod sqlite;

#[path = "audit/mod.rs"]
pub mod audit;

#[path = "ban/mod.rs"]
pub mod ban;

#[path = "rate_limit/mod.rs"]
pub mod rate_limit;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "content/mod.rs"]
pub mod content;

#[path = "classifier/mod.rs"]
pub mod classifier;

#[path = "notify/mod.rs"]
pub mod notify;
