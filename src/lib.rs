// Abuse-mitigation core: rate limiting, content risk scanning, the moderation
// flag workflow and ban escalation.
//
// **Architecture Overview:**
// - `core/` = Business logic plus the store traits it depends on
// - `infra/` = Implementations of core traits (SQLite, in-memory, files, HTTP)
//
// The binary in `main.rs` is only a composition root that runs the batch entry
// points once; the periodic scheduler lives outside this crate.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;

pub mod config;
