// Core rate-limit module - layered per-action thresholds and weighted budgets.

pub mod rate_limit_models;
pub mod rate_limit_service;

pub use rate_limit_models::*;
pub use rate_limit_service::*;
