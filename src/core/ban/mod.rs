// Core ban module - escalating bans with lazy expiry.

pub mod ban_models;
pub mod ban_service;

pub use ban_models::*;
pub use ban_service::*;
