// Core audit module - the append-only event trail that drives ban escalation.

pub mod audit_models;
pub mod audit_service;

pub use audit_models::*;
pub use audit_service::*;
