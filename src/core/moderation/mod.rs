// Core moderation module - flag workflow, queue automation and visibility.

pub mod moderation_models;
pub mod moderation_service;

pub use moderation_models::*;
pub use moderation_service::*;
