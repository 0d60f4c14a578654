pub mod scanner_models;
pub mod scanner_service;

pub use scanner_models::*;
pub use scanner_service::*;
