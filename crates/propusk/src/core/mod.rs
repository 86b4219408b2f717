//! Core utilities: configuration, errors, logging

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::AppConfig;
pub use error::{AuthError, AuthResult};
pub use logging::init_logger;
