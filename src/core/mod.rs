//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod health_server;
pub mod logging;
pub mod metrics;
pub mod process;
pub mod retry;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::PipelineSettings;
pub use error::{AppError, AppResult};
pub use logging::init_logger;
