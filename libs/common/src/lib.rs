//! Ruleforge common library
//!
//! Shared by every Ruleforge binary:
//! - logging setup with runtime level changes
//! - layered configuration loading
//! - shutdown signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};
pub use logging::LogConfig;

// Re-export common dependencies
pub use serde;
pub use serde_json;
pub use tokio;
