//! Bridge basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging functions
//! - layered configuration loading
//! - service bootstrap and graceful shutdown

pub mod config_loader;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use config_loader::{load_layered, LoggingConfig};
pub use logging::LogConfig;
pub use service_bootstrap::ServiceInfo;

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;
