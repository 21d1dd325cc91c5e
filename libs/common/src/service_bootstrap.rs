//! Unified service bootstrap utilities
//!
//! Provides common initialization functionality for all bridge services,
//! including startup banners, logging initialization, and environment setup.

use crate::config_loader::LoggingConfig;
use crate::logging::{self, LogConfig};
use std::path::Path;
use tracing::info;

/// Service metadata for startup
pub struct ServiceInfo {
    /// Service name (e.g., "syncsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ███████╗██╗   ██╗███╗   ██╗ ██████╗███████╗██████╗ ██╗   ██╗
 ██╔════╝╚██╗ ██╔╝████╗  ██║██╔════╝██╔════╝██╔══██╗██║   ██║
 ███████╗ ╚████╔╝ ██╔██╗ ██║██║     ███████╗██████╔╝██║   ██║
 ╚════██║  ╚██╔╝  ██║╚██╗██║██║     ╚════██║██╔══██╗╚██╗ ██╔╝
 ███████║   ██║   ██║ ╚████║╚██████╗███████║██║  ██║ ╚████╔╝
 ╚══════╝   ╚═╝   ╚═╝  ╚═══╝ ╚═════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
    "#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
}

/// Initialize logging for a service with standard configuration
///
/// Log root directory priority:
/// 1. BRIDGE_LOG_DIR environment variable
/// 2. logging_config.dir
/// 3. Default "logs"
pub fn init_logging(service: &ServiceInfo, logging_config: &LoggingConfig) -> anyhow::Result<()> {
    logging::init_log_root(Some(logging_config.dir.as_str()));

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        level: logging_config.level.clone(),
        enable_json: logging_config.enable_json,
        ..Default::default()
    };

    logging::init_with_config(log_config).map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}

/// Load environment variables from a `.env` file in development mode
///
/// Variables already present in the environment are never overridden.
/// In release builds this is a no-op; production sets variables externally.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        load_env_from(Path::new(".env"));
    }
}

/// Returns whether the file was found and applied
#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn load_env_from(path: &Path) -> bool {
    dotenv::from_path(path).is_ok()
}
