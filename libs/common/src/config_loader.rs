//! Configuration loading helper functions
//!
//! Layered loading with figment. Priority, lowest to highest:
//! 1. Built-in defaults (`T::default()`)
//! 2. Configuration file (YAML, TOML or JSON by extension)
//! 3. Aliased environment variables (e.g. `ODOO_DB` -> `odoo.database`)
//! 4. Service-prefixed environment variables with `__` nesting
//!    (e.g. `SYNCSRV_SYNC__PARALLELISM` -> `sync.parallelism`)

use errors::{BridgeError, BridgeResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Logging section shared by every service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log root directory
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Write the log file as JSON lines
    #[serde(default)]
    pub enable_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            enable_json: false,
        }
    }
}

/// Merge a configuration file into the figment, choosing the format by extension
fn merge_file(figment: Figment, path: &Path) -> BridgeResult<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| BridgeError::Configuration("Config file must have an extension".into()))?;

    let figment = match extension {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => {
            return Err(BridgeError::Configuration(format!(
                "Unsupported config file format: {}",
                extension
            )))
        },
    };
    Ok(figment)
}

/// Build the layered figment without extracting it
///
/// `env_aliases` maps a whole variable name onto a dotted key, e.g.
/// `("ODOO_DB", "odoo.database")`. Variables not listed are ignored.
pub fn build_figment<T>(
    service_name: &str,
    file: Option<&Path>,
    env_aliases: &[(&str, &str)],
) -> BridgeResult<Figment>
where
    T: Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = file {
        if !path.exists() {
            return Err(BridgeError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        info!("Loading configuration from: {}", path.display());
        figment = merge_file(figment, path)?;
    } else {
        debug!("No configuration file, using defaults and environment");
    }

    if !env_aliases.is_empty() {
        let aliases: Vec<(String, String)> = env_aliases
            .iter()
            .map(|(var, key)| (var.to_string(), key.to_string()))
            .collect();
        figment = figment.merge(Env::raw().filter_map(move |var| {
            aliases
                .iter()
                .find(|(name, _)| var.as_str().eq_ignore_ascii_case(name))
                .map(|(_, key)| key.clone().into())
        }));
    }

    let service_prefix = format!("{}_", service_name.to_uppercase());
    Ok(figment.merge(Env::prefixed(&service_prefix).split("__")))
}

/// Load a service configuration from defaults, file and environment
pub fn load_layered<T>(
    service_name: &str,
    file: Option<&Path>,
    env_aliases: &[(&str, &str)],
) -> BridgeResult<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    build_figment::<T>(service_name, file, env_aliases)?
        .extract()
        .map_err(|e| BridgeError::Configuration(format!("Failed to load configuration: {}", e)))
}
