//! Configuration for the synchronization service
//!
//! Loaded in layers: defaults, config file, the `ODOO_*`/`MAGENTO_*`
//! connection variables listed in [`ENV_ALIASES`], then `SYNCSRV_*`
//! variables with `__` as nesting separator.

use crate::error::SyncErrorKind;
use common::LoggingConfig;
use errors::{invalid_config, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SERVICE_NAME: &str = "syncsrv";

/// Used when neither `--config` nor `CONFIG_FILE` is given and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "config/syncsrv.yaml";

/// Connection variables accepted under their conventional names
pub const ENV_ALIASES: &[(&str, &str)] = &[
    ("ODOO_URL", "odoo.url"),
    ("ODOO_HOST", "odoo.host"),
    ("ODOO_PORT", "odoo.port"),
    ("ODOO_DB", "odoo.database"),
    ("ODOO_USER", "odoo.username"),
    ("ODOO_PASSWORD", "odoo.password"),
    ("MAGENTO_URL", "magento.url"),
    ("MAGENTO_USER", "magento.username"),
    ("MAGENTO_PASSWORD", "magento.password"),
];

const DEFAULT_ODOO_HOST: &str = "localhost";
const DEFAULT_ODOO_PORT: u16 = 8069;
const REDACTED: &str = "********";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncsrvConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub odoo: OdooConfig,
    #[serde(default)]
    pub magento: MagentoConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

/// Odoo JSON-RPC connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OdooConfig {
    #[serde(default = "default_odoo_url")]
    pub url: String,
    /// When set with or without `port`, replaces `url` with `http://host:port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_odoo_database")]
    pub database: String,
    #[serde(default = "default_admin")]
    pub username: String,
    #[serde(default = "default_admin")]
    pub password: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OdooConfig {
    fn default() -> Self {
        Self {
            url: default_odoo_url(),
            host: None,
            port: None,
            database: default_odoo_database(),
            username: default_admin(),
            password: default_admin(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl OdooConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Fold `host`/`port` into `url`
    fn resolve_url(&mut self) {
        if self.host.is_none() && self.port.is_none() {
            return;
        }
        let host = self.host.take();
        let host = host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_ODOO_HOST);
        let port = self.port.take().unwrap_or(DEFAULT_ODOO_PORT);
        self.url = format!("http://{}:{}", host, port);
    }
}

/// Magento REST connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MagentoConfig {
    #[serde(default = "default_magento_url")]
    pub url: String,
    #[serde(default = "default_admin")]
    pub username: String,
    #[serde(default = "default_magento_password")]
    pub password: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// How long a fetched admin token is reused
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Order statuses that count as new
    #[serde(default = "default_new_order_statuses")]
    pub new_order_statuses: Vec<String>,
}

impl Default for MagentoConfig {
    fn default() -> Self {
        Self {
            url: default_magento_url(),
            username: default_admin(),
            password: default_magento_password(),
            timeout_secs: default_request_timeout_secs(),
            token_lifetime_secs: default_token_lifetime_secs(),
            page_size: default_page_size(),
            new_order_statuses: default_new_order_statuses(),
        }
    }
}

impl MagentoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Bulk concurrency bound
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// Background job worker pool size
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            lease_timeout_secs: default_lease_timeout_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_retryable_kinds")]
    pub retryable_kinds: Vec<SyncErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            retryable_kinds: default_retryable_kinds(),
        }
    }
}

/// Periodic bulk syncs in `serve` mode; absent intervals are not scheduled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub products_interval_secs: Option<u64>,
    #[serde(default)]
    pub orders_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifierConfig {
    /// Operator alert webhook; alerts are only logged when absent
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}
fn default_odoo_url() -> String {
    "http://localhost:8069".to_string()
}
fn default_odoo_database() -> String {
    "odoo".to_string()
}
fn default_admin() -> String {
    "admin".to_string()
}
fn default_magento_url() -> String {
    "http://localhost".to_string()
}
fn default_magento_password() -> String {
    "admin123".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_token_lifetime_secs() -> u64 {
    3600
}
fn default_page_size() -> u32 {
    50
}
fn default_new_order_statuses() -> Vec<String> {
    vec!["pending".to_string(), "processing".to_string()]
}
fn default_parallelism() -> usize {
    4
}
fn default_lease_timeout_secs() -> u64 {
    300
}
fn default_max_concurrent_jobs() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_retryable_kinds() -> Vec<SyncErrorKind> {
    vec![
        SyncErrorKind::SourceUnavailable,
        SyncErrorKind::TargetUnavailable,
        SyncErrorKind::RateLimited,
    ]
}
fn default_notifier_timeout_secs() -> u64 {
    10
}

impl SyncsrvConfig {
    /// Load configuration from defaults, optional file and environment
    ///
    /// Without an explicit path, `config/syncsrv.yaml` is used when present.
    pub fn load(path: Option<&Path>) -> BridgeResult<Self> {
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let file = match path {
            Some(path) => Some(path),
            None if default_path.exists() => Some(default_path.as_path()),
            None => None,
        };
        let mut config: Self = common::load_layered(SERVICE_NAME, file, ENV_ALIASES)?;
        config.odoo.resolve_url();
        Ok(config)
    }

    /// Copy safe to print: passwords masked, webhook reduced to its origin
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.odoo.password = REDACTED.to_string();
        config.magento.password = REDACTED.to_string();
        config.notifier.webhook_url = config.notifier.webhook_url.as_deref().map(|url| {
            match reqwest::Url::parse(url.trim()) {
                Ok(parsed) => format!("{}/{}", parsed.origin().ascii_serialization(), REDACTED),
                Err(_) => REDACTED.to_string(),
            }
        });
        config
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> BridgeResult<()> {
        if self.odoo.url.trim().is_empty() {
            return Err(invalid_config!("odoo.url", "must not be empty"));
        }
        if self.magento.url.trim().is_empty() {
            return Err(invalid_config!("magento.url", "must not be empty"));
        }
        if self.magento.page_size == 0 {
            return Err(invalid_config!("magento.page_size", "must be at least 1"));
        }
        if self.sync.parallelism == 0 {
            return Err(invalid_config!("sync.parallelism", "must be at least 1"));
        }
        if self.sync.lease_timeout_secs == 0 {
            return Err(invalid_config!(
                "sync.lease_timeout_secs",
                "must be at least 1"
            ));
        }
        if self.sync.max_concurrent_jobs == 0 {
            return Err(invalid_config!(
                "sync.max_concurrent_jobs",
                "must be at least 1"
            ));
        }

        let retry = &self.sync.retry;
        if retry.max_attempts == 0 {
            return Err(invalid_config!("sync.retry.max_attempts", "must be at least 1"));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(invalid_config!(
                "sync.retry.backoff_multiplier",
                "must be a number >= 1.0"
            ));
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(invalid_config!(
                "sync.retry.max_delay_ms",
                "must not be lower than initial_delay_ms"
            ));
        }
        if let Some(kind) = retry.retryable_kinds.iter().find(|k| !k.is_transient()) {
            return Err(invalid_config!(
                "sync.retry.retryable_kinds",
                format!("{} is terminal and cannot be retried", kind)
            ));
        }

        let schedule = &self.sync.schedule;
        if schedule.products_interval_secs == Some(0) {
            return Err(invalid_config!(
                "sync.schedule.products_interval_secs",
                "must be at least 1"
            ));
        }
        if schedule.orders_interval_secs == Some(0) {
            return Err(invalid_config!(
                "sync.schedule.orders_interval_secs",
                "must be at least 1"
            ));
        }

        if let Some(url) = &self.notifier.webhook_url {
            if url.trim().is_empty() {
                return Err(invalid_config!("notifier.webhook_url", "must not be empty"));
            }
        }

        Ok(())
    }
}
