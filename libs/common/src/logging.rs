//! Unified logging module for the bridge services
//!
//! Console output plus a daily rolling log file per service, with
//! background compression of old files.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] target: message fields`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] syncsrv::engine: Product synced sku=A1`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        write!(writer, "{}: ", event.metadata().target())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking writer flushing for the lifetime of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

// ============================================================================
// Log Root Directory Configuration
// ============================================================================

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "BRIDGE_LOG_DIR";

/// Global log root directory (initialized once from config or env)
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize log root directory from config or environment
///
/// Priority:
/// 1. `BRIDGE_LOG_DIR` environment variable (highest)
/// 2. `config_dir` parameter
/// 3. Default value "logs" (lowest)
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Get log root directory
///
/// Falls back to the environment variable or "logs" when `init_log_root`
/// was never called.
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs"))
    })
}

/// Default max file size: 100MB
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Daily rolling file writer with naming format `{YYYYMMDD}_{service}.log`
///
/// Rotates to `{YYYYMMDD}_{service}.{N}.log` when a file exceeds the size limit.
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: Arc<Mutex<String>>,
    current_file: Arc<Mutex<Option<File>>>,
    current_size: Arc<AtomicU64>,
    max_file_size: u64,
    rotation_count: Arc<AtomicU32>,
}

impl DailyRollingWriter {
    fn with_max_size(
        service_name: String,
        log_dir: PathBuf,
        max_file_size: u64,
    ) -> std::io::Result<Self> {
        let current_date = chrono::Local::now().format("%Y%m%d").to_string();
        let file_path = log_dir.join(format!("{}_{}.log", current_date, service_name));

        fs::create_dir_all(&log_dir)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            current_date: Arc::new(Mutex::new(current_date)),
            current_file: Arc::new(Mutex::new(Some(file))),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    fn rotate_by_size(&self) -> std::io::Result<()> {
        let current_date = self
            .current_date
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;

        let count = self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1;
        let new_file_path = self.log_dir.join(format!(
            "{}_{}.{}.log",
            *current_date, self.service_name, count
        ));

        let new_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&new_file_path)?;

        self.current_size.store(0, Ordering::SeqCst);

        let mut current_file = self
            .current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
        *current_file = Some(new_file);

        Ok(())
    }

    fn get_writer(&self) -> std::io::Result<std::sync::MutexGuard<'_, Option<File>>> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let mut current_date = self
            .current_date
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;

        if *current_date != today {
            let new_file_path = self
                .log_dir
                .join(format!("{}_{}.log", today, self.service_name));
            fs::create_dir_all(&self.log_dir)?;

            let new_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&new_file_path)?;

            *current_date = today;
            self.rotation_count.store(0, Ordering::SeqCst);
            self.current_size.store(0, Ordering::SeqCst);

            let mut current_file = self
                .current_file
                .lock()
                .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
            *current_file = Some(new_file);
        }

        self.current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let current_size = self.current_size.load(Ordering::Relaxed);
        if current_size + buf.len() as u64 > self.max_file_size {
            self.rotate_by_size()?;
        }

        if let Some(ref mut file) = *self.get_writer()? {
            let written = file.write(buf)?;
            self.current_size
                .fetch_add(written as u64, Ordering::Relaxed);
            Ok(written)
        } else {
            Ok(0)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(ref mut file) = *self.get_writer()? {
            file.flush()
        } else {
            Ok(())
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "syncsrv")
    pub service_name: String,
    /// Directory for this service's log files
    pub log_dir: PathBuf,
    /// Base filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Enable JSON format for the file layer
    pub enable_json: bool,
    /// Max size of one log file before size-based rotation
    pub max_file_size: u64,
    /// Compress files older than this many days
    pub compress_after_days: u64,
    /// Delete compressed files older than this many days
    pub retention_days: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            level: "info".to_string(),
            enable_json: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            compress_after_days: 7,
            retention_days: 365,
        }
    }
}

/// Build the filter string: `RUST_LOG` wins, otherwise the configured level
/// with the service's own target raised to debug when the base level is info.
fn initial_filter(config: &LogConfig) -> String {
    if let Ok(env_str) = std::env::var("RUST_LOG") {
        if !env_str.is_empty() {
            return env_str;
        }
    }
    if config.level.eq_ignore_ascii_case("info") {
        format!("info,{}=debug", config.service_name)
    } else {
        config.level.clone()
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.log_dir)?;

    let rolling = DailyRollingWriter::with_max_size(
        config.service_name.clone(),
        config.log_dir.clone(),
        config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(rolling);

    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => {
            eprintln!("Warning: GUARDS lock was poisoned, recovering...");
            poisoned.into_inner().push(guard);
        },
    }

    let env_filter = EnvFilter::try_new(initial_filter(&config))?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_level(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);

    if tokio::runtime::Handle::try_current().is_ok() {
        start_log_compression_task(
            config.log_dir,
            config.service_name,
            config.compress_after_days,
            config.retention_days,
        );
    }

    Ok(())
}

// ==================== Log Compression Support ====================

use tokio::time::{interval, Duration};

/// Start background log compression task
pub fn start_log_compression_task(
    log_dir: PathBuf,
    service_name: String,
    compress_after_days: u64,
    retention_days: u64,
) {
    tokio::spawn(async move {
        // Let the service finish starting first
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut interval = interval(Duration::from_secs(86400));

        loop {
            interval.tick().await;
            if let Err(e) =
                compress_old_logs(&log_dir, &service_name, compress_after_days, retention_days)
                    .await
            {
                tracing::error!("Log compression error for {}: {}", service_name, e);
            }
        }
    });
}

/// Compress log files older than `compress_after_days`, delete compressed
/// logs older than `retention_days`
async fn compress_old_logs(
    log_dir: &Path,
    service_name: &str,
    compress_after_days: u64,
    retention_days: u64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use std::time::SystemTime;

    let today_prefix = chrono::Local::now().format("%Y%m%d").to_string();
    let mut entries = tokio::fs::read_dir(log_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };

        if !file_name.contains(&format!("_{}", service_name)) {
            continue;
        }

        let metadata = tokio::fs::metadata(&path).await?;
        let age = SystemTime::now().duration_since(metadata.modified()?)?;

        if file_name.ends_with(".log") {
            if file_name.starts_with(&today_prefix) {
                continue;
            }
            if age > Duration::from_secs(compress_after_days * 86400) {
                compress_file(&path).await?;
                tokio::fs::remove_file(&path).await?;
                tracing::debug!("Compressed: {}", file_name);
            }
        } else if file_name.ends_with(".log.gz")
            && age > Duration::from_secs(retention_days * 86400)
        {
            tokio::fs::remove_file(&path).await?;
            tracing::debug!("Deleted: {}", file_name);
        }
    }

    Ok(())
}

/// Compress a single file to `<path>.gz`
async fn compress_file(path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let buffer = tokio::fs::read(path).await?;
    let output_path = format!("{}.gz", path.display());

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let output = File::create(&output_path)?;
        let mut encoder = GzEncoder::new(output, Compression::best());
        encoder.write_all(&buffer)?;
        encoder.finish()?;
        Ok(())
    })
    .await??;

    Ok(())
}
