// Daemon configuration (environment variables)

use anyhow::{Context, Result};
use budgetflow_core::application::{DispatchMode, MaintenanceConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "~/.budgetflow/jobs.db";
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;
pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 30_000;
pub const DEFAULT_CLEAN_GRACE_HOURS: u64 = 168;
pub const DEFAULT_CLEAN_LIMIT: u64 = 1000;
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: String,
    pub log_format: LogFormat,
    /// Daily rolling log files are written here when set
    pub log_dir: Option<PathBuf>,
    pub dispatch_mode: DispatchMode,
    pub worker_concurrency: usize,
    pub stall_threshold: Duration,
    /// How often workers refresh the heartbeat of a running job
    pub heartbeat_interval: Duration,
    pub maintenance: MaintenanceConfig,
    pub shutdown_grace: Duration,
    /// Read JSON-lines events from stdin and publish them
    pub event_feed: bool,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("BUDGETFLOW_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = if db_path == ":memory:" {
            db_path
        } else {
            shellexpand::tilde(&db_path).into_owned()
        };

        let log_format = match lookup("BUDGETFLOW_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let log_dir = lookup("BUDGETFLOW_LOG_DIR")
            .filter(|dir| !dir.is_empty())
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned()));

        let dispatch_mode = match lookup("BUDGETFLOW_DISPATCH_MODE").as_deref() {
            None | Some("sync") => DispatchMode::Sync,
            Some("async") => DispatchMode::Async,
            Some(other) => anyhow::bail!("BUDGETFLOW_DISPATCH_MODE must be sync or async, got {}", other),
        };

        let worker_concurrency: usize = parse(
            &lookup,
            "BUDGETFLOW_WORKER_CONCURRENCY",
            DEFAULT_WORKER_CONCURRENCY,
        )?;
        if worker_concurrency == 0 {
            anyhow::bail!("BUDGETFLOW_WORKER_CONCURRENCY must be at least 1");
        }

        let stall_threshold_ms: u64 = parse(
            &lookup,
            "BUDGETFLOW_STALL_THRESHOLD_MS",
            DEFAULT_STALL_THRESHOLD_MS,
        )?;
        // Workers must refresh heartbeats well inside the stall threshold
        let heartbeat_interval_ms: u64 = parse(
            &lookup,
            "BUDGETFLOW_HEARTBEAT_INTERVAL_MS",
            stall_threshold_ms / 3,
        )?;
        if heartbeat_interval_ms == 0 {
            anyhow::bail!(
                "heartbeat interval must be at least 1ms (BUDGETFLOW_STALL_THRESHOLD_MS is {})",
                stall_threshold_ms
            );
        }
        if heartbeat_interval_ms >= stall_threshold_ms {
            anyhow::bail!(
                "BUDGETFLOW_HEARTBEAT_INTERVAL_MS ({}) must be below BUDGETFLOW_STALL_THRESHOLD_MS ({})",
                heartbeat_interval_ms,
                stall_threshold_ms
            );
        }
        let grace_hours: u64 = parse(&lookup, "BUDGETFLOW_CLEAN_GRACE_HOURS", DEFAULT_CLEAN_GRACE_HOURS)?;
        let clean_limit: u64 = parse(&lookup, "BUDGETFLOW_CLEAN_LIMIT", DEFAULT_CLEAN_LIMIT)?;
        let interval_secs: u64 = parse(
            &lookup,
            "BUDGETFLOW_MAINTENANCE_INTERVAL_SECS",
            DEFAULT_MAINTENANCE_INTERVAL_SECS,
        )?;
        if interval_secs == 0 {
            anyhow::bail!("BUDGETFLOW_MAINTENANCE_INTERVAL_SECS must be at least 1");
        }
        let shutdown_grace_secs: u64 = parse(
            &lookup,
            "BUDGETFLOW_SHUTDOWN_GRACE_SECS",
            DEFAULT_SHUTDOWN_GRACE_SECS,
        )?;

        let event_feed = matches!(
            lookup("BUDGETFLOW_EVENT_FEED").as_deref(),
            Some("1") | Some("true") | Some("stdin")
        );

        Ok(Self {
            db_path,
            log_format,
            log_dir,
            dispatch_mode,
            worker_concurrency,
            stall_threshold: Duration::from_millis(stall_threshold_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            maintenance: MaintenanceConfig {
                grace: Duration::from_secs(grace_hours * 3600),
                limit: clean_limit,
                interval: Duration::from_secs(interval_secs),
            },
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            event_feed,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
