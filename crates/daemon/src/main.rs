//! Budgetflow daemon - event dispatcher, queue workers, recovery and maintenance
//! wired together over one SQLite job store

mod config;
mod feed;
mod handlers;
mod processors;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use budgetflow_core::application::{
    shutdown_channel, EventDispatcher, JobQueue, MaintenanceScheduler, QueueManager,
    StallReclaimer, WorkerOptions,
};
use budgetflow_core::port::id_provider::UuidProvider;
use budgetflow_core::port::time_provider::SystemTimeProvider;
use budgetflow_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use config::{DaemonConfig, LogFormat};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str =
    "budgetflow=info,budgetflow_core=info,budgetflow_infra_sqlite=info";
const LOG_FILE_PREFIX: &str = "budgetflow.log";

/// Install the global subscriber. The returned guard flushes the file writer on drop.
fn init_logging(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("failed to create env filter")?;

    // Optional daily rolling file, always JSON
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match config.log_format {
        // Production: JSON structured logging
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        // Development: pretty formatting with colors
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = init_logging(&config)?;

    info!("Budgetflow v{} starting...", VERSION);
    info!(
        db_path = %config.db_path,
        dispatch_mode = ?config.dispatch_mode,
        concurrency = config.worker_concurrency,
        stall_threshold_ms = config.stall_threshold.as_millis() as u64,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
        "Configuration loaded"
    );

    // 2. Database
    if config.db_path != ":memory:" {
        if let Some(parent) = Path::new(&config.db_path).parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let pool = create_pool(&config.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 3. Dependency wiring
    let store = Arc::new(SqliteJobStore::new(pool.clone()));
    let queue = Arc::new(JobQueue::new(
        store,
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
    ));
    for queue_config in processors::queue_configs() {
        queue.configure(queue_config)?;
    }

    let dispatcher = Arc::new(EventDispatcher::new(config.dispatch_mode));
    handlers::register(&dispatcher, &queue);

    // 4. Stall recovery for jobs a previous process left active
    let reclaimer = StallReclaimer::new(
        Arc::clone(&queue),
        config.stall_threshold,
        config.stall_threshold / 2,
    );
    match reclaimer.reclaim_all().await {
        Ok(stats) => info!(
            requeued = stats.requeued,
            failed = stats.failed,
            "Startup stall recovery completed"
        ),
        Err(e) => error!(error = %e, "Startup stall recovery failed"),
    }

    // 5. Workers
    let manager = QueueManager::new(Arc::clone(&queue));
    let worker_options = WorkerOptions::default()
        .concurrency(config.worker_concurrency)
        .heartbeat_interval(config.heartbeat_interval)
        .shutdown_grace(config.shutdown_grace);
    for (queue_name, job_name, processor) in processors::registrations() {
        manager.register_job_processor(queue_name, job_name, processor)?;
        manager.set_worker_options(queue_name, worker_options.clone());
    }
    manager.start()?;

    // 6. Background services
    let (shutdown_tx, _shutdown_rx) = shutdown_channel();
    let mut background = tokio::task::JoinSet::new();
    background.spawn(reclaimer.run(shutdown_tx.subscribe()));
    background.spawn(
        MaintenanceScheduler::new(Arc::clone(&queue), config.maintenance.clone())
            .run(shutdown_tx.subscribe()),
    );
    if config.event_feed {
        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        let feed_dispatcher = Arc::clone(&dispatcher);
        let token = shutdown_tx.subscribe();
        background.spawn(async move {
            feed::run(reader, feed_dispatcher, token).await;
        });
        info!("Reading events from stdin");
    }

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: stop producers, then consumers, then services
    let aborted = dispatcher.shutdown(config.shutdown_grace).await;
    if aborted > 0 {
        warn!(aborted = aborted, "Async handlers aborted at shutdown");
    }
    manager.shutdown().await;
    shutdown_tx.shutdown();
    if tokio::time::timeout(config.shutdown_grace, async {
        while background.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Background services did not stop in time");
        background.abort_all();
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
