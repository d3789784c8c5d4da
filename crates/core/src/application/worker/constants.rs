// Worker constants (no magic values)
use std::time::Duration;

/// Sleep between claim attempts when the queue is empty (100ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep after a store error before claiming again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Jobs run concurrently by one worker unless configured otherwise
pub const DEFAULT_CONCURRENCY: usize = 1;

/// How often a running job refreshes its heartbeat (5s)
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Active jobs without a heartbeat for this long are reclaimed (30s)
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(30);

/// How often the stall reclaimer sweeps (15s)
pub const DEFAULT_STALL_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Floor for every periodic tick; a zero period would panic in tokio
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Wait for in-flight jobs on shutdown before aborting them (5s)
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
