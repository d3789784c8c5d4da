// SQLite JobStore Implementation
//
// Every transition is one statement (or one transaction), so any number of
// workers in any number of processes can share the database file. SQLite's
// single-writer lock serializes the claim `UPDATE ... RETURNING`.

use async_trait::async_trait;
use budgetflow_core::domain::job::STALLED_REASON;
use budgetflow_core::domain::{
    BackoffKind, BackoffPolicy, Job, JobId, JobLease, JobPayload, JobState, QueueMetrics,
    RetentionPolicy,
};
use budgetflow_core::error::{AppError, Result};
use budgetflow_core::port::{JobStore, ReclaimStats};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

/// Convert sqlx::Error to AppError with structured information.
///
/// Anything that means "the store cannot be reached right now" becomes
/// `QueueUnavailable` so callers fail fast and retry on their own schedule.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // Extract database-specific error code and message
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "275" => AppError::Database(format!(
                        "Check constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // SQLITE_BUSY / SQLITE_LOCKED, busy_timeout already elapsed
                    "5" | "6" | "517" => AppError::QueueUnavailable(format!(
                        "Database locked: {}",
                        db_err.message()
                    )),
                    // SQLITE_CANTOPEN
                    "14" => AppError::QueueUnavailable(format!(
                        "Cannot open database: {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => AppError::QueueUnavailable(err.to_string()),
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        sqlx::Error::Configuration(_) => AppError::Config(err.to_string()),
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn retention(policy: RetentionPolicy) -> String {
    policy.to_string()
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<bool> {
        let return_value = job
            .return_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                queue, id, name, data, state, priority,
                attempts_made, attempts_max, backoff_type, backoff_delay,
                created_at, scheduled_at, started_at, heartbeat_at, finished_at, timeout_ms,
                remove_on_complete, remove_on_fail, failed_reason, return_value
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (queue, id) DO NOTHING
            "#,
        )
        .bind(&job.queue)
        .bind(&job.id)
        .bind(&job.name)
        .bind(serde_json::to_string(job.data.as_value())?)
        .bind(job.state.as_str())
        .bind(job.priority)
        .bind(job.attempts_made)
        .bind(job.attempts_max)
        .bind(job.backoff.kind.to_string())
        .bind(job.backoff.delay_ms)
        .bind(job.created_at)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.heartbeat_at)
        .bind(job.finished_at)
        .bind(job.timeout_ms)
        .bind(retention(job.remove_on_complete))
        .bind(retention(job.remove_on_fail))
        .bind(&job.failed_reason)
        .bind(return_value)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, queue: &str, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE queue = ? AND id = ?")
            .bind(queue)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn remove(&self, queue: &str, id: &JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE queue = ? AND id = ?")
            .bind(queue)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn promote_delayed(&self, queue: &str, now_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting'
            WHERE queue = ? AND state = 'delayed' AND scheduled_at <= ?
            "#,
        )
        .bind(queue)
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<Job>> {
        // Select and update in one statement: two workers can never both
        // see the same waiting row. The paused flag is read in the same
        // statement so a pause applies to every worker at once.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'active',
                attempts_made = attempts_made + 1,
                started_at = ?,
                heartbeat_at = ?
            WHERE rowid = (
                SELECT j.rowid FROM jobs j
                WHERE j.queue = ?
                  AND j.state = 'waiting'
                  AND j.scheduled_at <= ?
                  AND j.attempts_made < j.attempts_max
                  AND NOT EXISTS (
                      SELECT 1 FROM queues q WHERE q.name = j.queue AND q.paused = 1
                  )
                ORDER BY j.priority DESC, j.created_at ASC, j.rowid ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(now_millis)
        .bind(queue)
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn heartbeat(&self, lease: &JobLease, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET heartbeat_at = ?
            WHERE queue = ? AND id = ? AND state = 'active' AND attempts_made = ?
            "#,
        )
        .bind(now_millis)
        .bind(&lease.queue)
        .bind(&lease.job_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        lease: &JobLease,
        return_value: Option<&serde_json::Value>,
        now_millis: i64,
    ) -> Result<bool> {
        let return_value = return_value.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed', finished_at = ?, heartbeat_at = NULL, return_value = ?
            WHERE queue = ? AND id = ? AND state = 'active' AND attempts_made = ?
            "#,
        )
        .bind(now_millis)
        .bind(return_value)
        .bind(&lease.queue)
        .bind(&lease.job_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn retry_later(
        &self,
        lease: &JobLease,
        scheduled_at: i64,
        reason: &str,
        now_millis: i64,
    ) -> Result<bool> {
        // A zero backoff goes straight back to waiting
        let next = if scheduled_at > now_millis {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, scheduled_at = ?, heartbeat_at = NULL, failed_reason = ?
            WHERE queue = ? AND id = ? AND state = 'active' AND attempts_made = ?
            "#,
        )
        .bind(next.as_str())
        .bind(scheduled_at)
        .bind(reason)
        .bind(&lease.queue)
        .bind(&lease.job_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, lease: &JobLease, reason: &str, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed', finished_at = ?, heartbeat_at = NULL, failed_reason = ?
            WHERE queue = ? AND id = ? AND state = 'active' AND attempts_made = ?
            "#,
        )
        .bind(now_millis)
        .bind(reason)
        .bind(&lease.queue)
        .bind(&lease.job_id)
        .bind(lease.attempt)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_failed(&self, queue: &str, id: &JobId, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting', attempts_made = 0, scheduled_at = ?,
                started_at = NULL, finished_at = NULL, failed_reason = NULL
            WHERE queue = ? AND id = ? AND state = 'failed'
            "#,
        )
        .bind(now_millis)
        .bind(queue)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn reclaim_stalled(
        &self,
        queue: &str,
        heartbeat_before: i64,
        now_millis: i64,
    ) -> Result<ReclaimStats> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let failed = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed', finished_at = ?, heartbeat_at = NULL, failed_reason = ?
            WHERE queue = ? AND state = 'active'
              AND (heartbeat_at IS NULL OR heartbeat_at < ?)
              AND attempts_made >= attempts_max
            "#,
        )
        .bind(now_millis)
        .bind(STALLED_REASON)
        .bind(queue)
        .bind(heartbeat_before)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'waiting', scheduled_at = ?, heartbeat_at = NULL
            WHERE queue = ? AND state = 'active'
              AND (heartbeat_at IS NULL OR heartbeat_at < ?)
              AND attempts_made < attempts_max
            "#,
        )
        .bind(now_millis)
        .bind(queue)
        .bind(heartbeat_before)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        if failed + requeued > 0 {
            debug!(queue = %queue, requeued = requeued, failed = failed, "Stalled jobs reclaimed");
        }
        Ok(ReclaimStats { requeued, failed })
    }

    async fn metrics(&self, queue: &str) -> Result<QueueMetrics> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs WHERE queue = ? GROUP BY state")
                .bind(queue)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut metrics = QueueMetrics {
            paused: self.is_paused(queue).await?,
            ..Default::default()
        };
        for (state, count) in rows {
            match JobState::from_str(&state)? {
                JobState::Waiting => metrics.waiting = count,
                JobState::Delayed => metrics.delayed = count,
                JobState::Active => metrics.active = count,
                JobState::Completed => metrics.completed = count,
                JobState::Failed => metrics.failed = count,
            }
        }
        Ok(metrics)
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queues (name, paused) VALUES (?, ?)
            ON CONFLICT (name) DO UPDATE SET paused = excluded.paused
            "#,
        )
        .bind(queue)
        .bind(paused)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        let paused: Option<bool> = sqlx::query_scalar("SELECT paused FROM queues WHERE name = ?")
            .bind(queue)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(paused.unwrap_or(false))
    }

    async fn clean(&self, queue: &str, finished_before: i64, limit: u64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE rowid IN (
                SELECT rowid FROM jobs
                WHERE queue = ? AND state IN ('completed', 'failed') AND finished_at < ?
                ORDER BY finished_at ASC
                LIMIT ?
            )
            "#,
        )
        .bind(queue)
        .bind(finished_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn trim(&self, queue: &str, state: JobState, keep: u32) -> Result<u64> {
        // LIMIT -1 means no limit: everything past the newest `keep`
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE rowid IN (
                SELECT rowid FROM jobs
                WHERE queue = ? AND state = ?
                ORDER BY finished_at DESC, rowid DESC
                LIMIT -1 OFFSET ?
            )
            "#,
        )
        .bind(queue)
        .bind(state.as_str())
        .bind(i64::from(keep))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn queue_names(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT queue FROM jobs UNION SELECT name FROM queues ORDER BY 1")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    queue: String,
    id: String,
    name: String,
    data: String,
    state: String,
    priority: i32,

    attempts_made: i32,
    attempts_max: i32,
    backoff_type: String,
    backoff_delay: i64,

    created_at: i64,
    scheduled_at: i64,
    started_at: Option<i64>,
    heartbeat_at: Option<i64>,
    finished_at: Option<i64>,
    timeout_ms: Option<i64>,

    remove_on_complete: String,
    remove_on_fail: String,

    failed_reason: Option<String>,
    return_value: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let return_value: Option<serde_json::Value> = self
            .return_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            queue: self.queue,
            name: self.name,
            data: JobPayload::new(serde_json::from_str(&self.data)?),
            state: JobState::from_str(&self.state)?,
            priority: self.priority,
            attempts_made: self.attempts_made,
            attempts_max: self.attempts_max,
            backoff: BackoffPolicy {
                kind: BackoffKind::from_str(&self.backoff_type)?,
                delay_ms: self.backoff_delay,
            },
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            heartbeat_at: self.heartbeat_at,
            finished_at: self.finished_at,
            timeout_ms: self.timeout_ms,
            remove_on_complete: RetentionPolicy::from_str(&self.remove_on_complete)?,
            remove_on_fail: RetentionPolicy::from_str(&self.remove_on_fail)?,
            failed_reason: self.failed_reason,
            return_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use budgetflow_core::domain::{DefaultJobOptions, JobOptions};
    use serde_json::json;

    struct TestDb {
        store: SqliteJobStore,
        path: std::path::PathBuf,
    }

    impl Drop for TestDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
            }
        }
    }

    async fn setup_test_db() -> TestDb {
        let path = std::env::temp_dir().join(format!("budgetflow-store-{}.db", uuid::Uuid::new_v4()));
        let pool = create_pool(&format!("sqlite://{}", path.display())).await.unwrap();
        run_migrations(&pool).await.unwrap();
        TestDb {
            store: SqliteJobStore::new(pool),
            path,
        }
    }

    fn job(id: &str, created_at: i64, options: JobOptions) -> Job {
        Job::new(id, created_at, "reports", "generate", JobPayload::new(json!({"budgetId": "b1"})))
            .with_options(&DefaultJobOptions::default(), &options)
    }

    #[tokio::test]
    async fn test_insert_and_find_preserves_every_field() {
        let db = setup_test_db().await;
        let original = job(
            "j1",
            1_000,
            JobOptions::new()
                .delay_ms(500)
                .attempts(4)
                .priority(3)
                .backoff(BackoffPolicy::fixed(250))
                .remove_on_complete(RetentionPolicy::KeepLatest(10))
                .remove_on_fail(true)
                .timeout_ms(2_000),
        );

        assert!(db.store.insert(&original).await.unwrap());
        let found = db.store.find("reports", &"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(found, original);

        assert!(db.store.find("audits", &"j1".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_ignored() {
        let db = setup_test_db().await;
        assert!(db.store.insert(&job("j1", 1_000, JobOptions::new())).await.unwrap());
        assert!(!db.store.insert(&job("j1", 2_000, JobOptions::new())).await.unwrap());

        let found = db.store.find("reports", &"j1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.created_at, 1_000);
    }

    #[tokio::test]
    async fn test_claim_order_and_attempt_increment() {
        let db = setup_test_db().await;
        db.store.insert(&job("low", 1_000, JobOptions::new())).await.unwrap();
        db.store
            .insert(&job("high", 2_000, JobOptions::new().priority(5)))
            .await
            .unwrap();
        db.store
            .insert(&job("later", 1_000, JobOptions::new().delay_ms(10_000)))
            .await
            .unwrap();

        let first = db.store.claim_next("reports", 5_000).await.unwrap().unwrap();
        assert_eq!(first.id, "high");
        assert_eq!(first.state, JobState::Active);
        assert_eq!(first.attempts_made, 1);
        assert_eq!(first.heartbeat_at, Some(5_000));

        let second = db.store.claim_next("reports", 5_000).await.unwrap().unwrap();
        assert_eq!(second.id, "low");

        // Delayed job is not waiting yet
        assert!(db.store.claim_next("reports", 5_000).await.unwrap().is_none());
        assert_eq!(db.store.promote_delayed("reports", 11_000).await.unwrap(), 1);
        assert_eq!(db.store.claim_next("reports", 11_000).await.unwrap().unwrap().id, "later");
    }

    #[tokio::test]
    async fn test_paused_queue_yields_nothing() {
        let db = setup_test_db().await;
        db.store.insert(&job("j1", 1_000, JobOptions::new())).await.unwrap();

        db.store.set_paused("reports", true).await.unwrap();
        assert!(db.store.is_paused("reports").await.unwrap());
        assert!(db.store.claim_next("reports", 2_000).await.unwrap().is_none());

        db.store.set_paused("reports", false).await.unwrap();
        assert!(db.store.claim_next("reports", 2_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lease_guards_transitions() {
        let db = setup_test_db().await;
        db.store.insert(&job("j1", 1_000, JobOptions::new())).await.unwrap();
        let claimed = db.store.claim_next("reports", 2_000).await.unwrap().unwrap();
        let lease = claimed.lease();

        let stale = JobLease {
            attempt: lease.attempt + 1,
            ..lease.clone()
        };
        assert!(!db.store.complete(&stale, None, 3_000).await.unwrap());
        assert!(db.store.heartbeat(&lease, 2_500).await.unwrap());

        assert!(db
            .store
            .complete(&lease, Some(&json!({"pages": 3})), 3_000)
            .await
            .unwrap());
        // Already completed: a second outcome is ignored
        assert!(!db.store.fail(&lease, "late", 3_100).await.unwrap());

        let done = db.store.find("reports", &claimed.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.finished_at, Some(3_000));
        assert_eq!(done.return_value, Some(json!({"pages": 3})));
    }

    #[tokio::test]
    async fn test_retry_later_and_requeue_failed() {
        let db = setup_test_db().await;
        db.store
            .insert(&job("j1", 1_000, JobOptions::new().attempts(2)))
            .await
            .unwrap();

        let claimed = db.store.claim_next("reports", 2_000).await.unwrap().unwrap();
        assert!(db.store.retry_later(&claimed.lease(), 2_100, "boom", 2_000).await.unwrap());
        let retried = db.store.find("reports", &claimed.id).await.unwrap().unwrap();
        assert_eq!(retried.state, JobState::Delayed);
        assert_eq!(retried.failed_reason.as_deref(), Some("boom"));

        db.store.promote_delayed("reports", 2_100).await.unwrap();
        let claimed = db.store.claim_next("reports", 2_100).await.unwrap().unwrap();
        assert_eq!(claimed.attempts_made, 2);
        assert!(db.store.fail(&claimed.lease(), "boom again", 2_200).await.unwrap());

        assert!(db.store.requeue_failed("reports", &claimed.id, 3_000).await.unwrap());
        let requeued = db.store.find("reports", &claimed.id).await.unwrap().unwrap();
        assert_eq!(requeued.state, JobState::Waiting);
        assert_eq!(requeued.attempts_made, 0);
        assert!(!db.store.requeue_failed("reports", &claimed.id, 3_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_reclaim_stalled() {
        let db = setup_test_db().await;
        db.store
            .insert(&job("retry", 1_000, JobOptions::new().attempts(2)))
            .await
            .unwrap();
        db.store
            .insert(&job("exhausted", 1_000, JobOptions::new().attempts(1)))
            .await
            .unwrap();
        db.store.claim_next("reports", 2_000).await.unwrap().unwrap();
        let fresh = db.store.claim_next("reports", 2_000).await.unwrap().unwrap();
        db.store.heartbeat(&fresh.lease(), 9_000).await.unwrap();

        // Only the job whose heartbeat is older than 5_000 is stalled
        let stats = db.store.reclaim_stalled("reports", 5_000, 10_000).await.unwrap();
        assert_eq!(stats.total(), 1);

        let metrics = db.store.metrics("reports").await.unwrap();
        assert_eq!(metrics.active, 1);
        assert_eq!(metrics.waiting + metrics.failed, 1);
    }

    #[tokio::test]
    async fn test_clean_trim_and_queue_names() {
        let db = setup_test_db().await;
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            db.store.insert(&job(id, 1_000, JobOptions::new())).await.unwrap();
            let claimed = db.store.claim_next("reports", 2_000).await.unwrap().unwrap();
            db.store
                .complete(&claimed.lease(), None, 3_000 + i as i64)
                .await
                .unwrap();
        }
        db.store.set_paused("audits", false).await.unwrap();

        assert_eq!(db.store.trim("reports", JobState::Completed, 2).await.unwrap(), 1);
        assert_eq!(db.store.clean("reports", 3_002, 10).await.unwrap(), 1);
        assert_eq!(db.store.metrics("reports").await.unwrap().completed, 1);

        assert_eq!(db.store.queue_names().await.unwrap(), vec!["audits", "reports"]);
        assert!(db.store.remove("reports", &"c".to_string()).await.unwrap());
        assert!(!db.store.remove("reports", &"c".to_string()).await.unwrap());
    }
}
