//! Shared fixtures: temporary SQLite files and queues built on them

#![allow(dead_code)]

use budgetflow_core::application::JobQueue;
use budgetflow_core::domain::{Job, JobState};
use budgetflow_core::port::id_provider::UuidProvider;
use budgetflow_core::port::time_provider::SystemTimeProvider;
use budgetflow_core::port::TimeProvider;
use budgetflow_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A database file in the temp dir, deleted (with its WAL files) on drop
pub struct TestDb {
    path: PathBuf,
}

impl TestDb {
    pub fn new(label: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "budgetflow-{}-{}.db",
            label,
            uuid::Uuid::new_v4()
        ));
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    /// Open a fresh pool on the file, as a separate process would
    pub async fn open(&self) -> SqlitePool {
        let pool = create_pool(&self.url()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    pub async fn queue(&self) -> Arc<JobQueue> {
        queue_on(self.open().await, Arc::new(SystemTimeProvider))
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

pub fn queue_on(pool: SqlitePool, time: Arc<dyn TimeProvider>) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(
        Arc::new(SqliteJobStore::new(pool)),
        time,
        Arc::new(UuidProvider),
    ))
}

/// Poll until the job reaches `state`, returning it
pub async fn wait_for_state(queue: &JobQueue, name: &str, id: &str, state: JobState) -> Job {
    for _ in 0..500 {
        if let Some(job) = queue.get_job(name, id).await.unwrap() {
            if job.state == state {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let last = queue.get_job(name, id).await.unwrap();
    panic!("job {} never reached {} (last seen: {:?})", id, state, last.map(|j| j.state));
}
