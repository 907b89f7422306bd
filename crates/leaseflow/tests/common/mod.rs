#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use leaseflow::jobs::{Clock, JobStore, MemoryJobStore, PgJobStore, Scheduler, SchedulerConfig};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub fn memory_scheduler() -> (Scheduler, Clock) {
    memory_scheduler_with(SchedulerConfig::default())
}

pub fn memory_scheduler_with(cfg: SchedulerConfig) -> (Scheduler, Clock) {
    let clock = Clock::manual();
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::with_clock(clock.clone()));
    (Scheduler::new(store, cfg), clock)
}

/// Scheduler on the wall clock, for tests that rely on real waiting.
pub fn system_scheduler(poll_interval: Duration) -> Scheduler {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    Scheduler::new(
        store,
        SchedulerConfig {
            poll_interval,
            ..SchedulerConfig::default()
        },
    )
}

/// `None` when TEST_DATABASE_URL is unset; the caller skips.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}

pub fn pg_scheduler(pool: &PgPool) -> Scheduler {
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    Scheduler::new(store, SchedulerConfig::default())
}
