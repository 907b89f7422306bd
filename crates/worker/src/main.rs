use leaseflow::api;
use leaseflow::config;
use leaseflow::db;
use leaseflow::jobs::{Job, JobStore, MemoryJobStore, PgJobStore, ReservationOutcome, Scheduler};
use leaseflow::telemetry;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod handlers;
use handlers::{build_registry, HandlerRegistry, JobContext, JobError};

/// Back-off after a storage error in the reservation loop.
const STORAGE_BACKOFF: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    telemetry::init(cfg.log_json);

    info!(
        worker_id = %cfg.worker_id,
        job_type = %cfg.job_type,
        lease_seconds = cfg.lease_seconds,
        heartbeat_seconds = cfg.heartbeat_seconds,
        max_wait_seconds = cfg.max_wait_seconds,
        reclaim_interval_ms = cfg.reclaim_interval_ms,
        api = cfg.api_addr.as_deref().unwrap_or("disabled"),
        store = if cfg.database_url.is_some() { "postgres" } else { "memory" },
        migrate_on_startup = cfg.migrate_on_startup,
        "leaseflow worker starting"
    );

    let store: Arc<dyn JobStore> = match &cfg.database_url {
        Some(url) => {
            let pool = db::make_pool(url, cfg.pool_settings()).await?;
            if cfg.migrate_on_startup {
                db::run_migrations(&pool).await?;
            }
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            warn!("no database url configured; jobs live in memory only");
            Arc::new(MemoryJobStore::new())
        }
    };

    let scheduler = Scheduler::new(store, cfg.scheduler_config());
    let shutdown = CancellationToken::new();

    // ---- API task ----
    let app = api::router(api::ApiState {
        scheduler: scheduler.clone(),
        default_lease: cfg.lease(),
        max_wait_ceiling: Duration::from_secs(cfg.max_wait_ceiling_seconds),
    });
    let api_addr = cfg.api_addr.clone();
    let api_shutdown = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "api listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
                .await?;
        } else {
            api_shutdown.cancelled().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Reclaim task ----
    let reclaim_handle = {
        let scheduler = scheduler.clone();
        let job_type = cfg.job_type;
        let every = Duration::from_millis(cfg.reclaim_interval_ms.max(100));
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {}
                }
                // reclaim_expired logs the count itself
                if let Err(e) = scheduler.reclaim_expired(job_type).await {
                    error!(error = %e, "reclaim sweep failed");
                }
            }
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Worker loop task ----
    let worker_handle = {
        let worker = Worker {
            scheduler: scheduler.clone(),
            registry: build_registry(),
            ctx: JobContext {
                worker_id: cfg.worker_id.clone(),
            },
            cfg: cfg.clone(),
        };
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            ctrl_c.cancel();
        }
    });

    let res = tokio::select! {
        res = api_handle => res,
        res = worker_handle => res,
        res = reclaim_handle => res,
    };
    shutdown.cancel();
    res??;

    info!("leaseflow worker stopped");
    Ok(())
}

struct Worker {
    scheduler: Scheduler,
    registry: Arc<HandlerRegistry>,
    ctx: JobContext,
    cfg: config::Config,
}

impl Worker {
    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let job_type = self.cfg.job_type;

        while !shutdown.is_cancelled() {
            let outcome = self
                .scheduler
                .reserve_next_until_cancelled(
                    job_type,
                    self.cfg.lease(),
                    self.cfg.max_wait(),
                    &shutdown,
                )
                .await;

            let job = match outcome {
                Ok(ReservationOutcome::Claimed(job)) => job,
                Ok(ReservationOutcome::NoneEligible) => {
                    // a non-zero max_wait already slept inside the reservation
                    if self.cfg.max_wait().is_zero() {
                        pause(self.cfg.poll_interval(), &shutdown).await;
                    }
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "reserve failed; backing off");
                    pause(STORAGE_BACKOFF, &shutdown).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            self.process(job).await;
        }
        Ok(())
    }

    /// Run one claimed job to an outcome. Errors reporting the outcome are
    /// logged; the lease will lapse and the job gets reclaimed.
    async fn process(&self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;

        debug!(
            job_id = %job_id,
            worker_id = %self.ctx.worker_id,
            retry_count = job.retry_count,
            "running job"
        );

        let stop_heartbeat = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.scheduler.clone(),
            job_id,
            self.cfg.heartbeat_every(),
            self.cfg.lease(),
            stop_heartbeat.clone(),
        ));

        let result: Result<(), JobError> = match self.registry.handler_for(job.job_type) {
            Some(entry) => entry.run(&job, &self.ctx).await,
            None => Err(JobError::new(
                "UNKNOWN_JOB_TYPE",
                format!("no handler for job_type={}", job.job_type),
            )),
        };

        stop_heartbeat.cancel();
        let _ = heartbeat.await;

        let latency_ms = start.elapsed().as_millis() as u64;
        let reported = match result {
            Ok(()) => self.scheduler.complete(job_id).await.map(|ok| {
                if ok {
                    info!(job_id = %job_id, latency_ms, "job succeeded");
                }
                ok
            }),
            Err(err) => {
                warn!(job_id = %job_id, code = err.code, latency_ms, "job handler failed");
                self.scheduler.fail(job_id, &err.to_last_error()).await
            }
        };

        match reported {
            Ok(true) => {}
            Ok(false) => warn!(
                job_id = %job_id,
                worker_id = %self.ctx.worker_id,
                "outcome not recorded; lease was lost"
            ),
            Err(e) => error!(job_id = %job_id, error = %e, "failed to record job outcome"),
        }
    }
}

async fn pause(d: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(d) => {}
    }
}

async fn heartbeat_loop(
    scheduler: Scheduler,
    job_id: uuid::Uuid,
    every: Duration,
    extend: Duration,
    stop: CancellationToken,
) {
    let mut tick = tokio::time::interval(every.max(Duration::from_millis(100)));
    // first tick fires immediately; the lease is fresh
    tick.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tick.tick() => {}
        }
        match scheduler.heartbeat(job_id, extend).await {
            Ok(true) => debug!(job_id = %job_id, "lease extended"),
            Ok(false) => {
                warn!(job_id = %job_id, "heartbeat rejected; job is no longer running");
                return;
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use leaseflow::error::Result as QueueResult;
    use leaseflow::jobs::model::JobInsert;
    use leaseflow::jobs::retry::FailureTransition;
    use leaseflow::jobs::{JobType, QueueStats};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Counts reservation attempts, delegating everything to the memory store.
    struct CountingStore {
        inner: MemoryJobStore,
        reserves: AtomicUsize,
    }

    #[async_trait]
    impl JobStore for CountingStore {
        async fn insert(&self, job: JobInsert) -> QueueResult<Job> {
            self.inner.insert(job).await
        }
        async fn reserve_next(&self, t: JobType, lease: Duration) -> QueueResult<ReservationOutcome> {
            self.reserves.fetch_add(1, Ordering::SeqCst);
            self.inner.reserve_next(t, lease).await
        }
        async fn heartbeat(&self, id: Uuid, extend: Duration) -> QueueResult<bool> {
            self.inner.heartbeat(id, extend).await
        }
        async fn complete(&self, id: Uuid) -> QueueResult<bool> {
            self.inner.complete(id).await
        }
        async fn record_failure(
            &self,
            id: Uuid,
            observed_retry_count: i32,
            error: &str,
            transition: &FailureTransition,
        ) -> QueueResult<bool> {
            self.inner
                .record_failure(id, observed_retry_count, error, transition)
                .await
        }
        async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
            self.inner.get(id).await
        }
        async fn stats(&self, t: JobType) -> QueueResult<QueueStats> {
            self.inner.stats(t).await
        }
        async fn delete(&self, id: Uuid) -> QueueResult<()> {
            self.inner.delete(id).await
        }
        async fn reclaim_expired(&self, t: JobType) -> QueueResult<u64> {
            self.inner.reclaim_expired(t).await
        }
    }

    fn test_config(max_wait_seconds: u64, poll_interval_ms: u64) -> config::Config {
        config::Config {
            database_url: None,
            worker_id: "test-worker".to_string(),
            job_type: JobType::RuleEvaluation,
            lease_seconds: 30,
            heartbeat_seconds: 10,
            max_wait_seconds,
            max_wait_ceiling_seconds: 30,
            poll_interval_ms,
            reclaim_interval_ms: 5_000,
            api_addr: None,
            migrate_on_startup: false,
            max_payload_bytes: 1024,
            default_max_retries: 3,
            retry_base_seconds: 0,
            log_json: false,
            db_max_connections: 1,
            db_acquire_timeout_secs: 1,
            db_disable_jit: true,
        }
    }

    fn worker_over(store: Arc<CountingStore>, cfg: config::Config) -> Worker {
        Worker {
            scheduler: Scheduler::new(store, cfg.scheduler_config()),
            registry: build_registry(),
            ctx: JobContext {
                worker_id: cfg.worker_id.clone(),
            },
            cfg,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_with_zero_wait_sleeps_between_attempts() {
        let store = Arc::new(CountingStore {
            inner: MemoryJobStore::new(),
            reserves: AtomicUsize::new(0),
        });
        let worker = worker_over(store.clone(), test_config(0, 250));

        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        run.await.unwrap().unwrap();

        // one attempt per 250ms poll interval, give or take the edges
        let attempts = store.reserves.load(Ordering::SeqCst);
        assert!((1..=6).contains(&attempts), "attempts={attempts}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_worker_picks_up_work_after_sleeping() {
        let store = Arc::new(CountingStore {
            inner: MemoryJobStore::new(),
            reserves: AtomicUsize::new(0),
        });
        let worker = worker_over(store.clone(), test_config(0, 250));
        let scheduler = worker.scheduler.clone();

        let shutdown = CancellationToken::new();
        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(600)).await;
        let job = scheduler
            .create_job(leaseflow::jobs::NewJob::new(
                JobType::RuleEvaluation,
                br#"{"rule_id":"r7"}"#.to_vec(),
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(
            scheduler.get_status(job.id).await.unwrap().status,
            leaseflow::jobs::JobStatus::Completed
        );
    }
}
