//! The scheduler facade: admission, reservation with bounded waiting, lease
//! heartbeats, completion/failure recording and read-side projections.
//!
//! `Scheduler` keeps no job state of its own. Everything lives behind the
//! `JobStore`, so any number of scheduler instances (threads or processes)
//! can share one backing store. The only in-process state is a set of
//! wake-up notifiers, used to cut a waiting reservation short when this
//! process admits or requeues work of the waited-for type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobs::model::{
    Job, JobInsert, JobStatus, JobStatusView, JobType, NewJob, ReservationOutcome,
};
use crate::jobs::retry::{FailureTransition, RetryConfig, RetryPolicy};
use crate::jobs::stats::{QueueStats, TypeStats};
use crate::jobs::store::JobStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_max_retries: i32,
    pub max_payload_bytes: usize,
    /// Upper bound on one sleep between reservation attempts while waiting.
    pub poll_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            max_payload_bytes: 256 * 1024,
            poll_interval: Duration::from_millis(250),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    retry: RetryPolicy,
    cfg: SchedulerConfig,
    wakeups: Arc<HashMap<JobType, Notify>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, cfg: SchedulerConfig) -> Self {
        let wakeups = JobType::ALL.iter().map(|t| (*t, Notify::new())).collect();
        Self {
            store,
            retry: RetryPolicy::new(cfg.retry.clone()),
            cfg,
            wakeups: Arc::new(wakeups),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    fn wake(&self, job_type: JobType) {
        if let Some(n) = self.wakeups.get(&job_type) {
            n.notify_waiters();
        }
    }

    // ----------------------------
    // Admission
    // ----------------------------

    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        let max_retries = new.max_retries.unwrap_or(self.cfg.default_max_retries);
        if max_retries < 0 {
            return Err(QueueError::validation("max_retries must be >= 0"));
        }
        if new.payload.len() > self.cfg.max_payload_bytes {
            return Err(QueueError::validation(format!(
                "payload is {} bytes; limit is {}",
                new.payload.len(),
                self.cfg.max_payload_bytes
            )));
        }

        let job = self
            .store
            .insert(JobInsert {
                id: Uuid::new_v4(),
                job_type: new.job_type,
                payload: new.payload,
                priority: new.priority,
                scheduled_at: new.scheduled_at,
                max_retries,
                is_test: new.is_test,
                attribution: new.attribution,
            })
            .await?;

        debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            scheduled_at = %job.scheduled_at,
            "job created"
        );
        self.wake(job.job_type);
        Ok(job)
    }

    // ----------------------------
    // Reservation
    // ----------------------------

    /// Claim the next eligible job of `job_type`, waiting up to `max_wait`.
    /// `max_wait = 0` makes exactly one attempt.
    pub async fn reserve_next(
        &self,
        job_type: JobType,
        lease: Duration,
        max_wait: Duration,
    ) -> Result<ReservationOutcome> {
        self.reserve_next_until_cancelled(job_type, lease, max_wait, &CancellationToken::new())
            .await
    }

    /// As `reserve_next`; cancelling `cancel` ends the wait with `NoneEligible`.
    pub async fn reserve_next_until_cancelled(
        &self,
        job_type: JobType,
        lease: Duration,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReservationOutcome> {
        if lease.is_zero() {
            return Err(QueueError::validation("lease duration must be > 0"));
        }

        let start = Instant::now();
        let deadline = start
            .checked_add(max_wait)
            .unwrap_or_else(|| start + Duration::from_secs(365 * 24 * 60 * 60));
        let wakeup = self.wakeups.get(&job_type);

        loop {
            if cancel.is_cancelled() {
                return Ok(ReservationOutcome::NoneEligible);
            }

            // register interest before the attempt so a job admitted between
            // the attempt and the sleep still wakes us
            let notified = wakeup.map(|n| n.notified());

            if let ReservationOutcome::Claimed(job) =
                self.store.reserve_next(job_type, lease).await?
            {
                debug!(
                    job_id = %job.id,
                    job_type = %job_type,
                    retry_count = job.retry_count,
                    lease_expires_at = ?job.lease_expires_at,
                    "job reserved"
                );
                return Ok(ReservationOutcome::Claimed(job));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(ReservationOutcome::NoneEligible);
            }
            let nap = self.cfg.poll_interval.min(deadline - now);

            let woken = async move {
                match notified {
                    Some(n) => n.await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(ReservationOutcome::NoneEligible),
                _ = woken => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    // ----------------------------
    // Lease
    // ----------------------------

    pub async fn heartbeat(&self, id: Uuid, extend: Duration) -> Result<bool> {
        if extend.is_zero() {
            return Err(QueueError::validation("heartbeat extension must be > 0"));
        }

        let ok = self.store.heartbeat(id, extend).await?;
        if !ok {
            debug!(job_id = %id, "heartbeat ignored; job is no longer running");
        }
        Ok(ok)
    }

    /// Sweep expired leases of `job_type` back to pending. Reservation already
    /// treats them as eligible; this keeps stats honest between reservations.
    pub async fn reclaim_expired(&self, job_type: JobType) -> Result<u64> {
        let n = self.store.reclaim_expired(job_type).await?;
        if n > 0 {
            warn!(job_type = %job_type, reclaimed = n, "reclaimed jobs with expired leases");
            self.wake(job_type);
        }
        Ok(n)
    }

    // ----------------------------
    // Completion / failure
    // ----------------------------

    pub async fn complete(&self, id: Uuid) -> Result<bool> {
        let ok = self.store.complete(id).await?;
        if ok {
            debug!(job_id = %id, "job completed");
        } else {
            debug!(job_id = %id, "complete ignored; job is not running");
        }
        Ok(ok)
    }

    pub async fn fail(&self, id: Uuid, error: &str) -> Result<bool> {
        if error.trim().is_empty() {
            return Err(QueueError::validation("error message must not be empty"));
        }

        let job = self
            .store
            .get(id)
            .await?
            .ok_or(QueueError::NotFound { id })?;

        if job.status != JobStatus::Running {
            debug!(job_id = %id, status = %job.status, "fail ignored; job is not running");
            return Ok(false);
        }

        let transition = self.retry.decide(&job);
        let applied = self
            .store
            .record_failure(id, job.retry_count, error, &transition)
            .await?;

        if !applied {
            debug!(job_id = %id, "fail lost a race with another state change");
            return Ok(false);
        }

        match &transition {
            FailureTransition::Requeue { retry_count, delay } => {
                info!(
                    job_id = %id,
                    job_type = %job.job_type,
                    retry_count,
                    max_retries = job.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error,
                    "job failed; requeued"
                );
                if delay.is_zero() {
                    self.wake(job.job_type);
                }
            }
            FailureTransition::Fail { reason } => {
                warn!(
                    job_id = %id,
                    job_type = %job.job_type,
                    retry_count = job.retry_count,
                    reason = reason.as_str(),
                    error,
                    "job failed permanently"
                );
            }
        }
        Ok(true)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or(QueueError::NotFound { id })
    }

    pub async fn get_status(&self, id: Uuid) -> Result<JobStatusView> {
        Ok(self.get_job(id).await?.status_view())
    }

    pub async fn stats(&self, job_type: JobType) -> Result<QueueStats> {
        self.store.stats(job_type).await
    }

    pub async fn stats_all(&self) -> Result<Vec<TypeStats>> {
        let mut out = Vec::with_capacity(JobType::ALL.len());
        for job_type in JobType::ALL {
            out.push(TypeStats {
                job_type,
                counts: self.store.stats(job_type).await?,
            });
        }
        Ok(out)
    }

    // ----------------------------
    // Admin
    // ----------------------------

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await?;
        info!(job_id = %id, "job deleted");
        Ok(())
    }
}
