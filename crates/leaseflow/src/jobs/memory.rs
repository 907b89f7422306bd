//! In-process `JobStore`. All jobs live behind one `RwLock`; every operation
//! takes the write lock for its whole read-modify-write, which gives the same
//! single-statement atomicity the Postgres store gets from conditional updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobs::clock::Clock;
use crate::jobs::model::{Job, JobInsert, JobStatus, JobType, ReservationOutcome};
use crate::jobs::retry::FailureTransition;
use crate::jobs::stats::QueueStats;
use crate::jobs::store::{JobStore, MAX_LEASE};

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    clock: Clock,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            jobs: Arc::default(),
            clock,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d.min(MAX_LEASE))
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new: JobInsert) -> Result<Job> {
        let now = self.clock.now();
        let job = Job {
            id: new.id,
            job_type: new.job_type,
            status: JobStatus::Pending,
            payload: new.payload,
            priority: new.priority,
            scheduled_at: new.scheduled_at.unwrap_or(now),
            lease_expires_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: new.max_retries,
            last_error: None,
            is_test: new.is_test,
            attribution: new.attribution,
            created_at: now,
            updated_at: now,
        };

        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn reserve_next(&self, job_type: JobType, lease: Duration) -> Result<ReservationOutcome> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;

        let candidate = jobs
            .values()
            .filter(|j| j.job_type == job_type && j.is_reservable_at(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|j| j.id);

        let Some(id) = candidate else {
            return Ok(ReservationOutcome::NoneEligible);
        };

        let Some(job) = jobs.get_mut(&id) else {
            return Ok(ReservationOutcome::NoneEligible);
        };
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.lease_expires_at = Some(after(now, lease));
        job.updated_at = now;

        Ok(ReservationOutcome::Claimed(job.clone()))
    }

    async fn heartbeat(&self, id: Uuid, extend: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { id })?;

        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.lease_expires_at = Some(after(now, extend));
        job.updated_at = now;
        Ok(true)
    }

    async fn complete(&self, id: Uuid) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { id })?;

        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.lease_expires_at = None;
        job.updated_at = now;
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        observed_retry_count: i32,
        error: &str,
        transition: &FailureTransition,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(QueueError::NotFound { id })?;

        if job.status != JobStatus::Running || job.retry_count != observed_retry_count {
            return Ok(false);
        }

        job.last_error = Some(error.to_string());
        job.lease_expires_at = None;
        job.updated_at = now;

        match transition {
            FailureTransition::Requeue { retry_count, delay } => {
                job.status = JobStatus::Pending;
                job.retry_count = *retry_count;
                job.started_at = None;
                job.scheduled_at = after(now, *delay);
            }
            FailureTransition::Fail { .. } => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
            }
        }
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn stats(&self, job_type: JobType) -> Result<QueueStats> {
        let jobs = self.jobs.read().await;
        let mut stats = QueueStats::default();
        for job in jobs.values().filter(|j| j.job_type == job_type) {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let status = jobs.get(&id).ok_or(QueueError::NotFound { id })?.status;

        if status == JobStatus::Running {
            return Err(QueueError::Conflict { id, status });
        }
        jobs.remove(&id);
        Ok(())
    }

    async fn reclaim_expired(&self, job_type: JobType) -> Result<u64> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let mut reclaimed = 0;

        for job in jobs.values_mut() {
            if job.job_type == job_type
                && job.status == JobStatus::Running
                && job.lease_expires_at.is_some_and(|exp| exp < now)
            {
                job.status = JobStatus::Pending;
                job.lease_expires_at = None;
                job.started_at = None;
                job.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}
