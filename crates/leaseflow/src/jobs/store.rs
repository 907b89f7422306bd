//! Repository contract between the scheduler and a backing store.
//!
//! Every state transition is a single conditional write against one job, so
//! implementations never need locks that span jobs. `reserve_next` is the one
//! operation that must be atomic against concurrent callers of itself.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::model::{Job, JobInsert, JobType, ReservationOutcome};
use crate::jobs::retry::FailureTransition;
use crate::jobs::stats::QueueStats;

/// Longest lease or extension a store will record. Longer requests are
/// clamped so every store lands on the same expiry instead of overflowing.
pub const MAX_LEASE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job. `scheduled_at = None` means the store's now.
    async fn insert(&self, job: JobInsert) -> Result<Job>;

    /// Claim the best eligible job of `job_type`:
    /// due pending jobs and running jobs whose lease elapsed, ordered
    /// `priority DESC, scheduled_at ASC, created_at ASC`.
    async fn reserve_next(&self, job_type: JobType, lease: Duration) -> Result<ReservationOutcome>;

    /// Extend a running job's lease to `now + extend` (clamped to `MAX_LEASE`).
    /// `Ok(false)` when the job is not running, `NotFound` when it does not exist.
    async fn heartbeat(&self, id: Uuid, extend: Duration) -> Result<bool>;

    /// running -> completed. Same return contract as `heartbeat`.
    async fn complete(&self, id: Uuid) -> Result<bool>;

    /// Apply a failure transition, guarded on the job still being running with
    /// `observed_retry_count`. `Ok(false)` when that guard no longer holds.
    async fn record_failure(
        &self,
        id: Uuid,
        observed_retry_count: i32,
        error: &str,
        transition: &FailureTransition,
    ) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    async fn stats(&self, job_type: JobType) -> Result<QueueStats>;

    /// Remove a pending or terminal job. `Conflict` while running.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Return running jobs of `job_type` whose lease elapsed to pending.
    async fn reclaim_expired(&self, job_type: JobType) -> Result<u64>;
}
