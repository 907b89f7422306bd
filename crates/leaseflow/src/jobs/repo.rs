// crates/leaseflow/src/jobs/repo.rs

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::jobs::model::{Job, JobInsert, JobRow, JobStatus, JobType, ReservationOutcome};
use crate::jobs::retry::FailureTransition;
use crate::jobs::stats::QueueStats;
use crate::jobs::store::{JobStore, MAX_LEASE};

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let found: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    /// A conditional update that touched nothing is either a stale job or a missing one.
    async fn applied_or_not_found(&self, id: Uuid, rows_affected: u64) -> Result<bool> {
        if rows_affected > 0 {
            return Ok(true);
        }
        if self.exists(id).await? {
            Ok(false)
        } else {
            Err(QueueError::NotFound { id })
        }
    }
}

/// Milliseconds for an `interval` bind; stays well inside Postgres' timestamp range.
fn millis(d: Duration) -> i64 {
    i64::try_from(d.min(MAX_LEASE).as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobStore for PgJobStore {
    // ----------------------------
    // Admission
    // ----------------------------

    async fn insert(&self, job: JobInsert) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, job_type, status, payload, priority, scheduled_at,
                max_retries, is_test, site_id, source_id
            )
            VALUES ($1, $2, 'pending', $3, $4, COALESCE($5, now()), $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.scheduled_at)
        .bind(job.max_retries)
        .bind(job.is_test)
        .bind(job.attribution.site_id.as_deref())
        .bind(job.attribution.source_id.as_deref())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    // ----------------------------
    // Reservation
    // ----------------------------

    /// SELECT ... FOR UPDATE SKIP LOCKED inside the UPDATE: concurrent
    /// reservers skip a row another transaction is claiming, and the lock
    /// re-checks the WHERE clause, so no job is handed out twice.
    async fn reserve_next(&self, job_type: JobType, lease: Duration) -> Result<ReservationOutcome> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            WITH candidate AS (
              SELECT id
              FROM jobs
              WHERE job_type = $1
                AND (
                  (status = 'pending' AND scheduled_at <= now())
                  OR (status = 'running' AND lease_expires_at < now())
                )
              ORDER BY priority DESC, scheduled_at ASC, created_at ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs j
            SET status = 'running',
                started_at = now(),
                lease_expires_at = now() + ($2::bigint * interval '1 millisecond'),
                updated_at = now()
            FROM candidate
            WHERE j.id = candidate.id
            RETURNING j.*
            "#,
        )
        .bind(job_type.as_str())
        .bind(millis(lease))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ReservationOutcome::Claimed(row.try_into()?)),
            None => Ok(ReservationOutcome::NoneEligible),
        }
    }

    // ----------------------------
    // Lease
    // ----------------------------

    async fn heartbeat(&self, id: Uuid, extend: Duration) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = now() + ($2::bigint * interval '1 millisecond'),
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(millis(extend))
        .execute(&self.pool)
        .await?;

        self.applied_or_not_found(id, res.rows_affected()).await
    }

    async fn reclaim_expired(&self, job_type: JobType) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                started_at = NULL,
                lease_expires_at = NULL,
                updated_at = now()
            WHERE job_type = $1
              AND status = 'running'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < now()
            "#,
        )
        .bind(job_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    async fn complete(&self, id: Uuid) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = now(),
                lease_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.applied_or_not_found(id, res.rows_affected()).await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        observed_retry_count: i32,
        error: &str,
        transition: &FailureTransition,
    ) -> Result<bool> {
        let res = match transition {
            FailureTransition::Requeue { retry_count, delay } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        retry_count = $3,
                        last_error = $4,
                        scheduled_at = now() + ($5::bigint * interval '1 millisecond'),
                        started_at = NULL,
                        lease_expires_at = NULL,
                        updated_at = now()
                    WHERE id = $1
                      AND status = 'running'
                      AND retry_count = $2
                    "#,
                )
                .bind(id)
                .bind(observed_retry_count)
                .bind(*retry_count)
                .bind(error)
                .bind(millis(*delay))
                .execute(&self.pool)
                .await?
            }
            FailureTransition::Fail { .. } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'failed',
                        last_error = $3,
                        completed_at = now(),
                        lease_expires_at = NULL,
                        updated_at = now()
                    WHERE id = $1
                      AND status = 'running'
                      AND retry_count = $2
                    "#,
                )
                .bind(id)
                .bind(observed_retry_count)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
        };

        self.applied_or_not_found(id, res.rows_affected()).await
    }

    // ----------------------------
    // Reads
    // ----------------------------

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn stats(&self, job_type: JobType) -> Result<QueueStats> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM jobs
            WHERE job_type = $1
            GROUP BY status
            "#,
        )
        .bind(job_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let status: JobStatus = status.parse().map_err(|_| QueueError::CorruptRecord {
                message: format!("unknown status {status:?} in {job_type} stats"),
            })?;
            stats.add(status, count);
        }
        Ok(stats)
    }

    // ----------------------------
    // Admin
    // ----------------------------

    async fn delete(&self, id: Uuid) -> Result<()> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = $1 AND status <> 'running'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() > 0 {
            return Ok(());
        }

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match status {
            None => Err(QueueError::NotFound { id }),
            Some(s) => {
                let status = s.parse().map_err(|_| QueueError::CorruptRecord {
                    message: format!("job {id} has unknown status {s:?}"),
                })?;
                Err(QueueError::Conflict { id, status })
            }
        }
    }
}
