// crates/leaseflow/src/api/models.rs
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;
use crate::jobs::model::{Attribution, Job, JobStatus, JobType, NewJob};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    /// Base64 (standard alphabet). Omitted means empty.
    #[serde(default)]
    pub payload: String,
    pub priority: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
    pub is_test: Option<bool>,
    pub site_id: Option<String>,
    pub source_id: Option<String>,
}

impl CreateJobRequest {
    pub fn into_new_job(self) -> Result<NewJob, QueueError> {
        let job_type: JobType = self.job_type.parse()?;
        let payload = STANDARD
            .decode(self.payload.trim())
            .map_err(|e| QueueError::validation(format!("payload is not valid base64: {e}")))?;

        Ok(NewJob {
            job_type,
            payload,
            priority: self.priority.unwrap_or(0),
            scheduled_at: self.scheduled_at,
            max_retries: self.max_retries,
            is_test: self.is_test.unwrap_or(false),
            attribution: Attribution {
                site_id: self.site_id,
                source_id: self.source_id,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: String,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub is_test: bool,
    pub site_id: Option<String>,
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            payload: STANDARD.encode(&job.payload),
            priority: job.priority,
            scheduled_at: job.scheduled_at,
            lease_expires_at: job.lease_expires_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            last_error: job.last_error,
            is_test: job.is_test,
            site_id: job.attribution.site_id,
            source_id: job.attribution.source_id,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReserveQuery {
    #[serde(rename = "type")]
    pub job_type: String,
    /// Lease in seconds.
    pub lease: Option<u64>,
    /// Max wait in seconds; 0 or absent returns immediately.
    pub wait: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatQuery {
    pub extend: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(rename = "type")]
    pub job_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
