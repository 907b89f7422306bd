use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::QueueError;

/// Which worker pool may reserve a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    BrowserAutomation,
    RuleEvaluation,
    AlertDelivery,
}

impl JobType {
    pub const ALL: [JobType; 3] = [
        JobType::BrowserAutomation,
        JobType::RuleEvaluation,
        JobType::AlertDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::BrowserAutomation => "browser_automation",
            JobType::RuleEvaluation => "rule_evaluation",
            JobType::AlertDelivery => "alert_delivery",
        }
    }
}

impl FromStr for JobType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "browser_automation" => Ok(JobType::BrowserAutomation),
            "rule_evaluation" => Ok(JobType::RuleEvaluation),
            "alert_delivery" => Ok(JobType::AlertDelivery),
            other => Err(QueueError::validation(format!("unknown job type: {other:?}"))),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(QueueError::validation(format!("unknown job status: {other:?}"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Foreign keys carried for attribution only; the scheduler never reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub site_id: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,

    pub lease_expires_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub is_test: bool,

    pub attribution: Attribution,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Pending and due, or running with a lease that has already elapsed.
    pub fn is_reservable_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.scheduled_at <= now,
            JobStatus::Running => self.lease_expires_at.is_some_and(|exp| exp < now),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            status: self.status,
            completed_at: self.completed_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Row shape as stored in Postgres; enums travel as text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub job_type: String,
    pub status: String,
    pub payload: Vec<u8>,
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
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = row.job_type.parse().map_err(|_| QueueError::CorruptRecord {
            message: format!("job {} has unknown job_type {:?}", row.id, row.job_type),
        })?;
        let status = row.status.parse().map_err(|_| QueueError::CorruptRecord {
            message: format!("job {} has unknown status {:?}", row.id, row.status),
        })?;

        Ok(Job {
            id: row.id,
            job_type,
            status,
            payload: row.payload,
            priority: row.priority,
            scheduled_at: row.scheduled_at,
            lease_expires_at: row.lease_expires_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            last_error: row.last_error,
            is_test: row.is_test,
            attribution: Attribution {
                site_id: row.site_id,
                source_id: row.source_id,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Producer input. Unset options take the scheduler's defaults.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: Option<i32>,
    pub is_test: bool,
    pub attribution: Attribution,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            job_type,
            payload: payload.into(),
            priority: 0,
            scheduled_at: None,
            max_retries: None,
            is_test: false,
            attribution: Attribution::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn as_test(mut self) -> Self {
        self.is_test = true;
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }
}

/// A fully resolved insert: every default already applied by the scheduler.
#[derive(Debug, Clone)]
pub struct JobInsert {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: Vec<u8>,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: i32,
    pub is_test: bool,
    pub attribution: Attribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    Claimed(Job),
    NoneEligible,
}

impl ReservationOutcome {
    pub fn into_job(self) -> Option<Job> {
        match self {
            ReservationOutcome::Claimed(job) => Some(job),
            ReservationOutcome::NoneEligible => None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ReservationOutcome::Claimed(_))
    }
}
