use serde::Serialize;
use std::fmt::Write;

use crate::jobs::model::{JobStatus, JobType};

/// Point-in-time status counts for one job type. For dashboards, not control decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    pub job_type: JobType,
    #[serde(flatten)]
    pub counts: QueueStats,
}

/// Prometheus text exposition; one gauge family with job_type/status labels.
pub fn render_prometheus(all: &[TypeStats]) -> String {
    let mut body = String::from(concat!(
        "# HELP leaseflow_jobs Number of jobs by type and status\n",
        "# TYPE leaseflow_jobs gauge\n",
    ));

    for entry in all {
        let t = entry.job_type.as_str();
        let c = &entry.counts;
        for (status, value) in [
            (JobStatus::Pending, c.pending),
            (JobStatus::Running, c.running),
            (JobStatus::Completed, c.completed),
            (JobStatus::Failed, c.failed),
        ] {
            let _ = writeln!(
                body,
                "leaseflow_jobs{{job_type=\"{t}\",status=\"{}\"}} {value}",
                status.as_str()
            );
        }
    }

    body
}
