use thiserror::Error;
use uuid::Uuid;

use crate::jobs::model::JobStatus;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Job not found: {id}")]
    NotFound { id: Uuid },

    #[error("Job {id} is {status}; operation not permitted")]
    Conflict { id: Uuid, status: JobStatus },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Corrupt job record: {message}")]
    CorruptRecord { message: String },
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        QueueError::Validation {
            message: message.into(),
        }
    }

    /// Storage faults are transient; everything else will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let validation = QueueError::validation("error message must not be empty");
        assert_eq!(
            validation.to_string(),
            "Validation error: error message must not be empty"
        );

        let id = Uuid::nil();
        let not_found = QueueError::NotFound { id };
        assert_eq!(not_found.to_string(), format!("Job not found: {id}"));

        let conflict = QueueError::Conflict {
            id,
            status: JobStatus::Running,
        };
        assert!(conflict.to_string().contains("is running"));
    }

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(QueueError::Storage(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!QueueError::validation("x").is_retryable());
        assert!(!QueueError::NotFound { id: Uuid::nil() }.is_retryable());
    }
}
