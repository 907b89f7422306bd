pub mod clock;
pub mod memory;
pub mod model;
pub mod repo;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod store;

pub use clock::Clock;
pub use memory::MemoryJobStore;
pub use model::{Attribution, Job, JobStatus, JobType, NewJob, ReservationOutcome};
pub use repo::PgJobStore;
pub use retry::{RetryConfig, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use stats::QueueStats;
pub use store::{JobStore, MAX_LEASE};
