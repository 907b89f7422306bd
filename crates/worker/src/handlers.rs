use leaseflow::jobs::{Job, JobType};
use serde::Deserialize;
use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};
use tokio::time::timeout;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
type HandlerFn = dyn for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
    + Send
    + Sync;

#[derive(Debug)]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The text recorded as the job's `last_error`.
    pub fn to_last_error(&self) -> String {
        format!("{}: {}", self.code, self.message)
    }
}

#[derive(Clone)]
pub struct JobContext {
    pub worker_id: String,
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_with_timeout<F>(&mut self, job_type: JobType, handler: F, timeout_dur: Duration)
    where
        F: for<'a> Fn(&'a Job, &'a JobContext) -> BoxFuture<'a, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(
            job_type,
            HandlerEntry {
                handler: Arc::new(handler),
                timeout: Some(timeout_dur),
            },
        );
    }

    pub fn handler_for(&self, job_type: JobType) -> Option<HandlerEntry> {
        self.handlers.get(&job_type).cloned()
    }
}

impl HandlerEntry {
    pub async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let fut = (self.handler)(job, ctx);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(inner) => inner,
                Err(_) => Err(JobError::new(
                    "TIMEOUT",
                    format!("handler timeout after {}ms", dur.as_millis()),
                )),
            },
            None => fut.await,
        }
    }
}

#[derive(Deserialize)]
struct BrowserAutomationPayload {
    url: String,
}

#[derive(Deserialize)]
struct RuleEvaluationPayload {
    rule_id: String,
}

#[derive(Deserialize)]
struct AlertDeliveryPayload {
    channel: String,
    message: String,
}

fn parse_payload<T: for<'de> Deserialize<'de>>(job: &Job) -> Result<T, JobError> {
    serde_json::from_slice(&job.payload).map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

pub fn build_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    // Demo handlers. Real deployments register their own.
    registry.register_with_timeout(
        JobType::BrowserAutomation,
        |job, ctx| {
            boxed(async move {
                let payload: BrowserAutomationPayload = parse_payload(job)?;
                if !payload.url.starts_with("http") {
                    return Err(JobError::new("BAD_URL", format!("not an http url: {}", payload.url)));
                }
                tracing::info!(job_id = %job.id, worker_id = %ctx.worker_id, url = %payload.url, "visiting page");
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
        },
        Duration::from_secs(120),
    );
    registry.register_with_timeout(
        JobType::RuleEvaluation,
        |job, ctx| {
            boxed(async move {
                let payload: RuleEvaluationPayload = parse_payload(job)?;
                tracing::info!(job_id = %job.id, worker_id = %ctx.worker_id, rule_id = %payload.rule_id, "evaluating rule");
                Ok(())
            })
        },
        Duration::from_secs(10),
    );
    registry.register_with_timeout(
        JobType::AlertDelivery,
        |job, ctx| {
            boxed(async move {
                let payload: AlertDeliveryPayload = parse_payload(job)?;
                if payload.message.trim().is_empty() {
                    return Err(JobError::new("EMPTY_ALERT", "alert message is empty"));
                }
                tracing::info!(job_id = %job.id, worker_id = %ctx.worker_id, channel = %payload.channel, "delivering alert");
                Ok(())
            })
        },
        Duration::from_secs(10),
    );

    Arc::new(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaseflow::jobs::{Clock, JobStore, MemoryJobStore, NewJob, Scheduler, SchedulerConfig};

    async fn job_with(job_type: JobType, payload: &[u8]) -> Job {
        let scheduler = Scheduler::new(
            Arc::new(MemoryJobStore::with_clock(Clock::manual())) as Arc<dyn JobStore>,
            SchedulerConfig::default(),
        );
        scheduler
            .create_job(NewJob::new(job_type, payload.to_vec()))
            .await
            .unwrap()
    }

    fn ctx() -> JobContext {
        JobContext {
            worker_id: "test-worker".to_string(),
        }
    }

    #[tokio::test]
    async fn every_job_type_has_a_handler() {
        let registry = build_registry();
        for t in JobType::ALL {
            assert!(registry.handler_for(t).is_some(), "{t}");
        }
    }

    #[tokio::test]
    async fn bad_payload_is_reported() {
        let registry = build_registry();
        let job = job_with(JobType::RuleEvaluation, b"not json").await;
        let err = registry
            .handler_for(JobType::RuleEvaluation)
            .unwrap()
            .run(&job, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, "BAD_PAYLOAD");
        assert!(err.to_last_error().starts_with("BAD_PAYLOAD: "));
    }

    #[tokio::test]
    async fn alert_with_message_succeeds() {
        let registry = build_registry();
        let job = job_with(
            JobType::AlertDelivery,
            br#"{"channel":"email","message":"site down"}"#,
        )
        .await;
        registry
            .handler_for(JobType::AlertDelivery)
            .unwrap()
            .run(&job, &ctx())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut registry = HandlerRegistry::new();
        registry.register_with_timeout(
            JobType::BrowserAutomation,
            |_job, _ctx| {
                boxed(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
            },
            Duration::from_secs(1),
        );
        let job = job_with(JobType::BrowserAutomation, b"{}").await;
        let err = registry
            .handler_for(JobType::BrowserAutomation)
            .unwrap()
            .run(&job, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code, "TIMEOUT");
    }
}
