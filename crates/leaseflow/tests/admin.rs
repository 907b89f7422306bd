// tests/admin.rs
mod common;

use std::time::Duration;

use common::memory_scheduler;
use leaseflow::error::QueueError;
use leaseflow::jobs::{model::Attribution, JobStatus, JobType, NewJob, QueueStats};
use uuid::Uuid;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test]
async fn stats_count_each_status() {
    let (scheduler, _clock) = memory_scheduler();
    let t = JobType::BrowserAutomation;

    for _ in 0..3 {
        scheduler.create_job(NewJob::new(t, vec![])).await.unwrap();
    }
    let a = scheduler.reserve_next(t, LEASE, Duration::ZERO).await.unwrap().into_job().unwrap();
    let _b = scheduler.reserve_next(t, LEASE, Duration::ZERO).await.unwrap().into_job().unwrap();
    scheduler.complete(a.id).await.unwrap();

    // other types never leak in
    scheduler
        .create_job(NewJob::new(JobType::AlertDelivery, vec![]))
        .await
        .unwrap();

    let stats = scheduler.stats(t).await.unwrap();
    assert_eq!(
        stats,
        QueueStats {
            pending: 1,
            running: 1,
            completed: 1,
            failed: 0,
        }
    );
    assert_eq!(stats.total(), 3);

    let all = scheduler.stats_all().await.unwrap();
    assert_eq!(all.len(), JobType::ALL.len());
    let alerts = all.iter().find(|s| s.job_type == JobType::AlertDelivery).unwrap();
    assert_eq!(alerts.counts.pending, 1);
    let rules = all.iter().find(|s| s.job_type == JobType::RuleEvaluation).unwrap();
    assert_eq!(rules.counts.total(), 0);
}

#[tokio::test]
async fn status_view_reports_outcome() {
    let (scheduler, clock) = memory_scheduler();
    let created = scheduler
        .create_job(
            NewJob::new(JobType::AlertDelivery, vec![])
                .with_max_retries(0)
                .with_attribution(Attribution {
                    site_id: Some("site-1".into()),
                    source_id: None,
                }),
        )
        .await
        .unwrap();
    assert_eq!(created.attribution.site_id.as_deref(), Some("site-1"));

    let view = scheduler.get_status(created.id).await.unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert_eq!(view.completed_at, None);

    scheduler
        .reserve_next(JobType::AlertDelivery, LEASE, Duration::ZERO)
        .await
        .unwrap();
    scheduler.fail(created.id, "bounced").await.unwrap();

    let view = scheduler.get_status(created.id).await.unwrap();
    assert_eq!(view.id, created.id);
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.completed_at, Some(clock.now()));
    assert_eq!(view.last_error.as_deref(), Some("bounced"));
}

#[tokio::test]
async fn status_of_unknown_job_is_not_found() {
    let (scheduler, _clock) = memory_scheduler();
    let id = Uuid::new_v4();
    match scheduler.get_status(id).await {
        Err(QueueError::NotFound { id: missing }) => assert_eq!(missing, id),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_refuses_running_jobs() {
    let (scheduler, _clock) = memory_scheduler();
    let t = JobType::RuleEvaluation;

    let pending = scheduler.create_job(NewJob::new(t, vec![])).await.unwrap();
    scheduler.delete(pending.id).await.unwrap();
    assert!(matches!(
        scheduler.get_status(pending.id).await,
        Err(QueueError::NotFound { .. })
    ));

    scheduler.create_job(NewJob::new(t, vec![])).await.unwrap();
    let running = scheduler.reserve_next(t, LEASE, Duration::ZERO).await.unwrap().into_job().unwrap();
    match scheduler.delete(running.id).await {
        Err(QueueError::Conflict { id, status }) => {
            assert_eq!(id, running.id);
            assert_eq!(status, JobStatus::Running);
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    scheduler.complete(running.id).await.unwrap();
    scheduler.delete(running.id).await.unwrap();

    assert!(matches!(
        scheduler.delete(running.id).await,
        Err(QueueError::NotFound { .. })
    ));
}
