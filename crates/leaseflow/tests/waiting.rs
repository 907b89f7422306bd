// tests/waiting.rs
mod common;

use std::time::Duration;

use common::system_scheduler;
use leaseflow::jobs::{JobType, NewJob, ReservationOutcome};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const LEASE: Duration = Duration::from_secs(30);

#[tokio::test(start_paused = true)]
async fn zero_wait_returns_at_once() {
    let scheduler = system_scheduler(Duration::from_millis(250));
    let start = Instant::now();

    let outcome = scheduler
        .reserve_next(JobType::AlertDelivery, LEASE, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(outcome, ReservationOutcome::NoneEligible);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn wait_gives_up_at_max_wait() {
    let scheduler = system_scheduler(Duration::from_millis(250));
    let start = Instant::now();

    let outcome = scheduler
        .reserve_next(JobType::AlertDelivery, LEASE, Duration::from_secs(2))
        .await
        .unwrap();

    assert!(!outcome.is_claimed());
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(2), "{waited:?}");
    assert!(waited < Duration::from_secs(3), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn waiting_reserver_is_woken_by_a_new_job() {
    // polling alone would take a full minute to notice the job
    let scheduler = system_scheduler(Duration::from_secs(60));

    let waiter = {
        let s = scheduler.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = s
                .reserve_next(JobType::RuleEvaluation, LEASE, Duration::from_secs(120))
                .await
                .unwrap();
            (outcome, start.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = scheduler
        .create_job(NewJob::new(JobType::RuleEvaluation, b"wake".to_vec()))
        .await
        .unwrap();

    let (outcome, waited) = waiter.await.unwrap();
    assert_eq!(outcome.into_job().map(|j| j.id), Some(job.id));
    assert!(waited < Duration::from_secs(1), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn jobs_of_other_types_do_not_satisfy_a_wait() {
    let scheduler = system_scheduler(Duration::from_millis(100));

    let waiter = {
        let s = scheduler.clone();
        tokio::spawn(async move {
            s.reserve_next(JobType::RuleEvaluation, LEASE, Duration::from_secs(1))
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler
        .create_job(NewJob::new(JobType::AlertDelivery, vec![]))
        .await
        .unwrap();

    assert!(!waiter.await.unwrap().is_claimed());
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_the_wait() {
    let scheduler = system_scheduler(Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let waiter = {
        let s = scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = s
                .reserve_next_until_cancelled(
                    JobType::BrowserAutomation,
                    LEASE,
                    Duration::from_secs(600),
                    &cancel,
                )
                .await
                .unwrap();
            (outcome, start.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let (outcome, waited) = waiter.await.unwrap();
    assert_eq!(outcome, ReservationOutcome::NoneEligible);
    assert!(waited < Duration::from_secs(1), "{waited:?}");
}
