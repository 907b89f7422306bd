use rand::Rng;
use std::time::Duration;

use crate::jobs::model::Job;

/// Backoff applied to requeued jobs. `base_seconds = 0` requeues immediately.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 0,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    TestJob,
    RetriesExhausted,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::TestJob => "TEST_JOB",
            FailReason::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }
}

/// What a failure report does to a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to pending, eligible again after `delay`.
    Requeue { retry_count: i32, delay: Duration },
    /// Terminal.
    Fail { reason: FailReason },
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    cfg: RetryConfig,
}

impl RetryPolicy {
    pub fn new(cfg: RetryConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.cfg
    }

    pub fn decide(&self, job: &Job) -> FailureTransition {
        self.decide_with_rng(job, &mut rand::thread_rng())
    }

    pub fn decide_with_rng(&self, job: &Job, rng: &mut impl Rng) -> FailureTransition {
        if job.is_test {
            return FailureTransition::Fail {
                reason: FailReason::TestJob,
            };
        }
        if job.retry_count >= job.max_retries {
            return FailureTransition::Fail {
                reason: FailReason::RetriesExhausted,
            };
        }

        let retry_count = job.retry_count + 1;
        let delay_secs = next_delay_seconds(retry_count, &self.cfg, rng);

        FailureTransition::Requeue {
            retry_count,
            delay: Duration::from_secs(delay_secs as u64),
        }
    }
}

pub fn next_delay_seconds(retry_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    if cfg.base_seconds <= 0 {
        return 0;
    }

    let exp = (retry_no.max(1) as u32).saturating_sub(1);

    // 2^exp; an overflowing shift is left for the cap to handle
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);

    let delay = cfg.base_seconds.saturating_mul(pow2).min(cfg.max_seconds);

    // jitter in [-jitter_pct, +jitter_pct]
    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds)
}
