use std::time::Duration;

use crate::db::PoolSettings;
use crate::jobs::model::JobType;
use crate::jobs::retry::RetryConfig;
use crate::jobs::scheduler::SchedulerConfig;

/// Runtime configuration for the worker and the HTTP surface, loaded from
/// `LEASEFLOW_*` environment variables (unprefixed names are accepted as a
/// fallback) and an optional `.env` file.
#[derive(Clone, Debug)]
pub struct Config {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub worker_id: String,
    pub job_type: JobType,
    pub lease_seconds: u64,
    pub heartbeat_seconds: u64,
    pub max_wait_seconds: u64,
    pub max_wait_ceiling_seconds: u64,
    pub poll_interval_ms: u64,
    pub reclaim_interval_ms: u64,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub max_payload_bytes: usize,
    pub default_max_retries: i32,
    pub retry_base_seconds: i64,
    pub log_json: bool,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub db_disable_jit: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("LEASEFLOW_DATABASE_URL", "DATABASE_URL");

        let worker_id = env_or_fallback("LEASEFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let job_type = match env_or_fallback("LEASEFLOW_JOB_TYPE", "JOB_TYPE") {
            Some(s) => s
                .parse::<JobType>()
                .map_err(|e| anyhow::anyhow!("LEASEFLOW_JOB_TYPE: {e}"))?,
            None => JobType::BrowserAutomation,
        };

        let lease_seconds = env_parse::<u64>("LEASEFLOW_LEASE_SECONDS", "LEASE_SECONDS")
            .unwrap_or(30)
            .max(1);

        // default: three heartbeats per lease
        let heartbeat_seconds = env_parse::<u64>("LEASEFLOW_HEARTBEAT_SECONDS", "HEARTBEAT_SECONDS")
            .unwrap_or((lease_seconds / 3).max(1));

        let max_wait_ceiling_seconds =
            env_parse::<u64>("LEASEFLOW_MAX_WAIT_CEILING_SECS", "MAX_WAIT_CEILING_SECS").unwrap_or(30);

        let max_wait_seconds = env_parse::<u64>("LEASEFLOW_MAX_WAIT_SECONDS", "MAX_WAIT_SECONDS")
            .unwrap_or(5)
            .min(max_wait_ceiling_seconds);

        let poll_interval_ms = env_parse::<u64>("LEASEFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .unwrap_or(250)
            .max(10);

        let reclaim_interval_ms =
            env_parse::<u64>("LEASEFLOW_RECLAIM_INTERVAL_MS", "RECLAIM_INTERVAL_MS").unwrap_or(5_000);

        let api_addr = env_or_fallback("LEASEFLOW_API_ADDR", "API_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("LEASEFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let max_payload_bytes = env_parse::<usize>("LEASEFLOW_MAX_PAYLOAD_BYTES", "MAX_PAYLOAD_BYTES")
            .unwrap_or(256 * 1024);

        let default_max_retries =
            env_parse::<i32>("LEASEFLOW_DEFAULT_MAX_RETRIES", "DEFAULT_MAX_RETRIES")
                .unwrap_or(3)
                .max(0);

        let retry_base_seconds =
            env_parse::<i64>("LEASEFLOW_RETRY_BASE_SECONDS", "RETRY_BASE_SECONDS").unwrap_or(0);

        let log_json = env_bool("LEASEFLOW_LOG_JSON").unwrap_or(false);

        let db_max_connections =
            env_parse::<u32>("LEASEFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS").unwrap_or(8);
        let db_acquire_timeout_secs =
            env_parse::<u64>("LEASEFLOW_DB_ACQUIRE_TIMEOUT_SECS", "DB_ACQUIRE_TIMEOUT_SECS")
                .unwrap_or(10);
        let db_disable_jit = env_bool("LEASEFLOW_DISABLE_JIT").unwrap_or(true);

        Ok(Self {
            database_url,
            worker_id,
            job_type,
            lease_seconds,
            heartbeat_seconds,
            max_wait_seconds,
            max_wait_ceiling_seconds,
            poll_interval_ms,
            reclaim_interval_ms,
            api_addr,
            migrate_on_startup,
            max_payload_bytes,
            default_max_retries,
            retry_base_seconds,
            log_json,
            db_max_connections,
            db_acquire_timeout_secs,
            db_disable_jit,
        })
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn heartbeat_every(&self) -> Duration {
        Duration::from_secs(self.heartbeat_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings::new(
            self.db_max_connections,
            Duration::from_secs(self.db_acquire_timeout_secs),
            self.db_disable_jit,
        )
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            default_max_retries: self.default_max_retries,
            max_payload_bytes: self.max_payload_bytes,
            poll_interval: self.poll_interval(),
            retry: RetryConfig {
                base_seconds: self.retry_base_seconds,
                ..RetryConfig::default()
            },
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| parse_bool(&v))
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
