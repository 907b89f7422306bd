use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;

/// Connection pool sizing for `PgJobStore`. Built from `Config::pool_settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// The reservation CTE is short and hot; JIT planning only adds latency.
    pub disable_jit: bool,
}

impl PoolSettings {
    pub fn new(max_connections: u32, acquire_timeout: Duration, disable_jit: bool) -> Self {
        Self {
            max_connections: max_connections.clamp(1, 64),
            acquire_timeout: acquire_timeout.clamp(Duration::from_secs(1), Duration::from_secs(60)),
            disable_jit,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::new(8, Duration::from_secs(10), true)
    }
}

pub async fn make_pool(database_url: &str, settings: PoolSettings) -> anyhow::Result<PgPool> {
    let mut connect = PgConnectOptions::from_str(database_url)?.application_name("leaseflow");
    if settings.disable_jit {
        connect = connect.options([("jit", "off")]);
    }

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(connect)
        .await?;

    tracing::info!(
        max_connections = settings.max_connections,
        acquire_timeout_ms = settings.acquire_timeout.as_millis() as u64,
        jit = !settings.disable_jit,
        "postgres pool ready"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}
