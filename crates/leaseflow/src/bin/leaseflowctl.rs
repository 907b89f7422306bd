use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use chrono::{DateTime, Utc};
use leaseflow::{
    config::Config,
    db,
    jobs::{model::Attribution, JobType, NewJob, PgJobStore, Scheduler},
    telemetry,
};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "leaseflowctl", about = "Admin commands for a leaseflow database")]
struct Cli {
    /// Falls back to DATABASE_URL, then TEST_DATABASE_URL.
    #[arg(long, env = "LEASEFLOW_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations.
    Migrate,
    /// Create one job.
    Enqueue {
        #[arg(long = "type")]
        job_type: JobType,
        /// Raw payload text (stored as bytes).
        #[arg(long, default_value = "")]
        payload: String,
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Delay before the job becomes eligible.
        #[arg(long, default_value_t = 0)]
        delay_secs: i64,
        #[arg(long)]
        max_retries: Option<i32>,
        #[arg(long)]
        test: bool,
        #[arg(long)]
        site_id: Option<String>,
        #[arg(long)]
        source_id: Option<String>,
    },
    /// Print a job's status.
    Status { id: Uuid },
    /// Print counts per status, for one type or all of them.
    Stats {
        #[arg(long = "type")]
        job_type: Option<JobType>,
    },
    /// Delete a job that is not running.
    Delete { id: Uuid },
    /// Return jobs with expired leases to pending.
    Reclaim {
        #[arg(long = "type")]
        job_type: Option<JobType>,
    },
    /// Remove every job.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init(cfg.log_json);

    let cli = Cli::parse();

    let url = cli
        .database_url
        .or_else(|| cfg.database_url.clone())
        .or_else(|| std::env::var("TEST_DATABASE_URL").ok())
        .context("set --database-url, LEASEFLOW_DATABASE_URL or DATABASE_URL")?;

    let pool = db::make_pool(&url, cfg.pool_settings()).await?;

    if let Command::Migrate = cli.command {
        db::run_migrations(&pool).await?;
        println!("migrations OK");
        return Ok(());
    }

    let scheduler = Scheduler::new(
        Arc::new(PgJobStore::new(pool.clone())),
        cfg.scheduler_config(),
    );

    match cli.command {
        Command::Migrate => {}
        Command::Enqueue {
            job_type,
            payload,
            priority,
            delay_secs,
            max_retries,
            test,
            site_id,
            source_id,
        } => {
            let mut new = NewJob::new(job_type, payload.into_bytes())
                .with_priority(priority)
                .with_attribution(Attribution { site_id, source_id });
            if delay_secs > 0 {
                new = new.scheduled_at(scheduled_after(Utc::now(), delay_secs)?);
            }
            if let Some(n) = max_retries {
                new = new.with_max_retries(n);
            }
            if test {
                new = new.as_test();
            }

            let job = scheduler.create_job(new).await?;
            println!(
                "+ created {} id={} scheduled_at={}",
                job.job_type, job.id, job.scheduled_at
            );
        }
        Command::Status { id } => {
            let view = scheduler.get_status(id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Stats { job_type } => {
            let types = match job_type {
                Some(t) => vec![t],
                None => JobType::ALL.to_vec(),
            };
            for t in types {
                let s = scheduler.stats(t).await?;
                println!(
                    "{t}: pending={} running={} completed={} failed={}",
                    s.pending, s.running, s.completed, s.failed
                );
            }
        }
        Command::Delete { id } => {
            scheduler.delete(id).await?;
            println!("deleted {id}");
        }
        Command::Reclaim { job_type } => {
            let types = match job_type {
                Some(t) => vec![t],
                None => JobType::ALL.to_vec(),
            };
            for t in types {
                let n = scheduler.reclaim_expired(t).await?;
                println!("{t}: reclaimed={n}");
            }
        }
        Command::Reset => reset(&pool).await?,
    }

    Ok(())
}

fn scheduled_after(now: DateTime<Utc>, delay_secs: i64) -> anyhow::Result<DateTime<Utc>> {
    chrono::Duration::try_seconds(delay_secs)
        .and_then(|d| now.checked_add_signed(d))
        .with_context(|| format!("--delay-secs {delay_secs} is out of range"))
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE TABLE jobs").execute(pool).await?;
    println!("reset OK");
    Ok(())
}
