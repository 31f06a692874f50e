use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use edutrack::config;
use edutrack::db;
use edutrack::outbox::{QueueStore, SqliteOutbox};
use edutrack::reconciler::{DrainOutcome, OfflineReconciler};
use edutrack::service::{AttendanceService, ServicePolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Replay attendance saved offline and exit when the queue is empty"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Drain attempts before giving up while the store stays unreachable
    #[arg(long, default_value = "5")]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let service = AttendanceService::new(pool, ServicePolicy::from_config(&cfg));

    let queue = Arc::new(SqliteOutbox::open(&cfg.queue_url()).await?);
    let pending = queue.len().await?;
    info!(pending, "initial queue state");
    if pending == 0 {
        info!("nothing to sync, exiting");
        return Ok(());
    }

    let reconciler = OfflineReconciler::open(queue.clone(), Arc::new(service), false).await?;
    let poll = Duration::from_millis(cfg.offline.poll_interval_ms);

    for attempt in 1..=args.max_attempts {
        let outcome = match reconciler.set_online(true).await? {
            Some(outcome) => outcome,
            None => reconciler.reconcile().await?,
        };
        match outcome {
            DrainOutcome::Completed(report) => {
                info!(
                    batches = report.batches,
                    applied = report.replay.applied,
                    rejected = report.replay.rejected.len(),
                    "all pending attendance synced"
                );
                for r in &report.replay.rejected {
                    warn!(
                        subject = %r.subject_id,
                        date = %r.date,
                        student = %r.student_id,
                        reason = %r.reason,
                        "dropped rejected mark"
                    );
                }
                return Ok(());
            }
            DrainOutcome::Interrupted(report) => {
                warn!(
                    attempt,
                    applied = report.replay.applied,
                    remaining = report.remaining,
                    "store unreachable; retrying"
                );
                tokio::time::sleep(poll).await;
            }
            DrainOutcome::Coalesced | DrainOutcome::Offline => {
                tokio::time::sleep(poll).await;
            }
        }
    }

    let remaining = reconciler.pending().await?;
    error!(
        remaining,
        attempts = args.max_attempts,
        "giving up; batches stay queued for the next run"
    );
    Ok(())
}
