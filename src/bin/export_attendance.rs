use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use edutrack::config::{self, Config};
use edutrack::db;
use edutrack::export;
use edutrack::model::SubjectId;

#[derive(Debug, Parser)]
#[command(about = "Export one day of a subject's attendance to CSV. Unmarked students are listed as `not marked`.")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(long)]
    subject: i64,

    /// `YYYY-MM-DD`
    #[arg(long)]
    date: NaiveDate,

    /// Output directory; the file is named after the subject code and date
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
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
    run(&cfg, &args).await
}

async fn run(cfg: &Config, args: &Args) -> Result<()> {
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let subject_id = SubjectId(args.subject);
    let subject = db::get_subject(&pool, subject_id)
        .await?
        .ok_or_else(|| anyhow!("subject {} not found", subject_id))?;
    let rows = db::marking_sheet(&pool, subject_id, args.date).await?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let path = args.out_dir.join(export::export_file_name(&subject.code, args.date));
    tokio::fs::write(&path, export::attendance_csv(&rows))
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!(subject = %subject.code, date = %args.date, students = rows.len(), path = %path.display(), "attendance exported");
    println!("{}", path.display());
    Ok(())
}
