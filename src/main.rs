use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use edutrack::calendar::{CalendarResolver, MonthKey};
use edutrack::config::{self, Config};
use edutrack::db::{self, AttendanceFilter, Pool};
use edutrack::model::{
    AttendanceStatus, FacultyId, Mark, PendingAttendanceBatch, StudentId, SubjectId,
};
use edutrack::outbox::SqliteOutbox;
use edutrack::reconciler::{OfflineReconciler, SaveOutcome};
use edutrack::schedule;
use edutrack::service::{self, AttendanceService, MarkAttendanceInput, ServicePolicy};
use edutrack::stats::Standing;

#[derive(Debug, Parser)]
#[command(author, version, about = "Attendance marking and reporting")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply database migrations and exit
    Migrate,
    /// Mark one student for a subject and day
    Mark {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        faculty: i64,
        /// `YYYY-MM-DD` or an RFC 3339 timestamp
        #[arg(long)]
        date: String,
        /// `present` or `absent`
        #[arg(long)]
        status: String,
        /// Queue the mark locally instead of writing it
        #[arg(long)]
        offline: bool,
    },
    /// Mark several students, e.g. `--entries 1=present,2=absent`
    MarkBatch {
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        faculty: i64,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        entries: String,
        #[arg(long)]
        offline: bool,
    },
    /// Flip a student's mark between present and absent
    Toggle {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        faculty: i64,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Enrolled students of a subject with the day's status
    Sheet {
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Raw attendance records, optionally filtered
    List {
        #[arg(long)]
        student: Option<i64>,
        #[arg(long)]
        subject: Option<i64>,
        #[arg(long)]
        faculty: Option<i64>,
    },
    /// Most recent records of a student in a subject
    History {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        subject: i64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Attendance percentage of a student in a subject
    Percentage {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        subject: i64,
    },
    /// Overall percentage across every enrolled subject
    Overall {
        #[arg(long)]
        student: i64,
    },
    /// Month calendar of a subject, or of one student in it
    Calendar {
        #[arg(long)]
        subject: i64,
        /// `YYYY-MM`
        #[arg(long)]
        month: MonthKey,
        #[arg(long)]
        student: Option<i64>,
    },
    /// Cohort report with standings and per-subject completion
    Report {
        #[arg(long)]
        semester: Option<i64>,
    },
    /// Weekly timetable of a student or a faculty member
    Schedule {
        #[arg(long, conflicts_with = "faculty")]
        student: Option<i64>,
        #[arg(long)]
        faculty: Option<i64>,
    },
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
    let service = AttendanceService::new(pool.clone(), ServicePolicy::from_config(&cfg));

    run(&cfg, &pool, service, args.command).await
}

async fn run(cfg: &Config, pool: &Pool, service: AttendanceService, command: Command) -> Result<()> {
    let threshold = cfg.attendance.good_standing_threshold;
    match command {
        Command::Migrate => {
            info!("migrations applied");
        }
        Command::Mark {
            student,
            subject,
            faculty,
            date,
            status,
            offline,
        } => {
            let input = MarkAttendanceInput {
                student_id: Some(student),
                subject_id: Some(subject),
                faculty_id: Some(faculty),
                attendance_date: Some(date),
                status: Some(status),
            };
            let mark = validated_mark(&input)?;
            let batch = PendingAttendanceBatch::new(mark.subject_id, mark.faculty_id, mark.date)
                .with(mark.student_id, mark.status);
            let reconciler = open_reconciler(cfg, service, !offline).await?;
            let outcome = reconciler.save(batch).await?;
            report_save(&outcome)?;
        }
        Command::MarkBatch {
            subject,
            faculty,
            date,
            entries,
            offline,
        } => {
            let mut batch = PendingAttendanceBatch::new(SubjectId(subject), FacultyId(faculty), date);
            for (student_id, status) in parse_entries(&entries)? {
                batch = batch.with(student_id, status);
            }
            let reconciler = open_reconciler(cfg, service, !offline).await?;
            let outcome = reconciler.save(batch).await?;
            report_save(&outcome)?;
        }
        Command::Toggle {
            student,
            subject,
            faculty,
            date,
        } => {
            let record = service
                .toggle_attendance(StudentId(student), SubjectId(subject), FacultyId(faculty), date)
                .await?;
            print_json(&record)?;
        }
        Command::Sheet { subject, date } => {
            for row in service.marking_sheet(SubjectId(subject), date).await? {
                let status = row.status.map_or("not marked", |s| s.as_str());
                println!("{}\t{}\t{}", row.roll_no, row.name, status);
            }
        }
        Command::List {
            student,
            subject,
            faculty,
        } => {
            let filter = AttendanceFilter {
                student_id: student.map(StudentId),
                subject_id: subject.map(SubjectId),
                faculty_id: faculty.map(FacultyId),
            };
            print_json(&service.get_attendance(&filter).await?)?;
        }
        Command::History {
            student,
            subject,
            limit,
        } => {
            let records = service
                .recent_history(StudentId(student), SubjectId(subject), limit)
                .await?;
            for r in records {
                println!("{}\t{}", r.attendance_date, r.status);
            }
        }
        Command::Percentage { student, subject } => {
            let summary = service.summary(StudentId(student), SubjectId(subject)).await?;
            let standing = Standing::classify(summary.percentage, threshold);
            println!(
                "{}% ({} of {} days) {}",
                summary.percentage,
                summary.present,
                summary.total,
                standing.label(threshold)
            );
        }
        Command::Overall { student } => {
            let who = db::get_student(pool, StudentId(student))
                .await?
                .ok_or_else(|| anyhow!("student {student} not found"))?;
            let pct = service.overall_percentage(who.id).await?;
            println!(
                "{} {}: {}% {}",
                who.roll_no,
                who.name,
                pct,
                Standing::classify(pct, threshold).label(threshold)
            );
        }
        Command::Calendar {
            subject,
            month,
            student,
        } => {
            let resolver = CalendarResolver::new(cfg.attendance.weekly_holiday);
            let records = db::attendance_for_subject_between(
                pool,
                SubjectId(subject),
                month.first_day(),
                month.last_day(),
            )
            .await?;
            match student {
                Some(student) => print_json(&resolver.resolve_student_month(
                    month,
                    StudentId(student),
                    SubjectId(subject),
                    &records,
                ))?,
                None => print_json(&resolver.resolve_month(month, SubjectId(subject), &records))?,
            }
        }
        Command::Report { semester } => {
            print_json(&service.cohort_report(semester).await?)?;
        }
        Command::Schedule { student, faculty } => {
            let slots = match (student, faculty) {
                (Some(student), _) => db::timetable_for_student(pool, StudentId(student)).await?,
                (None, Some(faculty)) => db::timetable_for_faculty(pool, FacultyId(faculty)).await?,
                (None, None) => bail!("either --student or --faculty is required"),
            };
            print_json(&schedule::weekly_schedule(&slots, cfg.attendance.weekly_holiday))?;
        }
    }
    Ok(())
}

async fn open_reconciler(cfg: &Config, service: AttendanceService, online: bool) -> Result<OfflineReconciler> {
    let queue = SqliteOutbox::open(&cfg.queue_url())
        .await
        .context("failed to open offline queue")?;
    OfflineReconciler::open(Arc::new(queue), Arc::new(service), online).await
}

/// Prints the `{success: false}` response before failing on invalid input.
fn validated_mark(input: &MarkAttendanceInput) -> Result<Mark> {
    let res = input.validate();
    if res.is_err() {
        print_json(&service::MarkResponse::from(&res))?;
    }
    Ok(res?)
}

fn report_save(outcome: &SaveOutcome) -> Result<()> {
    match outcome {
        SaveOutcome::Saved(report) => {
            let total = report.applied + report.rejected.len();
            println!("{} of {} succeeded", report.applied, total);
            for rejected in &report.rejected {
                warn!(student = %rejected.student_id, reason = %rejected.reason, "mark rejected");
                println!("  student {}: {}", rejected.student_id, rejected.reason);
            }
            if !report.rejected.is_empty() {
                bail!("{} of {} marks rejected", report.rejected.len(), total);
            }
        }
        SaveOutcome::Deferred { report, queued } => {
            println!(
                "saved offline: {} applied before deferring, {} batch(es) pending sync",
                report.applied, queued
            );
        }
    }
    Ok(())
}

/// `1=present,2=absent`
fn parse_entries(raw: &str) -> Result<Vec<(StudentId, AttendanceStatus)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (id, status) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("entry {entry:?} must look like <student_id>=<status>"))?;
            let id: i64 = id
                .trim()
                .parse()
                .with_context(|| format!("bad student id in {entry:?}"))?;
            let status = service::parse_status(status)?;
            Ok((StudentId(id), status))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
