//! Attendance write path and the read views built on it.

use crate::config::Config;
use crate::db::{self, AttendanceFilter, DateOrder, MarkingSheetRow, Pool, StoreError};
use crate::model::{
    AttendanceRecord, AttendanceStatus, FacultyId, Mark, StudentId, SubjectId,
};
use crate::report;
use crate::stats::{self, AttendanceSummary};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum MarkError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("student {student_id} is not enrolled in subject {subject_id}")]
    NotEnrolled {
        student_id: StudentId,
        subject_id: SubjectId,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl MarkError {
    fn invalid(msg: impl Into<String>) -> Self {
        MarkError::Validation(msg.into())
    }
}

/// Subset of a batch failed; the succeeded marks stay written.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{succeeded} of {total} attendance marks succeeded")]
pub struct PartialBatchFailure {
    pub succeeded: usize,
    pub total: usize,
    pub failed: Vec<StudentId>,
}

/// Wire form of `markAttendance`. Every field is optional so that a missing field is
/// reported as a validation error instead of a decoding failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkAttendanceInput {
    #[serde(default, alias = "stud_id")]
    pub student_id: Option<i64>,
    #[serde(default)]
    pub subject_id: Option<i64>,
    #[serde(default)]
    pub faculty_id: Option<i64>,
    #[serde(default, alias = "date")]
    pub attendance_date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl MarkAttendanceInput {
    pub fn validate(&self) -> Result<Mark, MarkError> {
        let student_id = StudentId(required_id(self.student_id, "student_id")?);
        let subject_id = SubjectId(required_id(self.subject_id, "subject_id")?);
        let faculty_id = FacultyId(required_id(self.faculty_id, "faculty_id")?);
        let date = match self.attendance_date.as_deref() {
            Some(raw) => normalize_date(raw)?,
            None => return Err(MarkError::invalid("attendance_date is required")),
        };
        let status = match self.status.as_deref() {
            Some(raw) => parse_status(raw)?,
            None => return Err(MarkError::invalid("status is required")),
        };
        Ok(Mark {
            student_id,
            subject_id,
            faculty_id,
            date,
            status,
        })
    }
}

/// Wire result of `markAttendance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<&Result<T, MarkError>> for MarkResponse {
    fn from(res: &Result<T, MarkError>) -> Self {
        match res {
            Ok(_) => MarkResponse {
                success: true,
                error: None,
            },
            Err(err) => MarkResponse {
                success: false,
                error: Some(err.to_string()),
            },
        }
    }
}

fn required_id(value: Option<i64>, field: &str) -> Result<i64, MarkError> {
    match value {
        None => Err(MarkError::invalid(format!("{field} is required"))),
        Some(id) if id <= 0 => Err(MarkError::invalid(format!("{field} must be positive, got {id}"))),
        Some(id) => Ok(id),
    }
}

/// Reduce an ISO date or timestamp to its date-only key.
///
/// `YYYY-MM-DD` is taken as is. Timestamps are converted to UTC first, then truncated to
/// the day; a timestamp without an offset is read as UTC.
pub fn normalize_date(raw: &str) -> Result<NaiveDate, MarkError> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(MarkError::invalid("attendance_date is required"));
    }
    if let Ok(date) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(t) {
        return Ok(ts.with_timezone(&Utc).date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ts.date());
    }
    Err(MarkError::invalid(format!(
        "attendance_date must be an ISO 8601 date (YYYY-MM-DD), got {t:?}"
    )))
}

pub fn parse_status(raw: &str) -> Result<AttendanceStatus, MarkError> {
    let t = raw.trim().to_ascii_lowercase();
    if t == "holiday" {
        return Err(MarkError::invalid("holiday is derived from the calendar and cannot be marked"));
    }
    AttendanceStatus::parse_status(&t).ok_or_else(|| {
        MarkError::invalid(format!("status must be \"present\" or \"absent\", got {raw:?}"))
    })
}

fn check_ids(mark: &Mark) -> Result<(), MarkError> {
    if !mark.student_id.is_valid() {
        return Err(MarkError::invalid(format!("student_id must be positive, got {}", mark.student_id)));
    }
    if !mark.subject_id.is_valid() {
        return Err(MarkError::invalid(format!("subject_id must be positive, got {}", mark.subject_id)));
    }
    if !mark.faculty_id.is_valid() {
        return Err(MarkError::invalid(format!("faculty_id must be positive, got {}", mark.faculty_id)));
    }
    Ok(())
}

/// Outcome of marking many students for one subject and day.
#[derive(Debug)]
pub struct BatchReport {
    pub subject_id: SubjectId,
    pub date: NaiveDate,
    pub total: usize,
    pub succeeded: Vec<StudentId>,
    pub failed: Vec<(StudentId, MarkError)>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!("{} of {} succeeded", self.succeeded.len(), self.total)
    }

    pub fn failed_students(&self) -> Vec<StudentId> {
        self.failed.iter().map(|(s, _)| *s).collect()
    }

    pub fn into_result(self) -> Result<Vec<StudentId>, PartialBatchFailure> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        Err(PartialBatchFailure {
            succeeded: self.succeeded.len(),
            total: self.total,
            failed: self.failed_students(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServicePolicy {
    /// Reject marks for students not enrolled in the subject.
    pub enforce_enrollment: bool,
    pub recent_history_limit: usize,
    pub good_standing_threshold: u8,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            enforce_enrollment: true,
            recent_history_limit: 5,
            good_standing_threshold: stats::DEFAULT_GOOD_STANDING,
        }
    }
}

impl ServicePolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            enforce_enrollment: cfg.attendance.enforce_enrollment,
            recent_history_limit: cfg.attendance.recent_history_limit as usize,
            good_standing_threshold: cfg.attendance.good_standing_threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceService {
    pool: Pool,
    policy: ServicePolicy,
}

impl AttendanceService {
    pub fn new(pool: Pool, policy: ServicePolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// `markAttendance`: validate the wire input, then record it.
    #[instrument(skip_all)]
    pub async fn mark_attendance(&self, input: &MarkAttendanceInput) -> Result<AttendanceRecord, MarkError> {
        let mark = input.validate()?;
        self.record(&mark).await
    }

    /// `markAttendance` with the `{ success }` wire result.
    pub async fn respond(&self, input: &MarkAttendanceInput) -> MarkResponse {
        let res = self.mark_attendance(input).await;
        if let Err(err) = &res {
            warn!(%err, "attendance mark rejected");
        }
        MarkResponse::from(&res)
    }

    /// Idempotent insert-or-update of one validated mark.
    #[instrument(skip_all, fields(student = %mark.student_id, subject = %mark.subject_id, date = %mark.date))]
    pub async fn record(&self, mark: &Mark) -> Result<AttendanceRecord, MarkError> {
        check_ids(mark)?;
        if self.policy.enforce_enrollment
            && !db::is_enrolled(&self.pool, mark.student_id, mark.subject_id).await?
        {
            return Err(MarkError::NotEnrolled {
                student_id: mark.student_id,
                subject_id: mark.subject_id,
            });
        }
        let record = db::upsert_attendance(&self.pool, mark).await?;
        info!(id = %record.id, status = %record.status, faculty = %record.faculty_id, "attendance recorded");
        Ok(record)
    }

    /// Mark every listed student for one subject and day. Failures do not roll back the
    /// students already written.
    #[instrument(skip_all, fields(subject = %subject_id, date = %date, total = entries.len()))]
    pub async fn mark_batch(
        &self,
        subject_id: SubjectId,
        faculty_id: FacultyId,
        date: NaiveDate,
        entries: &[(StudentId, AttendanceStatus)],
    ) -> BatchReport {
        let mut report = BatchReport {
            subject_id,
            date,
            total: entries.len(),
            succeeded: Vec::with_capacity(entries.len()),
            failed: Vec::new(),
        };
        for (student_id, status) in entries {
            let mark = Mark {
                student_id: *student_id,
                subject_id,
                faculty_id,
                date,
                status: *status,
            };
            match self.record(&mark).await {
                Ok(_) => report.succeeded.push(*student_id),
                Err(err) => {
                    warn!(student = %student_id, %err, "batch mark failed");
                    report.failed.push((*student_id, err));
                }
            }
        }
        info!(summary = %report.summary(), "batch marked");
        report
    }

    /// Flip a student's mark for the day: present becomes absent, absent or unmarked
    /// becomes present.
    pub async fn toggle_attendance(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
        faculty_id: FacultyId,
        date: NaiveDate,
    ) -> Result<AttendanceRecord, MarkError> {
        let current = db::attendance_for_subject_date(&self.pool, subject_id, date)
            .await?
            .into_iter()
            .find(|r| r.student_id == student_id)
            .map(|r| r.status);
        let mark = Mark {
            student_id,
            subject_id,
            faculty_id,
            date,
            status: AttendanceStatus::toggled(current),
        };
        self.record(&mark).await
    }

    /// `getAttendance`.
    pub async fn get_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<AttendanceRecord>, StoreError> {
        db::list_attendance(&self.pool, filter).await
    }

    pub async fn marking_sheet(&self, subject_id: SubjectId, date: NaiveDate) -> Result<Vec<MarkingSheetRow>, StoreError> {
        db::marking_sheet(&self.pool, subject_id, date).await
    }

    /// Newest records first, capped at `limit` or the configured history length.
    pub async fn recent_history(
        &self,
        student_id: StudentId,
        subject_id: SubjectId,
        limit: Option<usize>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut records =
            db::attendance_for_student_subject(&self.pool, student_id, subject_id, DateOrder::Descending)
                .await?;
        records.truncate(limit.unwrap_or(self.policy.recent_history_limit));
        Ok(records)
    }

    pub async fn summary(&self, student_id: StudentId, subject_id: SubjectId) -> Result<AttendanceSummary, StoreError> {
        let records =
            db::attendance_for_student_subject(&self.pool, student_id, subject_id, DateOrder::Ascending)
                .await?;
        Ok(stats::summarize(&records, student_id, subject_id))
    }

    pub async fn overall_percentage(&self, student_id: StudentId) -> Result<u8, StoreError> {
        let enrollments = db::enrollments_for_student(&self.pool, student_id).await?;
        let records = db::list_attendance(&self.pool, &AttendanceFilter::student(student_id)).await?;
        Ok(report::overall_percentage(student_id, &enrollments, &records))
    }

    pub async fn cohort_report(&self, semester: Option<i64>) -> Result<report::CohortReport, StoreError> {
        let students: Vec<StudentId> = db::list_students(&self.pool)
            .await?
            .into_iter()
            .filter(|s| semester.map_or(true, |sem| s.semester == sem))
            .map(|s| s.id)
            .collect();
        let subjects = match semester {
            Some(sem) => db::subjects_for_semester(&self.pool, sem).await?,
            None => db::list_subjects(&self.pool).await?,
        };
        let subject_ids: Vec<SubjectId> = subjects.iter().map(|s| s.id).collect();
        let enrollments = db::list_enrollments(&self.pool).await?;
        let records = db::list_attendance(&self.pool, &AttendanceFilter::default()).await?;
        Ok(report::cohort_report(
            &students,
            &subject_ids,
            &enrollments,
            &records,
            self.policy.good_standing_threshold,
        ))
    }
}
