use super::error::{StoreError, StoreResult};
use super::model::{AttendanceFilter, DateOrder, MarkingSheetRow, ScheduledSlot};
use crate::model::{
    AttendanceId, AttendanceRecord, AttendanceStatus, Enrollment, Faculty, FacultyId, Mark,
    Student, StudentId, Subject, SubjectId,
};
use chrono::{NaiveDate, NaiveTime};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

const ATTENDANCE_COLUMNS: &str =
    "id, student_id, subject_id, faculty_id, attendance_date, status";
const SUBJECT_COLUMNS: &str = "id, code, name, semester, credits, faculty_id";
const STUDENT_COLUMNS: &str = "id, roll_no, name, email, semester";

pub async fn init_pool(database_url: &str) -> StoreResult<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL with full durability; concurrent writers wait on the busy timeout.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
pub(crate) fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn attendance_from_row(row: &SqliteRow) -> StoreResult<AttendanceRecord> {
    let id: i64 = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = AttendanceStatus::parse_status(&status_str).ok_or_else(|| StoreError::Corrupt {
        table: "attendance",
        id,
        detail: format!("unknown status {status_str:?}"),
    })?;
    Ok(AttendanceRecord {
        id: AttendanceId(id),
        student_id: StudentId(row.try_get("student_id")?),
        subject_id: SubjectId(row.try_get("subject_id")?),
        faculty_id: FacultyId(row.try_get("faculty_id")?),
        attendance_date: row.try_get("attendance_date")?,
        status,
    })
}

fn attendance_from_rows(rows: Vec<SqliteRow>) -> StoreResult<Vec<AttendanceRecord>> {
    rows.iter().map(attendance_from_row).collect()
}

fn student_from_row(row: &SqliteRow) -> StoreResult<Student> {
    Ok(Student {
        id: StudentId(row.try_get("id")?),
        roll_no: row.try_get("roll_no")?,
        name: row.try_get("name")?,
        email: row.try_get::<Option<String>, _>("email")?,
        semester: row.try_get("semester")?,
    })
}

fn subject_from_row(row: &SqliteRow) -> StoreResult<Subject> {
    Ok(Subject {
        id: SubjectId(row.try_get("id")?),
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        semester: row.try_get("semester")?,
        credits: row.try_get("credits")?,
        faculty_id: row.try_get::<Option<i64>, _>("faculty_id")?.map(FacultyId),
    })
}

fn slot_from_row(row: &SqliteRow) -> StoreResult<ScheduledSlot> {
    let timetable_id: i64 = row.try_get("id")?;
    let day: i64 = row.try_get("day_of_week")?;
    let day_of_week = u8::try_from(day).map_err(|_| StoreError::Corrupt {
        table: "timetable",
        id: timetable_id,
        detail: format!("day_of_week {day} out of range"),
    })?;
    Ok(ScheduledSlot {
        timetable_id,
        subject_id: SubjectId(row.try_get("subject_id")?),
        subject_code: row.try_get("code")?,
        subject_name: row.try_get("name")?,
        day_of_week,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        room_no: row.try_get::<Option<String>, _>("room_no")?,
    })
}

// ---------------------------------------------------------------------------
// Reference entities
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_student(
    pool: &Pool,
    roll_no: &str,
    name: &str,
    email: Option<&str>,
    semester: i64,
) -> StoreResult<StudentId> {
    let id: i64 = sqlx::query(
        "INSERT INTO students (roll_no, name, email, semester) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(roll_no)
    .bind(name)
    .bind(email)
    .bind(semester)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(StudentId(id))
}

#[instrument(skip_all)]
pub async fn insert_faculty(pool: &Pool, name: &str, email: Option<&str>) -> StoreResult<FacultyId> {
    let id: i64 = sqlx::query("INSERT INTO faculty (name, email) VALUES (?, ?) RETURNING id")
        .bind(name)
        .bind(email)
        .fetch_one(pool)
        .await?
        .try_get("id")?;
    Ok(FacultyId(id))
}

#[instrument(skip_all)]
pub async fn insert_subject(
    pool: &Pool,
    code: &str,
    name: &str,
    semester: i64,
    credits: i64,
    faculty_id: Option<FacultyId>,
) -> StoreResult<SubjectId> {
    let id: i64 = sqlx::query(
        "INSERT INTO subjects (code, name, semester, credits, faculty_id) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(code)
    .bind(name)
    .bind(semester)
    .bind(credits)
    .bind(faculty_id.map(FacultyId::get))
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(SubjectId(id))
}

pub async fn get_student(pool: &Pool, student_id: StudentId) -> StoreResult<Option<Student>> {
    let row = sqlx::query(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?"))
        .bind(student_id.get())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(student_from_row).transpose()
}

pub async fn list_students(pool: &Pool) -> StoreResult<Vec<Student>> {
    let rows = sqlx::query(&format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY roll_no"))
        .fetch_all(pool)
        .await?;
    rows.iter().map(student_from_row).collect()
}

pub async fn get_faculty(pool: &Pool, faculty_id: FacultyId) -> StoreResult<Option<Faculty>> {
    let row = sqlx::query("SELECT id, name, email FROM faculty WHERE id = ?")
        .bind(faculty_id.get())
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Faculty {
        id: FacultyId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get::<Option<String>, _>("email")?,
    }))
}

pub async fn get_subject(pool: &Pool, subject_id: SubjectId) -> StoreResult<Option<Subject>> {
    let row = sqlx::query(&format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = ?"))
        .bind(subject_id.get())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(subject_from_row).transpose()
}

pub async fn list_subjects(pool: &Pool) -> StoreResult<Vec<Subject>> {
    let rows = sqlx::query(&format!("SELECT {SUBJECT_COLUMNS} FROM subjects ORDER BY code"))
        .fetch_all(pool)
        .await?;
    rows.iter().map(subject_from_row).collect()
}

/// Subjects grouped under one semester; scopes calendar and report views.
pub async fn subjects_for_semester(pool: &Pool, semester: i64) -> StoreResult<Vec<Subject>> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE semester = ? ORDER BY code"
    ))
    .bind(semester)
    .fetch_all(pool)
    .await?;
    rows.iter().map(subject_from_row).collect()
}

pub async fn subjects_for_faculty(pool: &Pool, faculty_id: FacultyId) -> StoreResult<Vec<Subject>> {
    let rows = sqlx::query(&format!(
        "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE faculty_id = ? ORDER BY code"
    ))
    .bind(faculty_id.get())
    .fetch_all(pool)
    .await?;
    rows.iter().map(subject_from_row).collect()
}

// ---------------------------------------------------------------------------
// Enrollments
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn enroll(pool: &Pool, student_id: StudentId, subject_id: SubjectId) -> StoreResult<()> {
    sqlx::query("INSERT INTO enrollments (student_id, subject_id) VALUES (?, ?) ON CONFLICT DO NOTHING")
        .bind(student_id.get())
        .bind(subject_id.get())
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove an enrollment. Attendance already recorded for the pair is kept.
#[instrument(skip_all)]
pub async fn unenroll(pool: &Pool, student_id: StudentId, subject_id: SubjectId) -> StoreResult<bool> {
    let res = sqlx::query("DELETE FROM enrollments WHERE student_id = ? AND subject_id = ?")
        .bind(student_id.get())
        .bind(subject_id.get())
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Replace a student's enrollment set in one transaction.
#[instrument(skip_all)]
pub async fn set_enrollments(
    pool: &Pool,
    student_id: StudentId,
    subject_ids: &[SubjectId],
) -> StoreResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM enrollments WHERE student_id = ?")
        .bind(student_id.get())
        .execute(&mut *tx)
        .await?;
    for subject_id in subject_ids {
        sqlx::query(
            "INSERT INTO enrollments (student_id, subject_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(student_id.get())
        .bind(subject_id.get())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn is_enrolled(pool: &Pool, student_id: StudentId, subject_id: SubjectId) -> StoreResult<bool> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM enrollments WHERE student_id = ? AND subject_id = ?",
    )
    .bind(student_id.get())
    .bind(subject_id.get())
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

fn enrollments_from_rows(rows: Vec<(i64, i64)>) -> Vec<Enrollment> {
    rows.into_iter()
        .map(|(student_id, subject_id)| Enrollment {
            student_id: StudentId(student_id),
            subject_id: SubjectId(subject_id),
        })
        .collect()
}

pub async fn enrollments_for_student(pool: &Pool, student_id: StudentId) -> StoreResult<Vec<Enrollment>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT student_id, subject_id FROM enrollments WHERE student_id = ? ORDER BY subject_id",
    )
    .bind(student_id.get())
    .fetch_all(pool)
    .await?;
    Ok(enrollments_from_rows(rows))
}

pub async fn enrollments_for_subject(pool: &Pool, subject_id: SubjectId) -> StoreResult<Vec<Enrollment>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT student_id, subject_id FROM enrollments WHERE subject_id = ? ORDER BY student_id",
    )
    .bind(subject_id.get())
    .fetch_all(pool)
    .await?;
    Ok(enrollments_from_rows(rows))
}

pub async fn list_enrollments(pool: &Pool) -> StoreResult<Vec<Enrollment>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT student_id, subject_id FROM enrollments ORDER BY student_id, subject_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(enrollments_from_rows(rows))
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

/// Insert or update the record for the mark's (student, subject, date) triple.
///
/// A single `INSERT .. ON CONFLICT DO UPDATE` statement against the unique triple index,
/// so concurrent marks for one triple never produce two rows.
#[instrument(skip_all, fields(student = %mark.student_id, subject = %mark.subject_id, date = %mark.date))]
pub async fn upsert_attendance(pool: &Pool, mark: &Mark) -> StoreResult<AttendanceRecord> {
    let row = sqlx::query(&format!(
        "INSERT INTO attendance (student_id, subject_id, faculty_id, attendance_date, status) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (student_id, subject_id, attendance_date) \
         DO UPDATE SET status = excluded.status, faculty_id = excluded.faculty_id, \
                       updated_at = CURRENT_TIMESTAMP \
         RETURNING {ATTENDANCE_COLUMNS}"
    ))
    .bind(mark.student_id.get())
    .bind(mark.subject_id.get())
    .bind(mark.faculty_id.get())
    .bind(mark.date)
    .bind(mark.status.as_str())
    .fetch_one(pool)
    .await?;
    let record = attendance_from_row(&row)?;
    debug!(id = %record.id, status = %record.status, "attendance upserted");
    Ok(record)
}

#[instrument(skip_all)]
pub async fn attendance_for_student_subject(
    pool: &Pool,
    student_id: StudentId,
    subject_id: SubjectId,
    order: DateOrder,
) -> StoreResult<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
         WHERE student_id = ? AND subject_id = ? \
         ORDER BY attendance_date {}",
        order.as_sql()
    ))
    .bind(student_id.get())
    .bind(subject_id.get())
    .fetch_all(pool)
    .await?;
    attendance_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn attendance_for_subject_date(
    pool: &Pool,
    subject_id: SubjectId,
    date: NaiveDate,
) -> StoreResult<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
         WHERE subject_id = ? AND attendance_date = ? \
         ORDER BY student_id"
    ))
    .bind(subject_id.get())
    .bind(date)
    .fetch_all(pool)
    .await?;
    attendance_from_rows(rows)
}

/// Records between two dates (inclusive) for one subject, e.g. a month grid.
#[instrument(skip_all)]
pub async fn attendance_for_subject_between(
    pool: &Pool,
    subject_id: SubjectId,
    from: NaiveDate,
    to: NaiveDate,
) -> StoreResult<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance \
         WHERE subject_id = ? AND attendance_date BETWEEN ? AND ? \
         ORDER BY attendance_date, student_id"
    ))
    .bind(subject_id.get())
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;
    attendance_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn list_attendance(pool: &Pool, filter: &AttendanceFilter) -> StoreResult<Vec<AttendanceRecord>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE 1 = 1"
    ));
    if let Some(student_id) = filter.student_id {
        qb.push(" AND student_id = ").push_bind(student_id.get());
    }
    if let Some(subject_id) = filter.subject_id {
        qb.push(" AND subject_id = ").push_bind(subject_id.get());
    }
    if let Some(faculty_id) = filter.faculty_id {
        qb.push(" AND faculty_id = ").push_bind(faculty_id.get());
    }
    qb.push(" ORDER BY attendance_date, student_id, subject_id");
    let rows = qb.build().fetch_all(pool).await?;
    attendance_from_rows(rows)
}

/// Enrolled students of a subject joined with the status recorded on `date`.
#[instrument(skip_all)]
pub async fn marking_sheet(
    pool: &Pool,
    subject_id: SubjectId,
    date: NaiveDate,
) -> StoreResult<Vec<MarkingSheetRow>> {
    let rows = sqlx::query(
        "SELECT s.id, s.roll_no, s.name, a.status \
         FROM enrollments e \
         JOIN students s ON s.id = e.student_id \
         LEFT JOIN attendance a \
           ON a.student_id = e.student_id AND a.subject_id = e.subject_id AND a.attendance_date = ? \
         WHERE e.subject_id = ? \
         ORDER BY s.roll_no",
    )
    .bind(date)
    .bind(subject_id.get())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let student_id: i64 = row.try_get("id")?;
            let status = match row.try_get::<Option<String>, _>("status")? {
                None => None,
                Some(s) => Some(AttendanceStatus::parse_status(&s).ok_or_else(|| {
                    StoreError::Corrupt {
                        table: "attendance",
                        id: student_id,
                        detail: format!("unknown status {s:?}"),
                    }
                })?),
            };
            Ok(MarkingSheetRow {
                student_id: StudentId(student_id),
                roll_no: row.try_get("roll_no")?,
                name: row.try_get("name")?,
                status,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Timetable
// ---------------------------------------------------------------------------

/// `day_of_week` runs from 1 (Monday) to 6 (Saturday); the table refuses anything else.
#[instrument(skip_all)]
pub async fn add_timetable_slot(
    pool: &Pool,
    subject_id: SubjectId,
    day_of_week: u8,
    start_time: NaiveTime,
    end_time: NaiveTime,
    room_no: Option<&str>,
) -> StoreResult<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO timetable (subject_id, day_of_week, start_time, end_time, room_no) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(subject_id.get())
    .bind(i64::from(day_of_week))
    .bind(start_time)
    .bind(end_time)
    .bind(room_no)
    .fetch_one(pool)
    .await?
    .try_get("id")?;
    Ok(id)
}

pub async fn timetable_for_student(pool: &Pool, student_id: StudentId) -> StoreResult<Vec<ScheduledSlot>> {
    let rows = sqlx::query(
        "SELECT t.id, t.subject_id, s.code, s.name, t.day_of_week, t.start_time, t.end_time, t.room_no \
         FROM timetable t \
         JOIN subjects s ON s.id = t.subject_id \
         JOIN enrollments e ON e.subject_id = t.subject_id \
         WHERE e.student_id = ? \
         ORDER BY t.day_of_week, t.start_time",
    )
    .bind(student_id.get())
    .fetch_all(pool)
    .await?;
    rows.iter().map(slot_from_row).collect()
}

pub async fn timetable_for_faculty(pool: &Pool, faculty_id: FacultyId) -> StoreResult<Vec<ScheduledSlot>> {
    let rows = sqlx::query(
        "SELECT t.id, t.subject_id, s.code, s.name, t.day_of_week, t.start_time, t.end_time, t.room_no \
         FROM timetable t \
         JOIN subjects s ON s.id = t.subject_id \
         WHERE s.faculty_id = ? \
         ORDER BY t.day_of_week, t.start_time",
    )
    .bind(faculty_id.get())
    .fetch_all(pool)
    .await?;
    rows.iter().map(slot_from_row).collect()
}
