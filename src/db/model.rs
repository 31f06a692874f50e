//! View models and query inputs used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{AttendanceStatus, FacultyId, StudentId, SubjectId};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Optional filters of the `getAttendance` boundary. Empty filter lists everything.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceFilter {
    #[serde(default)]
    pub student_id: Option<StudentId>,
    #[serde(default)]
    pub subject_id: Option<SubjectId>,
    #[serde(default)]
    pub faculty_id: Option<FacultyId>,
}

impl AttendanceFilter {
    pub fn student(student_id: StudentId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    Ascending,
    Descending,
}

impl DateOrder {
    pub(crate) fn as_sql(&self) -> &'static str {
        match self {
            DateOrder::Ascending => "ASC",
            DateOrder::Descending => "DESC",
        }
    }
}

/// One row of the faculty marking sheet: an enrolled student and the status already
/// recorded for the day, if any.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MarkingSheetRow {
    pub student_id: StudentId,
    pub roll_no: String,
    pub name: String,
    pub status: Option<AttendanceStatus>,
}

/// Timetable slot joined with its subject.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduledSlot {
    pub timetable_id: i64,
    pub subject_id: SubjectId,
    pub subject_code: String,
    pub subject_name: String,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room_no: Option<String>,
}
