use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }

            /// Ids are database row ids and therefore strictly positive.
            pub fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(StudentId);
id_type!(SubjectId);
id_type!(FacultyId);
id_type!(AttendanceId);

/// Stored attendance status. Holidays are derived from the calendar and never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse_status(value: &str) -> Option<Self> {
        match value {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    /// Status a faculty toggle moves to: present flips to absent, anything else to present.
    pub fn toggled(current: Option<Self>) -> Self {
        match current {
            Some(AttendanceStatus::Present) => AttendanceStatus::Absent,
            _ => AttendanceStatus::Present,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity state of the offline reconciler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Synced,
    Pending,
    Syncing,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "SYNCED",
            SyncState::Pending => "PENDING",
            SyncState::Syncing => "SYNCING",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub faculty_id: FacultyId,
    pub attendance_date: NaiveDate,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn matches(&self, student_id: StudentId, subject_id: SubjectId) -> bool {
        self.student_id == student_id && self.subject_id == subject_id
    }
}

/// A validated attendance mark, ready for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub faculty_id: FacultyId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Student {
    pub id: StudentId,
    pub roll_no: String,
    pub name: String,
    pub email: Option<String>,
    pub semester: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Faculty {
    pub id: FacultyId,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,
    pub code: String,
    pub name: String,
    pub semester: i64,
    pub credits: i64,
    pub faculty_id: Option<FacultyId>,
}

/// Attendance saved while offline, waiting to be replayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAttendanceBatch {
    pub subject_id: SubjectId,
    pub faculty_id: FacultyId,
    pub date: NaiveDate,
    pub data: BTreeMap<StudentId, AttendanceStatus>,
}

impl PendingAttendanceBatch {
    pub fn new(subject_id: SubjectId, faculty_id: FacultyId, date: NaiveDate) -> Self {
        Self {
            subject_id,
            faculty_id,
            date,
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, student_id: StudentId, status: AttendanceStatus) -> Self {
        self.data.insert(student_id, status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn marks(&self) -> impl Iterator<Item = Mark> + '_ {
        self.data.iter().map(move |(student_id, status)| Mark {
            student_id: *student_id,
            subject_id: self.subject_id,
            faculty_id: self.faculty_id,
            date: self.date,
            status: *status,
        })
    }

    /// Copy of this batch keeping only the given students.
    pub fn retain_students(&self, students: &[StudentId]) -> Self {
        let data = self
            .data
            .iter()
            .filter(|(student_id, _)| students.contains(student_id))
            .map(|(k, v)| (*k, *v))
            .collect();
        Self {
            data,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(
            AttendanceStatus::parse_status("present"),
            Some(AttendanceStatus::Present)
        );
        assert_eq!(
            AttendanceStatus::parse_status("absent"),
            Some(AttendanceStatus::Absent)
        );
        assert_eq!(AttendanceStatus::parse_status("holiday"), None);
        assert_eq!(AttendanceStatus::parse_status("Present"), None);
    }

    #[test]
    fn toggle_follows_marking_button() {
        assert_eq!(
            AttendanceStatus::toggled(Some(AttendanceStatus::Present)),
            AttendanceStatus::Absent
        );
        assert_eq!(
            AttendanceStatus::toggled(Some(AttendanceStatus::Absent)),
            AttendanceStatus::Present
        );
        assert_eq!(AttendanceStatus::toggled(None), AttendanceStatus::Present);
    }

    #[test]
    fn pending_batch_serializes_student_keys() {
        let date = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
        let batch = PendingAttendanceBatch::new(SubjectId(1), FacultyId(9), date)
            .with(StudentId(2), AttendanceStatus::Absent)
            .with(StudentId(1), AttendanceStatus::Present);
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains("\"2023-10-01\""));
        let back: PendingAttendanceBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);

        let students: Vec<StudentId> = back.marks().map(|m| m.student_id).collect();
        assert_eq!(students, vec![StudentId(1), StudentId(2)]);
    }

    #[test]
    fn retain_students_keeps_batch_header() {
        let date = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
        let batch = PendingAttendanceBatch::new(SubjectId(3), FacultyId(4), date)
            .with(StudentId(1), AttendanceStatus::Present)
            .with(StudentId(2), AttendanceStatus::Absent);
        let rest = batch.retain_students(&[StudentId(2)]);
        assert_eq!(rest.subject_id, SubjectId(3));
        assert_eq!(rest.data.len(), 1);
        assert_eq!(rest.data[&StudentId(2)], AttendanceStatus::Absent);
    }
}
