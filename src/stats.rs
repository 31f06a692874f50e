//! Attendance percentages and standing.

use crate::model::{AttendanceRecord, AttendanceStatus, StudentId, SubjectId};
use serde::Serialize;

/// Percentage at or above which a student is in good standing.
pub const DEFAULT_GOOD_STANDING: u8 = 75;

/// `round(numerator / denominator * 100)`, halves rounded up. Zero denominator is 0%.
pub(crate) fn rounded_percent(numerator: u64, denominator: u64) -> u8 {
    if denominator == 0 {
        return 0;
    }
    let pct = (numerator * 200 + denominator) / (denominator * 2);
    pct.min(100) as u8
}

/// Rounded mean of percentages; 0 for an empty slice.
pub(crate) fn rounded_mean(values: &[u8]) -> u8 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().map(|v| u64::from(*v)).sum();
    let n = values.len() as u64;
    ((sum * 2 + n) / (n * 2)).min(100) as u8
}

/// Share of present days among the recorded days of one (student, subject) pair.
///
/// Records of other pairs are ignored. No recorded days yields 0, not "no data".
pub fn calculate_percentage(
    records: &[AttendanceRecord],
    student_id: StudentId,
    subject_id: SubjectId,
) -> u8 {
    summarize(records, student_id, subject_id).percentage
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub present: u32,
    pub absent: u32,
    pub total: u32,
    pub percentage: u8,
}

pub fn summarize(
    records: &[AttendanceRecord],
    student_id: StudentId,
    subject_id: SubjectId,
) -> AttendanceSummary {
    let (present, absent) = records
        .iter()
        .filter(|r| r.matches(student_id, subject_id))
        .fold((0u32, 0u32), |(p, a), r| match r.status {
            AttendanceStatus::Present => (p + 1, a),
            AttendanceStatus::Absent => (p, a + 1),
        });
    let total = present + absent;
    AttendanceSummary {
        present,
        absent,
        total,
        percentage: rounded_percent(u64::from(present), u64::from(total)),
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Good,
    Warning,
}

impl Standing {
    pub fn classify(percentage: u8, threshold: u8) -> Self {
        if percentage >= threshold {
            Standing::Good
        } else {
            Standing::Warning
        }
    }

    pub fn label(&self, threshold: u8) -> String {
        match self {
            Standing::Good => "Good Standing".to_string(),
            Standing::Warning => format!("Below {threshold}%"),
        }
    }
}
