//! Aggregate attendance reports across subjects and students.

use crate::model::{AttendanceRecord, Enrollment, StudentId, SubjectId};
use crate::stats::{calculate_percentage, rounded_mean, Standing};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

/// Mean of the per-subject percentages over every subject the student is enrolled in.
pub fn overall_percentage(
    student_id: StudentId,
    enrollments: &[Enrollment],
    records: &[AttendanceRecord],
) -> u8 {
    let per_subject: Vec<u8> = enrollments
        .iter()
        .filter(|e| e.student_id == student_id)
        .map(|e| calculate_percentage(records, student_id, e.subject_id))
        .collect();
    rounded_mean(&per_subject)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StudentSummary {
    pub student_id: StudentId,
    pub enrolled_subjects: usize,
    pub overall_percentage: u8,
    pub standing: Standing,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubjectSummary {
    pub subject_id: SubjectId,
    pub enrolled_students: usize,
    /// Distinct days with at least one record.
    pub recorded_days: usize,
    pub last_recorded: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CohortReport {
    pub students: Vec<StudentSummary>,
    pub subjects: Vec<SubjectSummary>,
    /// Rounded mean of the students' overall percentages.
    pub average_percentage: u8,
}

pub fn subject_summary(
    subject_id: SubjectId,
    enrollments: &[Enrollment],
    records: &[AttendanceRecord],
) -> SubjectSummary {
    let days: BTreeSet<NaiveDate> = records
        .iter()
        .filter(|r| r.subject_id == subject_id)
        .map(|r| r.attendance_date)
        .collect();
    SubjectSummary {
        subject_id,
        enrolled_students: enrollments.iter().filter(|e| e.subject_id == subject_id).count(),
        recorded_days: days.len(),
        last_recorded: days.iter().next_back().copied(),
    }
}

pub fn cohort_report(
    roster: &[StudentId],
    subjects: &[SubjectId],
    enrollments: &[Enrollment],
    records: &[AttendanceRecord],
    good_standing_threshold: u8,
) -> CohortReport {
    let students: Vec<StudentSummary> = roster
        .iter()
        .map(|student_id| {
            let overall = overall_percentage(*student_id, enrollments, records);
            StudentSummary {
                student_id: *student_id,
                enrolled_subjects: enrollments.iter().filter(|e| e.student_id == *student_id).count(),
                overall_percentage: overall,
                standing: Standing::classify(overall, good_standing_threshold),
            }
        })
        .collect();
    let overall: Vec<u8> = students.iter().map(|s| s.overall_percentage).collect();
    CohortReport {
        subjects: subjects
            .iter()
            .map(|subject_id| subject_summary(*subject_id, enrollments, records))
            .collect(),
        average_percentage: rounded_mean(&overall),
        students,
    }
}
