//! Month grids and per-day attendance states.
//!
//! Weeks start on Monday. Cells before the first and after the last day of the month are
//! padding: they carry no date and are never resolved.

use crate::model::{AttendanceRecord, AttendanceStatus, StudentId, SubjectId};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonthParseError {
    #[error("month must be YYYY-MM, got {0:?}")]
    Format(String),
    #[error("month must be between 01 and 12, got {0}")]
    OutOfRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthParseError> {
        if !(1..=12).contains(&month) {
            return Err(MonthParseError::OutOfRange(month));
        }
        Ok(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        // month is validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let last = self.last_day();
        self.first_day()
            .iter_days()
            .take_while(move |d| *d <= last)
    }
}

impl FromStr for MonthKey {
    type Err = MonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let Some((y, m)) = t.split_once('-') else {
            return Err(MonthParseError::Format(t.to_string()));
        };
        let year = y
            .parse::<i32>()
            .map_err(|_| MonthParseError::Format(t.to_string()))?;
        let month = m
            .parse::<u32>()
            .map_err(|_| MonthParseError::Format(t.to_string()))?;
        MonthKey::new(year, month)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Month laid out in Monday-start weeks; `None` cells are padding.
pub fn month_grid(month: MonthKey) -> Vec<Option<NaiveDate>> {
    let lead = month.first_day().weekday().num_days_from_monday() as usize;
    let mut cells: Vec<Option<NaiveDate>> = std::iter::repeat(None).take(lead).collect();
    cells.extend(month.days().map(Some));
    while cells.len() % 7 != 0 {
        cells.push(None);
    }
    cells
}

/// Faculty-facing state of one subject on one day.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayState {
    Holiday,
    Completed,
    Pending,
}

/// Student-facing state of one day for one subject.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentDayState {
    Holiday,
    Present,
    Absent,
    NoRecord,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CalendarCell<S> {
    pub date: NaiveDate,
    pub state: S,
}

/// Resolves calendar states against a fixed weekly holiday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarResolver {
    weekly_holiday: Weekday,
}

impl Default for CalendarResolver {
    fn default() -> Self {
        Self::new(Weekday::Sun)
    }
}

impl CalendarResolver {
    pub fn new(weekly_holiday: Weekday) -> Self {
        Self { weekly_holiday }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        date.weekday() == self.weekly_holiday
    }

    /// Holiday beats any record; otherwise any record for the subject completes the day.
    pub fn resolve_day(
        &self,
        date: NaiveDate,
        subject_id: SubjectId,
        records: &[AttendanceRecord],
    ) -> DayState {
        if self.is_holiday(date) {
            return DayState::Holiday;
        }
        let marked = records
            .iter()
            .any(|r| r.subject_id == subject_id && r.attendance_date == date);
        if marked {
            DayState::Completed
        } else {
            DayState::Pending
        }
    }

    pub fn resolve_student_day(
        &self,
        date: NaiveDate,
        student_id: StudentId,
        subject_id: SubjectId,
        records: &[AttendanceRecord],
    ) -> StudentDayState {
        if self.is_holiday(date) {
            return StudentDayState::Holiday;
        }
        let status = records
            .iter()
            .find(|r| r.matches(student_id, subject_id) && r.attendance_date == date)
            .map(|r| r.status);
        match status {
            Some(AttendanceStatus::Present) => StudentDayState::Present,
            Some(AttendanceStatus::Absent) => StudentDayState::Absent,
            None => StudentDayState::NoRecord,
        }
    }

    /// Faculty month view. Padding cells stay `None`.
    pub fn resolve_month(
        &self,
        month: MonthKey,
        subject_id: SubjectId,
        records: &[AttendanceRecord],
    ) -> Vec<Option<CalendarCell<DayState>>> {
        let marked: HashSet<NaiveDate> = records
            .iter()
            .filter(|r| r.subject_id == subject_id)
            .map(|r| r.attendance_date)
            .collect();
        month_grid(month)
            .into_iter()
            .map(|cell| {
                cell.map(|date| {
                    let state = if self.is_holiday(date) {
                        DayState::Holiday
                    } else if marked.contains(&date) {
                        DayState::Completed
                    } else {
                        DayState::Pending
                    };
                    CalendarCell { date, state }
                })
            })
            .collect()
    }

    /// Student month view. Padding cells stay `None`.
    pub fn resolve_student_month(
        &self,
        month: MonthKey,
        student_id: StudentId,
        subject_id: SubjectId,
        records: &[AttendanceRecord],
    ) -> Vec<Option<CalendarCell<StudentDayState>>> {
        let by_date: HashMap<NaiveDate, AttendanceStatus> = records
            .iter()
            .filter(|r| r.matches(student_id, subject_id))
            .map(|r| (r.attendance_date, r.status))
            .collect();
        month_grid(month)
            .into_iter()
            .map(|cell| {
                cell.map(|date| {
                    let state = if self.is_holiday(date) {
                        StudentDayState::Holiday
                    } else {
                        match by_date.get(&date) {
                            Some(AttendanceStatus::Present) => StudentDayState::Present,
                            Some(AttendanceStatus::Absent) => StudentDayState::Absent,
                            None => StudentDayState::NoRecord,
                        }
                    };
                    CalendarCell { date, state }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttendanceId, FacultyId};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(student: i64, subject: i64, date: NaiveDate, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: AttendanceId(1),
            student_id: StudentId(student),
            subject_id: SubjectId(subject),
            faculty_id: FacultyId(1),
            attendance_date: date,
            status,
        }
    }

    #[test]
    fn parse_month_keys() {
        assert_eq!("2023-10".parse::<MonthKey>().unwrap(), MonthKey { year: 2023, month: 10 });
        assert_eq!("2023-13".parse::<MonthKey>(), Err(MonthParseError::OutOfRange(13)));
        assert!(matches!("October".parse::<MonthKey>(), Err(MonthParseError::Format(_))));
        assert_eq!(MonthKey::new(2024, 2).unwrap().to_string(), "2024-02");
    }

    #[test]
    fn month_bounds_handle_leap_years_and_december() {
        assert_eq!(MonthKey::new(2024, 2).unwrap().last_day(), day(2024, 2, 29));
        assert_eq!(MonthKey::new(2023, 2).unwrap().last_day(), day(2023, 2, 28));
        assert_eq!(MonthKey::new(2023, 12).unwrap().last_day(), day(2023, 12, 31));
        assert_eq!(MonthKey::new(2023, 10).unwrap().days().count(), 31);
    }

    #[test]
    fn grid_pads_to_monday_start_weeks() {
        // 1 October 2023 is a Sunday: six leading padding cells.
        let grid = month_grid(MonthKey::new(2023, 10).unwrap());
        assert_eq!(grid.len() % 7, 0);
        assert!(grid[..6].iter().all(Option::is_none));
        assert_eq!(grid[6], Some(day(2023, 10, 1)));
        assert_eq!(grid.iter().flatten().count(), 31);
        assert!(grid.last().unwrap().is_none());
    }

    #[test]
    fn holiday_wins_over_records() {
        let resolver = CalendarResolver::default();
        let sunday = day(2023, 10, 1);
        let records = vec![record(1, 1, sunday, AttendanceStatus::Present)];
        assert_eq!(resolver.resolve_day(sunday, SubjectId(1), &records), DayState::Holiday);
        assert_eq!(
            resolver.resolve_student_day(sunday, StudentId(1), SubjectId(1), &records),
            StudentDayState::Holiday
        );
    }

    #[test]
    fn completed_and_pending_days() {
        let resolver = CalendarResolver::default();
        let monday = day(2023, 10, 2);
        let tuesday = day(2023, 10, 3);
        let records = vec![record(7, 1, monday, AttendanceStatus::Absent)];
        assert_eq!(resolver.resolve_day(monday, SubjectId(1), &records), DayState::Completed);
        assert_eq!(resolver.resolve_day(tuesday, SubjectId(1), &records), DayState::Pending);
        // a record for another subject does not complete the day
        assert_eq!(resolver.resolve_day(monday, SubjectId(2), &records), DayState::Pending);
    }

    #[test]
    fn student_view_reports_recorded_status() {
        let resolver = CalendarResolver::default();
        let records = vec![
            record(1, 1, day(2023, 10, 2), AttendanceStatus::Present),
            record(1, 1, day(2023, 10, 3), AttendanceStatus::Absent),
            record(2, 1, day(2023, 10, 4), AttendanceStatus::Present),
        ];
        let s = |d| resolver.resolve_student_day(d, StudentId(1), SubjectId(1), &records);
        assert_eq!(s(day(2023, 10, 2)), StudentDayState::Present);
        assert_eq!(s(day(2023, 10, 3)), StudentDayState::Absent);
        assert_eq!(s(day(2023, 10, 4)), StudentDayState::NoRecord);
    }

    #[test]
    fn configured_holiday_is_respected() {
        let resolver = CalendarResolver::new(Weekday::Sat);
        assert!(resolver.is_holiday(day(2023, 10, 7)));
        assert!(!resolver.is_holiday(day(2023, 10, 8)));
    }

    #[test]
    fn month_views_leave_padding_unresolved() {
        let resolver = CalendarResolver::default();
        let month = MonthKey::new(2023, 10).unwrap();
        let records = vec![
            record(1, 1, day(2023, 10, 2), AttendanceStatus::Present),
            record(1, 1, day(2023, 9, 29), AttendanceStatus::Present),
        ];
        let cells = resolver.resolve_month(month, SubjectId(1), &records);
        assert_eq!(cells.len(), month_grid(month).len());
        assert!(cells[0].is_none());
        let resolved: Vec<_> = cells.iter().flatten().collect();
        assert_eq!(resolved.len(), 31);
        assert_eq!(resolved[0].state, DayState::Holiday);
        assert_eq!(resolved[1].state, DayState::Completed);
        assert_eq!(resolved[2].state, DayState::Pending);

        let student = resolver.resolve_student_month(month, StudentId(1), SubjectId(1), &records);
        let resolved: Vec<_> = student.iter().flatten().collect();
        assert_eq!(resolved[1].state, StudentDayState::Present);
        assert_eq!(resolved[2].state, StudentDayState::NoRecord);
    }
}
