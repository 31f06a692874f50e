//! Weekly timetable grouped by teaching day.

use crate::db::ScheduledSlot;
use chrono::Weekday;
use serde::Serialize;

/// Teaching days in display order.
pub const TEACHING_DAYS: [Weekday; 6] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScheduleDay {
    pub day: Weekday,
    pub slots: Vec<ScheduledSlot>,
}

/// `1 = Monday` through `6 = Saturday`. Sunday is never a timetable day.
pub fn weekday_from_number(day: u8) -> Option<Weekday> {
    match day {
        1..=6 => Weekday::try_from(day - 1).ok(),
        _ => None,
    }
}

/// One entry per teaching day, excluding `weekly_holiday`; slots sorted by start time.
/// Days without classes are kept with an empty slot list.
pub fn weekly_schedule(slots: &[ScheduledSlot], weekly_holiday: Weekday) -> Vec<ScheduleDay> {
    TEACHING_DAYS
        .iter()
        .filter(|day| **day != weekly_holiday)
        .map(|day| {
            let mut day_slots: Vec<ScheduledSlot> = slots
                .iter()
                .filter(|s| weekday_from_number(s.day_of_week) == Some(*day))
                .cloned()
                .collect();
            day_slots.sort_by_key(|s| (s.start_time, s.timetable_id));
            ScheduleDay {
                day: *day,
                slots: day_slots,
            }
        })
        .collect()
}
