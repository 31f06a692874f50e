//! CSV export of a subject's attendance for one day.

use crate::db::MarkingSheetRow;

pub const CSV_HEADER: &str = "Roll No,Student Name,Status";
pub const NOT_MARKED: &str = "not marked";

/// Quote a field when it contains a comma, a quote or a line break.
fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One line per enrolled student, in sheet order, after the header. Ends with a newline.
pub fn attendance_csv(rows: &[MarkingSheetRow]) -> String {
    let mut out = String::with_capacity(32 * (rows.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for row in rows {
        let status = row.status.map_or(NOT_MARKED, |s| s.as_str());
        out.push_str(&csv_escape(&row.roll_no));
        out.push(',');
        out.push_str(&csv_escape(&row.name));
        out.push(',');
        out.push_str(status);
        out.push('\n');
    }
    out
}

/// `attendance_{code}_{date}.csv`
pub fn export_file_name(subject_code: &str, date: chrono::NaiveDate) -> String {
    let code: String = subject_code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("attendance_{}_{}.csv", code, date.format("%Y-%m-%d"))
}
