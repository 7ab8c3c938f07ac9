//! CSV exports of list results. Each export is a fixed column layout over
//! the JSON rows the list methods already return.

use anyhow::Context;
use std::path::Path;

use crate::view::Tabular;

/// `(header, row key)` pairs in output order.
pub type Columns = &'static [(&'static str, &'static str)];

pub const LOG_COLUMNS: Columns = &[
    ("ID", "id"),
    ("User ID", "user_id_number"),
    ("Full Name", "user_name"),
    ("User Type", "user_type"),
    ("PC Number", "pc_number"),
    ("Login Time", "login_time"),
    ("Logout Time", "logout_time"),
    ("Duration", "duration"),
];

pub const FEEDBACK_COLUMNS: Columns = &[
    ("ID", "id"),
    ("Student Name", "student_name"),
    ("Student ID", "student_id_str"),
    ("PC Number", "pc_number"),
    ("Equipment", "equipment_condition"),
    ("Monitor", "monitor_condition"),
    ("Keyboard", "keyboard_condition"),
    ("Mouse", "mouse_condition"),
    ("Comments", "comments"),
    ("Date", "date_submitted"),
];

pub const ATTENDANCE_COLUMNS: Columns = &[
    ("Date", "date"),
    ("Student ID", "student_code"),
    ("First Name", "first_name"),
    ("Middle Name", "middle_name"),
    ("Last Name", "last_name"),
    ("Subject", "subject"),
    ("Time In", "time_in"),
    ("Time Out", "time_out"),
    ("Status", "status"),
    ("Remarks", "remarks"),
];

pub fn record<T: Tabular>(row: &T, columns: Columns) -> Vec<String> {
    columns
        .iter()
        .map(|(_, key)| row.cell(key).unwrap_or_default())
        .collect()
}

/// Writes header plus one record per row. Returns the number of data rows.
pub fn write_csv<T: Tabular>(out_path: &Path, columns: Columns, rows: &[T]) -> anyhow::Result<usize> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    let mut wtr = csv::Writer::from_path(out_path)
        .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
    wtr.write_record(columns.iter().map(|(header, _)| *header))
        .context("failed to write csv header")?;
    for row in rows {
        wtr.write_record(record(row, columns))
            .context("failed to write csv row")?;
    }
    wtr.flush().context("failed to flush csv")?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn missing_cells_become_empty_fields() {
        let row = json!({ "id": 3, "user_name": "Cruz, Ana", "logout_time": null });
        let rec = record(&row, LOG_COLUMNS);
        assert_eq!(rec.len(), LOG_COLUMNS.len());
        assert_eq!(rec[0], "3");
        assert_eq!(rec[2], "Cruz, Ana");
        assert_eq!(rec[6], "");
    }

    #[test]
    fn writes_header_and_quoted_rows() {
        let dir = std::env::temp_dir().join(format!(
            "labdesk-export-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let out = dir.join("feedback.csv");
        let rows = vec![json!({
            "id": 1,
            "student_name": "Cruz, Ana",
            "comments": "Mouse: no click; Additional: ok"
        })];
        let n = write_csv(&out, FEEDBACK_COLUMNS, &rows).expect("write");
        assert_eq!(n, 1);
        let text = std::fs::read_to_string(&out).expect("read back");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("ID,Student Name,Student ID,PC Number,Equipment,Monitor,Keyboard,Mouse,Comments,Date")
        );
        assert_eq!(
            lines.next(),
            Some("1,\"Cruz, Ana\",,,,,,,Mouse: no click; Additional: ok,")
        );
        let _ = std::fs::remove_dir_all(dir);
    }
}
