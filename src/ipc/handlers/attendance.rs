use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::export;
use crate::ipc::error::respond;
use crate::ipc::helpers::{opt_i64, opt_str, param_i64, param_str, query_json, windowed, STAMP_FORMAT};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, LoginStatus};

pub const NOT_LOGGED_IN: &str = "Not yet logged in";
pub const STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::bad_params(format!("invalid date (expected YYYY-MM-DD): {}", raw)))
}

fn class_schedule(conn: &Connection, class_id: i64) -> AppResult<Option<String>> {
    conn.query_row("SELECT schedule FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, Option<String>>(0)
    })
    .optional()?
    .ok_or_else(|| AppError::not_found("class not found"))
}

fn active_enrollees(conn: &Connection, class_id: i64) -> AppResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT student_user_id FROM classlist
         WHERE class_id = ? AND status = 'active'
         ORDER BY student_user_id",
    )?;
    let ids = stmt
        .query_map([class_id], |r| r.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn touch_sheet(conn: &Connection, class_id: i64, date: &str, by: Option<i64>) -> AppResult<()> {
    let now = db::now_stamp();
    conn.execute(
        "INSERT INTO attendance_sheets(class_id, date, created_by, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, date) DO UPDATE SET updated_at = ?",
        (class_id, date, by, &now, &now),
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "attendance_sheets", e))?;
    Ok(())
}

/// Absent rows for every active enrollee that has none yet. Returns the
/// number of rows created.
pub(crate) fn initialize_sheet(
    conn: &Connection,
    class_id: i64,
    date: &str,
    recorded_by: Option<i64>,
) -> AppResult<usize> {
    class_schedule(conn, class_id)?;
    let tx = conn.unchecked_transaction()?;
    touch_sheet(&tx, class_id, date, recorded_by)?;
    let created = tx
        .execute(
            "INSERT OR IGNORE INTO attendance(class_id, student_user_id, date, status, remarks,
                recorded_by, created_at)
             SELECT cl.class_id, cl.student_user_id, ?1, 'absent', ?2, ?3, ?4
             FROM classlist cl
             WHERE cl.class_id = ?5 AND cl.status = 'active'",
            (date, NOT_LOGGED_IN, recorded_by, db::now_stamp(), class_id),
        )
        .map_err(|e| AppError::db_table("db_insert_failed", "attendance", e))?;
    tx.execute(
        "UPDATE attendance SET remarks = ?1
         WHERE class_id = ?2 AND date = ?3 AND time_in IS NULL
           AND (remarks IS NULL OR remarks = '')",
        (NOT_LOGGED_IN, class_id, date),
    )
    .map_err(|e| AppError::db_table("db_update_failed", "attendance", e))?;
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;
    Ok(created)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GenerateSummary {
    pub present: usize,
    pub late: usize,
    pub absent: usize,
}

impl GenerateSummary {
    fn total(&self) -> usize {
        self.present + self.late + self.absent
    }
}

struct FirstLogin {
    at: NaiveDateTime,
    logout: Option<NaiveDateTime>,
    pc: Option<String>,
}

fn first_login(conn: &Connection, user_id: i64, date: &str) -> AppResult<Option<FirstLogin>> {
    let row: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT login_time, logout_time, pc_number FROM login_logs
             WHERE user_id = ? AND substr(login_time, 1, 10) = ? AND login_status = 'success'
             ORDER BY login_time ASC, id ASC
             LIMIT 1",
            (user_id, date),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((login, logout, pc)) = row else {
        return Ok(None);
    };
    let Ok(at) = NaiveDateTime::parse_from_str(&login, STAMP_FORMAT) else {
        tracing::warn!(user_id, login = %login, "unparsable login time");
        return Ok(None);
    };
    Ok(Some(FirstLogin {
        at,
        logout: logout.and_then(|s| NaiveDateTime::parse_from_str(&s, STAMP_FORMAT).ok()),
        pc,
    }))
}

/// Rebuild a class's sheet for `date` from the day's first successful login
/// of each enrollee.
pub(crate) fn generate_sheet(
    conn: &Connection,
    class_id: i64,
    date: NaiveDate,
    recorded_by: Option<i64>,
    grace_minutes: i64,
) -> AppResult<GenerateSummary> {
    let raw = class_schedule(conn, class_id)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::bad_params("class schedule not set"))?;
    let sched = schedule::parse_schedule(&raw)
        .ok_or_else(|| AppError::bad_params(format!("failed to parse schedule: {}", raw)))?;

    let date_str = date.format("%Y-%m-%d").to_string();
    let now = db::now_stamp();
    let mut summary = GenerateSummary::default();

    let tx = conn.unchecked_transaction()?;
    touch_sheet(&tx, class_id, &date_str, recorded_by)?;
    for student in active_enrollees(&tx, class_id)? {
        let login = first_login(&tx, student, &date_str)?;
        let (status, time_in, time_out, pc, remarks) = match &login {
            Some(l) => {
                let status = sched.classify_login(l.at.time(), grace_minutes);
                match status {
                    LoginStatus::Present => summary.present += 1,
                    LoginStatus::Late => summary.late += 1,
                }
                (
                    status.as_str(),
                    Some(l.at.format("%H:%M:%S").to_string()),
                    l.logout.map(|t| t.format("%H:%M:%S").to_string()),
                    l.pc.clone(),
                    None,
                )
            }
            None => {
                summary.absent += 1;
                ("absent", None, None, None, Some(NOT_LOGGED_IN))
            }
        };

        // A login clears the placeholder remark but keeps a teacher's note.
        tx.execute(
            "INSERT INTO attendance(class_id, student_user_id, date, time_in, time_out, pc_number,
                status, remarks, recorded_by, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(class_id, student_user_id, date) DO UPDATE SET
               time_in = COALESCE(excluded.time_in, time_in),
               time_out = COALESCE(excluded.time_out, time_out),
               pc_number = COALESCE(excluded.pc_number, pc_number),
               status = excluded.status,
               remarks = CASE
                 WHEN excluded.time_in IS NOT NULL
                      AND (remarks IS NULL OR remarks = '' OR remarks = ?11) THEN NULL
                 WHEN excluded.time_in IS NOT NULL THEN remarks
                 WHEN excluded.remarks IS NOT NULL AND (remarks IS NULL OR remarks = '')
                   THEN excluded.remarks
                 ELSE remarks
               END,
               updated_at = excluded.created_at",
            rusqlite::params![
                class_id,
                student,
                date_str,
                time_in,
                time_out,
                pc,
                status,
                remarks,
                recorded_by,
                now,
                NOT_LOGGED_IN,
            ],
        )
        .map_err(|e| AppError::db_table("db_insert_failed", "attendance", e))?;
    }
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;
    Ok(summary)
}

/// Mark today's already-initialized rows present for every class whose
/// schedule window contains `now`. Returns the number of rows updated.
pub(crate) fn auto_record_on_login(
    conn: &Connection,
    user_id: i64,
    pc: &str,
    now: NaiveDateTime,
    grace_minutes: i64,
) -> AppResult<usize> {
    let date = now.format("%Y-%m-%d").to_string();
    let mut stmt = conn.prepare(
        "SELECT c.id, c.schedule
         FROM classlist cl
         JOIN classes c ON c.id = cl.class_id
         JOIN attendance a ON a.class_id = cl.class_id
                          AND a.student_user_id = cl.student_user_id
                          AND a.date = ?1
         WHERE cl.student_user_id = ?2 AND cl.status = 'active' AND c.is_active = 1
           AND a.time_in IS NULL",
    )?;
    let classes = stmt
        .query_map((&date, user_id), |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut updated = 0;
    for (class_id, raw) in classes {
        let Some(sched) = raw.as_deref().and_then(schedule::parse_schedule) else {
            continue;
        };
        if !sched.is_within(now) {
            continue;
        }
        let status = sched.classify_login(now.time(), grace_minutes);
        updated += conn
            .execute(
                "UPDATE attendance
                 SET time_in = ?, pc_number = ?, status = ?,
                     remarks = CASE WHEN remarks = ? THEN NULL ELSE remarks END,
                     updated_at = ?
                 WHERE class_id = ? AND student_user_id = ? AND date = ?",
                rusqlite::params![
                    now.format("%H:%M:%S").to_string(),
                    pc,
                    status.as_str(),
                    NOT_LOGGED_IN,
                    db::now_stamp(),
                    class_id,
                    user_id,
                    date,
                ],
            )
            .map_err(|e| AppError::db_table("db_update_failed", "attendance", e))?;
    }
    Ok(updated)
}

fn handle_attendance_initialize(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let date = parse_date(&param_str(&req.params, "date")?)?.format("%Y-%m-%d").to_string();
    let created = initialize_sheet(conn, class_id, &date, opt_i64(&req.params, "recordedBy"))?;
    tracing::info!(class_id, date = %date, created, "attendance initialized");
    Ok(json!({ "created": created }))
}

fn handle_attendance_generate(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let grace = state.config.late_grace_minutes;
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let date = parse_date(&param_str(&req.params, "date")?)?;
    let summary = generate_sheet(conn, class_id, date, opt_i64(&req.params, "recordedBy"), grace)?;
    tracing::info!(
        class_id,
        date = %date,
        present = summary.present,
        late = summary.late,
        absent = summary.absent,
        "attendance generated from login logs"
    );
    Ok(json!({
        "present": summary.present,
        "late": summary.late,
        "absent": summary.absent,
        "total": summary.total(),
    }))
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let date = parse_date(&param_str(&req.params, "date")?)?.format("%Y-%m-%d").to_string();
    class_schedule(conn, class_id)?;
    let rows = query_json(
        conn,
        "SELECT cl.class_id, cl.student_user_id, ?1 AS date,
                p.student_number AS student_code, p.first_name, p.middle_name, p.last_name,
                c.subject_code, s.subject_name,
                a.time_in, a.time_out, a.pc_number,
                COALESCE(a.status, '') AS status, a.remarks,
                COALESCE(a.is_archived, 0) AS is_archived
         FROM classlist cl
         JOIN classes c ON c.id = cl.class_id
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         LEFT JOIN user_profiles p ON p.user_id = cl.student_user_id
         LEFT JOIN attendance a ON a.class_id = cl.class_id
                               AND a.student_user_id = cl.student_user_id
                               AND a.date = ?1
         WHERE cl.class_id = ?2 AND cl.status = 'active'
         ORDER BY p.last_name, p.first_name, cl.student_user_id",
        (&date, class_id),
    )?;
    windowed(&req.params, "attendance", rows)
}

fn handle_attendance_update(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let p = &req.params;
    let class_id = param_i64(p, "classId")?;
    let student = param_i64(p, "studentUserId")?;
    let date = parse_date(&param_str(p, "date")?)?.format("%Y-%m-%d").to_string();
    let status = opt_str(p, "status").map(|s| s.to_lowercase());
    if let Some(s) = &status {
        if !STATUSES.contains(&s.as_str()) {
            return Err(AppError::bad_params(format!(
                "status must be one of present, absent, late, excused (got {})",
                s
            )));
        }
    }

    let now = db::now_stamp();
    conn.execute(
        "INSERT INTO attendance(class_id, student_user_id, date, time_in, time_out, pc_number,
            status, remarks, recorded_by, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, 'absent'), ?8, ?9, ?10)
         ON CONFLICT(class_id, student_user_id, date) DO UPDATE SET
           time_in = COALESCE(?4, time_in),
           time_out = COALESCE(?5, time_out),
           pc_number = COALESCE(?6, pc_number),
           status = COALESCE(?7, status),
           remarks = COALESCE(?8, remarks),
           updated_at = ?10",
        rusqlite::params![
            class_id,
            student,
            date,
            opt_str(p, "timeIn"),
            opt_str(p, "timeOut"),
            opt_str(p, "pcNumber"),
            status,
            opt_str(p, "remarks"),
            opt_i64(p, "recordedBy"),
            now,
        ],
    )
    .map_err(|e| AppError::db_table("db_update_failed", "attendance", e))?;
    Ok(json!({ "ok": true }))
}

fn handle_attendance_archive(state: &mut AppState, req: &Request, archived: bool) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let date = parse_date(&param_str(&req.params, "date")?)?.format("%Y-%m-%d").to_string();
    let changed = conn
        .execute(
            "UPDATE attendance SET is_archived = ?, updated_at = ?
             WHERE class_id = ? AND date = ?",
            (archived as i64, db::now_stamp(), class_id, &date),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "attendance", e))?;
    tracing::info!(class_id, date = %date, archived, records = changed, "attendance sheet archive flag set");
    Ok(json!({ "records": changed }))
}

fn handle_attendance_archived_sheets(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let teacher = param_i64(&req.params, "teacherUserId")?;
    let rows = query_json(
        conn,
        "SELECT a.class_id, a.date, c.subject_code, s.subject_name, c.edp_code, c.schedule,
                COUNT(*) AS student_count,
                SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) AS present_count,
                SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END) AS absent_count,
                SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END) AS late_count,
                SUM(CASE WHEN a.status = 'excused' THEN 1 ELSE 0 END) AS excused_count
         FROM attendance a
         JOIN classes c ON c.id = a.class_id
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         WHERE c.teacher_user_id = ? AND a.is_archived = 1
         GROUP BY a.class_id, a.date
         ORDER BY a.date DESC, c.subject_code",
        [teacher],
    )?;
    windowed(&req.params, "sheets", rows)
}

fn handle_attendance_export_csv(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let out_path = PathBuf::from(param_str(&req.params, "outPath")?);
    class_schedule(conn, class_id)?;

    let rows = query_json(
        conn,
        "SELECT a.date, p.student_number AS student_code, p.first_name, p.middle_name,
                p.last_name, c.subject_code || ' - ' || COALESCE(s.subject_name, '') AS subject,
                a.time_in, a.time_out, a.status, a.remarks
         FROM attendance a
         JOIN classes c ON c.id = a.class_id
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         LEFT JOIN user_profiles p ON p.user_id = a.student_user_id
         WHERE a.class_id = ?
         ORDER BY a.date DESC, p.last_name, p.first_name",
        [class_id],
    )?;
    let written = export::write_csv(&out_path, export::ATTENDANCE_COLUMNS, &rows)
        .map_err(|e| AppError::Export(format!("{e:#}")))?;
    tracing::info!(class_id, path = %out_path.display(), rows = written, "attendance exported");
    Ok(json!({ "path": out_path.to_string_lossy(), "rows": written }))
}

/// Share of records where the student showed up, as a percentage.
pub(crate) fn attendance_rate(rows: &[Value]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let attended = rows
        .iter()
        .filter(|r| matches!(r.get("status").and_then(|v| v.as_str()), Some("present" | "late")))
        .count();
    (attended as f64 / rows.len() as f64) * 100.0
}

pub(crate) fn student_records(conn: &Connection, user_id: i64) -> AppResult<Vec<Value>> {
    query_json(
        conn,
        "SELECT a.class_id, a.date, c.subject_code, s.subject_name, c.edp_code,
                a.time_in, a.time_out, a.pc_number, a.status, a.remarks
         FROM attendance a
         JOIN classes c ON c.id = a.class_id
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         WHERE a.student_user_id = ? AND a.is_archived = 0
         ORDER BY a.date DESC, c.subject_code",
        [user_id],
    )
}

fn handle_attendance_student(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let user_id = param_i64(&req.params, "userId")?;
    let rows = student_records(conn, user_id)?;
    let rate = attendance_rate(&rows);
    Ok(json!({ "attendance": rows, "attendanceRate": rate }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attendance.initialize" => handle_attendance_initialize(state, req),
        "attendance.generate" => handle_attendance_generate(state, req),
        "attendance.list" => handle_attendance_list(state, req),
        "attendance.update" => handle_attendance_update(state, req),
        "attendance.archiveSheet" => handle_attendance_archive(state, req, true),
        "attendance.unarchiveSheet" => handle_attendance_archive(state, req, false),
        "attendance.archivedSheets" => handle_attendance_archived_sheets(state, req),
        "attendance.exportCsv" => handle_attendance_export_csv(state, req),
        "attendance.student" => handle_attendance_student(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
