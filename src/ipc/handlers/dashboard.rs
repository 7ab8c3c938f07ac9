use chrono::{Datelike, Duration, Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::ipc::error::respond;
use crate::ipc::handlers::attendance::{attendance_rate, student_records};
use crate::ipc::helpers::{full_name_sql, param_i64, query_json, STAMP_FORMAT};
use crate::ipc::types::{AppState, Request};
use crate::schedule;

/// Rows shown under "recent attendance" on the teacher dashboard.
const RECENT_ATTENDANCE_LIMIT: i64 = 50;

fn count<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> AppResult<i64> {
    Ok(conn.query_row(sql, params, |r| r.get(0))?)
}

fn admin_summary(conn: &Connection, now: NaiveDateTime) -> AppResult<Value> {
    let today = now.format("%Y-%m-%d").to_string();
    let since = (now - Duration::hours(24)).format(STAMP_FORMAT).to_string();
    let open_by_role = |role: &str| {
        count(
            conn,
            "SELECT COUNT(*) FROM login_logs WHERE logout_time IS NULL AND user_type = ?",
            [role],
        )
    };
    Ok(json!({
        "total_students": count(conn, "SELECT COUNT(*) FROM users WHERE user_type = 'student'", [])?,
        "total_teachers": count(conn, "SELECT COUNT(*) FROM users WHERE user_type = 'teacher'", [])?,
        "working_students": count(conn, "SELECT COUNT(*) FROM users WHERE user_type = 'working_student'", [])?,
        "recent_logins": count(conn, "SELECT COUNT(*) FROM login_logs WHERE login_time >= ?", [&since])?,
        "active_users_now": count(conn, "SELECT COUNT(*) FROM login_logs WHERE logout_time IS NULL", [])?,
        "students_logged_in": open_by_role("student")?,
        "teachers_logged_in": open_by_role("teacher")?,
        "working_students_logged_in": open_by_role("working_student")?,
        "today_logins": count(
            conn,
            "SELECT COUNT(*) FROM login_logs WHERE substr(login_time, 1, 10) = ?",
            [&today],
        )?,
        "today_new_users": count(
            conn,
            "SELECT COUNT(*) FROM users WHERE substr(created_at, 1, 10) = ?",
            [&today],
        )?,
        "locked_accounts": count(conn, "SELECT COUNT(*) FROM users WHERE account_lock = 1", [])?,
        "pending_feedback": count(conn, "SELECT COUNT(*) FROM feedback WHERE status = 'pending'", [])?,
    }))
}

fn teacher_summary(conn: &Connection, teacher: i64, now: NaiveDateTime) -> AppResult<Value> {
    let classes = query_json(
        conn,
        "SELECT c.id, c.subject_code, s.subject_name, c.descriptive_title, c.edp_code,
                c.schedule, c.room, c.semester, c.school_year,
                (SELECT COUNT(*) FROM classlist cl
                  WHERE cl.class_id = c.id AND cl.status = 'active') AS enrolled_count
         FROM classes c
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         WHERE c.teacher_user_id = ? AND c.is_active = 1 AND c.is_archived = 0
         ORDER BY c.subject_code, c.id",
        [teacher],
    )?;

    let weekday = now.weekday();
    let today_classes: Vec<Value> = classes
        .iter()
        .filter(|c| {
            c.get("schedule")
                .and_then(|v| v.as_str())
                .and_then(schedule::parse_schedule)
                .is_some_and(|s| s.meets_on(weekday))
        })
        .cloned()
        .collect();

    let recent = query_json(
        conn,
        &format!(
            "SELECT a.class_id, a.student_user_id, a.date, c.subject_code,
                    {name} AS student_name, a.time_in, a.status, a.remarks
             FROM attendance a
             JOIN classes c ON c.id = a.class_id
             JOIN users u ON u.id = a.student_user_id
             LEFT JOIN user_profiles p ON p.user_id = a.student_user_id
             WHERE c.teacher_user_id = ? AND a.is_archived = 0
             ORDER BY a.date DESC, a.time_in DESC
             LIMIT ?",
            name = full_name_sql("p", "u")
        ),
        (teacher, RECENT_ATTENDANCE_LIMIT),
    )?;

    let attended_since = |days: i64| {
        let since = (now.date() - Duration::days(days)).format("%Y-%m-%d").to_string();
        count(
            conn,
            "SELECT COUNT(*) FROM attendance a
             JOIN classes c ON c.id = a.class_id
             WHERE c.teacher_user_id = ? AND a.date >= ? AND a.status IN ('present', 'late')",
            (teacher, since),
        )
    };

    Ok(json!({
        "classes": classes,
        "attendance": recent,
        "total_attendance_week": attended_since(7)?,
        "total_attendance_month": attended_since(30)?,
        "today_classes": today_classes,
    }))
}

fn student_summary(conn: &Connection, user_id: i64, now: NaiveDateTime) -> AppResult<Value> {
    let today = now.format("%Y-%m-%d").to_string();
    let records = student_records(conn, user_id)?;
    let rate = attendance_rate(&records);
    let today_log = records
        .iter()
        .find(|r| r.get("date").and_then(|v| v.as_str()) == Some(today.as_str()))
        .cloned();

    let open_pc: Option<Option<String>> = conn
        .query_row(
            "SELECT pc_number FROM login_logs
             WHERE user_id = ? AND logout_time IS NULL
             ORDER BY login_time DESC, id DESC LIMIT 1",
            [user_id],
            |r| r.get(0),
        )
        .optional()?;

    Ok(json!({
        "attendance": records,
        "today_log": today_log,
        "attendance_rate": rate,
        "currently_logged_in": open_pc.is_some(),
        "current_pc_number": open_pc.flatten(),
        "enrolled_classes": count(
            conn,
            "SELECT COUNT(DISTINCT class_id) FROM classlist
             WHERE student_user_id = ? AND status = 'active'",
            [user_id],
        )?,
    }))
}

fn working_student_summary(conn: &Connection, now: NaiveDateTime) -> AppResult<Value> {
    let today = now.format("%Y-%m-%d").to_string();
    Ok(json!({
        "students_registered": count(conn, "SELECT COUNT(*) FROM users WHERE user_type = 'student'", [])?,
        "classlists_created": count(conn, "SELECT COUNT(*) FROM classlist", [])?,
        "pending_feedback": count(conn, "SELECT COUNT(*) FROM feedback WHERE status = 'pending'", [])?,
        "today_registrations": count(
            conn,
            "SELECT COUNT(*) FROM users
             WHERE user_type = 'student' AND substr(created_at, 1, 10) = ?",
            [&today],
        )?,
        "active_students_now": count(
            conn,
            "SELECT COUNT(*) FROM login_logs WHERE logout_time IS NULL AND user_type = 'student'",
            [],
        )?,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handled = matches!(
        req.method.as_str(),
        "dashboard.admin" | "dashboard.teacher" | "dashboard.student" | "dashboard.workingStudent"
    );
    if !handled {
        return None;
    }
    let now = Local::now().naive_local();
    let result = state.conn().and_then(|conn| match req.method.as_str() {
        "dashboard.admin" => admin_summary(conn, now),
        "dashboard.teacher" => {
            param_i64(&req.params, "userId").and_then(|id| teacher_summary(conn, id, now))
        }
        "dashboard.student" => {
            param_i64(&req.params, "userId").and_then(|id| student_summary(conn, id, now))
        }
        _ => working_student_summary(conn, now),
    });
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;

    #[test]
    fn admin_counts_reflect_open_sessions() {
        let dir = std::env::temp_dir().join(format!("labdesk-dash-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let conn = open_db(&dir).expect("open db");
        conn.execute_batch(
            "INSERT INTO users(id, username, password_hash, password_salt, user_type, created_at, account_lock)
               VALUES (1, 'S1', 'x', 'x', 'student', '2024-03-04 07:00:00', 0),
                      (2, 'T1', 'x', 'x', 'teacher', '2024-03-01 07:00:00', 1);
             INSERT INTO login_logs(user_id, user_type, pc_number, login_time, logout_time)
               VALUES (1, 'student', 'PC-01', '2024-03-04 08:00:00', NULL),
                      (2, 'teacher', 'PC-02', '2024-03-03 08:00:00', '2024-03-03 09:00:00');",
        )
        .expect("seed");

        let now = NaiveDateTime::parse_from_str("2024-03-04 12:00:00", STAMP_FORMAT).expect("now");
        let d = admin_summary(&conn, now).expect("summary");
        assert_eq!(d["total_students"], 1);
        assert_eq!(d["students_logged_in"], 1);
        assert_eq!(d["teachers_logged_in"], 0);
        assert_eq!(d["recent_logins"], 1);
        assert_eq!(d["today_new_users"], 1);
        assert_eq!(d["locked_accounts"], 1);

        let s = student_summary(&conn, 1, now).expect("student");
        assert_eq!(s["currently_logged_in"], true);
        assert_eq!(s["current_pc_number"], "PC-01");
        assert_eq!(s["attendance_rate"], 0.0);
        let _ = std::fs::remove_dir_all(dir);
    }
}
