use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    full_name_sql, opt_bool, opt_i64, opt_str, param_i64, param_i64_list, param_str, query_json,
    query_one_json, windowed,
};
use crate::ipc::types::{AppState, Request};

/// Shared projection for class rows. Enrollment counts only active rows.
fn class_select() -> String {
    format!(
        "SELECT c.id, c.subject_code, s.subject_name, c.descriptive_title, c.edp_code,
                c.teacher_user_id, {teacher} AS teacher_name,
                c.schedule, c.room, c.year_level, c.section, c.semester, c.school_year,
                (SELECT COUNT(*) FROM classlist cl
                  WHERE cl.class_id = c.id AND cl.status = 'active') AS enrolled_count,
                c.is_active, c.is_archived, c.created_by_user_id, c.created_at
         FROM classes c
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         LEFT JOIN users tu ON tu.id = c.teacher_user_id
         LEFT JOIN user_profiles tp ON tp.user_id = c.teacher_user_id",
        teacher = full_name_sql("tp", "tu")
    )
}

fn require_class(conn: &Connection, class_id: i64) -> AppResult<()> {
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get(0))
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(AppError::not_found("class not found")),
    }
}

fn handle_subjects_list(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let subjects = query_json(
        conn,
        "SELECT subject_code, subject_name, description, created_at
         FROM subjects ORDER BY subject_code",
        [],
    )?;
    Ok(json!({ "subjects": subjects }))
}

fn handle_subjects_upsert(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let code = param_str(&req.params, "code")?;
    let name = param_str(&req.params, "name")?;
    let description = opt_str(&req.params, "description");
    conn.execute(
        "INSERT INTO subjects(subject_code, subject_name, description, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(subject_code) DO UPDATE SET
           subject_name = excluded.subject_name,
           description = excluded.description",
        (&code, &name, &description, db::now_stamp()),
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "subjects", e))?;
    Ok(json!({ "subjectCode": code }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let teacher = opt_i64(&req.params, "teacherUserId");
    let creator = opt_i64(&req.params, "createdBy");
    let student = opt_i64(&req.params, "studentUserId");

    let sql = format!(
        "{select}
         WHERE c.is_active = 1 AND c.is_archived = 0
           AND (?1 IS NULL OR c.teacher_user_id = ?1)
           AND (?2 IS NULL OR c.created_by_user_id = ?2)
           AND (?3 IS NULL OR EXISTS (
                 SELECT 1 FROM classlist cl
                 WHERE cl.class_id = c.id AND cl.student_user_id = ?3 AND cl.status = 'active'))
         ORDER BY c.subject_code, c.id",
        select = class_select()
    );
    let rows = query_json(conn, &sql, (teacher, creator, student))?;
    windowed(&req.params, "classes", rows)
}

/// A teacher's classes that already have attendance, each with the most
/// recent sheet date.
fn handle_classes_teacher_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let teacher = param_i64(&req.params, "teacherUserId")?;
    let sql = format!(
        "SELECT * FROM (
           SELECT x.*,
                  COALESCE(max(x.last_record, x.last_sheet), x.last_record, x.last_sheet)
                    AS latest_attendance_date
           FROM (
             SELECT k.*,
                    (SELECT MAX(a.date) FROM attendance a WHERE a.class_id = k.id) AS last_record,
                    (SELECT MAX(sh.date) FROM attendance_sheets sh WHERE sh.class_id = k.id) AS last_sheet
             FROM ({select}
                   WHERE c.teacher_user_id = ?1 AND c.is_active = 1 AND c.is_archived = 0) k
           ) x
         )
         WHERE latest_attendance_date IS NOT NULL
         ORDER BY subject_code, id",
        select = class_select()
    );
    let mut rows = query_json(conn, &sql, [teacher])?;
    for row in &mut rows {
        if let Some(obj) = row.as_object_mut() {
            obj.remove("last_record");
            obj.remove("last_sheet");
        }
    }
    windowed(&req.params, "classes", rows)
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let subject_code = param_str(&req.params, "subjectCode")?;
    let teacher_user_id = param_i64(&req.params, "teacherUserId")?;

    let subject: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE subject_code = ?",
            [&subject_code],
            |r| r.get(0),
        )
        .optional()?;
    if subject.is_none() {
        return Err(AppError::not_found(format!("subject not found: {}", subject_code)));
    }
    let teacher: Option<String> = conn
        .query_row(
            "SELECT user_type FROM users WHERE id = ?",
            [teacher_user_id],
            |r| r.get(0),
        )
        .optional()?;
    match teacher.as_deref() {
        Some("teacher") => {}
        Some(_) => return Err(AppError::bad_params("teacherUserId is not a teacher")),
        None => return Err(AppError::not_found("teacher not found")),
    }

    let p = &req.params;
    conn.execute(
        "INSERT INTO classes(subject_code, teacher_user_id, edp_code, schedule, room, year_level,
            section, semester, school_year, descriptive_title, is_active, is_archived,
            created_by_user_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)",
        rusqlite::params![
            subject_code,
            teacher_user_id,
            opt_str(p, "edpCode"),
            opt_str(p, "schedule"),
            opt_str(p, "room"),
            opt_str(p, "yearLevel"),
            opt_str(p, "section"),
            opt_str(p, "semester"),
            opt_str(p, "schoolYear"),
            opt_str(p, "descriptiveTitle"),
            opt_i64(p, "createdBy"),
            db::now_stamp(),
        ],
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "classes", e))?;
    let class_id = conn.last_insert_rowid();
    tracing::info!(class_id, subject = %subject_code, "class created");
    Ok(json!({ "classId": class_id }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    require_class(conn, class_id)?;

    let p = &req.params;
    // Absent keys keep their stored value.
    conn.execute(
        "UPDATE classes SET
           schedule = COALESCE(?, schedule),
           room = COALESCE(?, room),
           year_level = COALESCE(?, year_level),
           section = COALESCE(?, section),
           semester = COALESCE(?, semester),
           school_year = COALESCE(?, school_year),
           descriptive_title = COALESCE(?, descriptive_title),
           edp_code = COALESCE(?, edp_code),
           is_active = COALESCE(?, is_active)
         WHERE id = ?",
        rusqlite::params![
            opt_str(p, "schedule"),
            opt_str(p, "room"),
            opt_str(p, "yearLevel"),
            opt_str(p, "section"),
            opt_str(p, "semester"),
            opt_str(p, "schoolYear"),
            opt_str(p, "descriptiveTitle"),
            opt_str(p, "edpCode"),
            opt_bool(p, "isActive").map(i64::from),
            class_id,
        ],
    )
    .map_err(|e| AppError::db_table("db_update_failed", "classes", e))?;
    Ok(json!({ "ok": true }))
}

fn set_class_flag(conn: &Connection, class_id: i64, sql: &str) -> AppResult<()> {
    let changed = conn
        .execute(sql, [class_id])
        .map_err(|e| AppError::db_table("db_update_failed", "classes", e))?;
    if changed == 0 {
        return Err(AppError::not_found("class not found"));
    }
    Ok(())
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    set_class_flag(conn, class_id, "UPDATE classes SET is_active = 0 WHERE id = ?")?;
    tracing::info!(class_id, "class deactivated");
    Ok(json!({ "ok": true }))
}

fn handle_classes_archive(state: &mut AppState, req: &Request, archived: bool) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let sql = if archived {
        "UPDATE classes SET is_archived = 1 WHERE id = ?"
    } else {
        "UPDATE classes SET is_archived = 0 WHERE id = ?"
    };
    set_class_flag(conn, class_id, sql)?;
    tracing::info!(class_id, archived, "class archive flag set");
    Ok(json!({ "ok": true }))
}

fn handle_classes_archived(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let teacher = param_i64(&req.params, "teacherUserId")?;
    let sql = format!(
        "{select}
         WHERE c.is_archived = 1 AND c.teacher_user_id = ?
         ORDER BY c.created_at DESC, c.id DESC",
        select = class_select()
    );
    let rows = query_json(conn, &sql, [teacher])?;
    windowed(&req.params, "classes", rows)
}

fn classes_by_edp(conn: &Connection, edp_code: &str) -> AppResult<Vec<Value>> {
    let sql = format!(
        "{select}
         WHERE c.edp_code = ? AND c.is_active = 1 AND c.is_archived = 0
         ORDER BY c.created_at DESC, c.id DESC",
        select = class_select()
    );
    query_json(conn, &sql, [edp_code])
}

fn handle_classes_by_edp(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let edp = param_str(&req.params, "edpCode")?;
    Ok(json!({ "classes": classes_by_edp(conn, &edp)? }))
}

fn handle_classes_students(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    require_class(conn, class_id)?;
    let rows = query_json(
        conn,
        "SELECT cl.class_id, cl.student_user_id, p.student_number, p.first_name, p.middle_name,
                p.last_name, p.email, p.contact_number, p.year_level, p.section,
                cl.status, substr(cl.enrollment_date, 1, 10) AS enrollment_date,
                s.subject_name AS course
         FROM classlist cl
         JOIN classes c ON c.id = cl.class_id
         LEFT JOIN subjects s ON s.subject_code = c.subject_code
         LEFT JOIN user_profiles p ON p.user_id = cl.student_user_id
         WHERE cl.class_id = ? AND cl.status = 'active'
         ORDER BY p.last_name, p.first_name, cl.student_user_id",
        [class_id],
    )?;
    windowed(&req.params, "students", rows)
}

fn handle_classes_available(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    require_class(conn, class_id)?;
    let rows = query_json(
        conn,
        "SELECT u.id, p.student_number, p.first_name, p.middle_name, p.last_name,
                p.year_level, p.section
         FROM users u
         LEFT JOIN user_profiles p ON p.user_id = u.id
         WHERE u.user_type IN ('student', 'working_student')
           AND u.account_status = 'active'
           AND NOT EXISTS (
             SELECT 1 FROM classlist cl
             WHERE cl.student_user_id = u.id AND cl.class_id = ? AND cl.status = 'active')
         ORDER BY p.last_name, p.first_name, u.id",
        [class_id],
    )?;
    windowed(&req.params, "students", rows)
}

/// Every active student account, flagged when already enrolled in the class.
fn handle_classes_enrollment_candidates(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    require_class(conn, class_id)?;
    let rows = query_json(
        conn,
        "SELECT u.id, p.student_number, p.first_name, p.middle_name, p.last_name,
                p.year_level, p.section,
                EXISTS (
                  SELECT 1 FROM classlist cl
                  WHERE cl.student_user_id = u.id AND cl.class_id = ? AND cl.status = 'active'
                ) AS is_enrolled
         FROM users u
         LEFT JOIN user_profiles p ON p.user_id = u.id
         WHERE u.user_type IN ('student', 'working_student')
           AND u.account_status = 'active'
         ORDER BY p.last_name, p.first_name, u.id",
        [class_id],
    )?;
    windowed(&req.params, "students", rows)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct EnrollOutcome {
    pub enrolled: usize,
    pub reactivated: usize,
    pub skipped: usize,
}

/// Enroll students in one transaction. Dropped rows come back to active,
/// already-active rows are skipped.
pub(crate) fn enroll_students(
    conn: &Connection,
    class_id: i64,
    student_ids: &[i64],
    enrolled_by: Option<i64>,
) -> AppResult<EnrollOutcome> {
    let mut outcome = EnrollOutcome::default();
    let now = db::now_stamp();
    let tx = conn.unchecked_transaction()?;
    for &student in student_ids {
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM classlist WHERE class_id = ? AND student_user_id = ?",
                (class_id, student),
                |r| r.get(0),
            )
            .optional()?;
        match status.as_deref() {
            Some("active") => outcome.skipped += 1,
            Some(_) => {
                tx.execute(
                    "UPDATE classlist SET status = 'active', enrolled_by = ?, enrollment_date = ?
                     WHERE class_id = ? AND student_user_id = ?",
                    (enrolled_by, &now, class_id, student),
                )
                .map_err(|e| AppError::db_table("db_update_failed", "classlist", e))?;
                outcome.reactivated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO classlist(class_id, student_user_id, enrolled_by, enrollment_date, status)
                     VALUES(?, ?, ?, ?, 'active')",
                    (class_id, student, enrolled_by, &now),
                )
                .map_err(|e| AppError::db_table("db_insert_failed", "classlist", e))?;
                outcome.enrolled += 1;
            }
        }
    }
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;
    Ok(outcome)
}

fn handle_classes_enroll(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let students = param_i64_list(&req.params, "studentUserIds")?;
    let enrolled_by = opt_i64(&req.params, "enrolledBy");
    require_class(conn, class_id)?;

    let out = enroll_students(conn, class_id, &students, enrolled_by)?;
    tracing::info!(
        class_id,
        enrolled = out.enrolled,
        reactivated = out.reactivated,
        skipped = out.skipped,
        "students enrolled"
    );
    Ok(json!({
        "enrolled": out.enrolled,
        "reactivated": out.reactivated,
        "skipped": out.skipped,
    }))
}

fn handle_classes_unenroll(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let class_id = param_i64(&req.params, "classId")?;
    let student = param_i64(&req.params, "studentUserId")?;
    let changed = conn
        .execute(
            "UPDATE classlist SET status = 'dropped'
             WHERE class_id = ? AND student_user_id = ? AND status = 'active'",
            (class_id, student),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "classlist", e))?;
    if changed == 0 {
        return Err(AppError::not_found("student is not enrolled in this class"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_classes_join(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let student = param_i64(&req.params, "studentUserId")?;
    let edp = param_str(&req.params, "edpCode")?;

    let classes = classes_by_edp(conn, &edp)?;
    let ids: Vec<i64> = classes
        .iter()
        .filter_map(|c| c.get("id").and_then(|v| v.as_i64()))
        .collect();
    let Some(&first) = ids.first() else {
        return Err(AppError::not_found(format!("no classes found for EDP code: {}", edp)));
    };

    for &class_id in &ids {
        let enrolled = query_one_json(
            conn,
            "SELECT 1 AS hit FROM classlist
             WHERE class_id = ? AND student_user_id = ? AND status = 'active'",
            (class_id, student),
        )?;
        if enrolled.is_some() {
            return Ok(json!({ "classId": class_id, "alreadyEnrolled": true }));
        }
    }

    enroll_students(conn, first, &[student], Some(student))?;
    tracing::info!(class_id = first, student, "student joined class by EDP code");
    Ok(json!({ "classId": first, "alreadyEnrolled": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.upsert" => handle_subjects_upsert(state, req),
        "classes.list" => handle_classes_list(state, req),
        "classes.teacherList" => handle_classes_teacher_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        "classes.archive" => handle_classes_archive(state, req, true),
        "classes.unarchive" => handle_classes_archive(state, req, false),
        "classes.archived" => handle_classes_archived(state, req),
        "classes.byEdpCode" => handle_classes_by_edp(state, req),
        "classes.students" => handle_classes_students(state, req),
        "classes.available" => handle_classes_available(state, req),
        "classes.enrollmentCandidates" => handle_classes_enrollment_candidates(state, req),
        "classes.enroll" => handle_classes_enroll(state, req),
        "classes.unenroll" => handle_classes_unenroll(state, req),
        "classes.join" => handle_classes_join(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("memory db");
        conn.execute_batch(
            "CREATE TABLE classlist(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                class_id INTEGER NOT NULL,
                student_user_id INTEGER NOT NULL,
                enrolled_by INTEGER,
                enrollment_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                UNIQUE(class_id, student_user_id)
             );
             INSERT INTO classlist(class_id, student_user_id, enrollment_date, status)
               VALUES(1, 10, '2024-01-01', 'active'), (1, 11, '2024-01-01', 'dropped');",
        )
        .expect("schema");
        conn
    }

    #[test]
    fn enrolling_reactivates_dropped_and_skips_active() {
        let conn = seeded();
        let out = enroll_students(&conn, 1, &[10, 11, 12], Some(99)).expect("enroll");
        assert_eq!(
            out,
            EnrollOutcome {
                enrolled: 1,
                reactivated: 1,
                skipped: 1
            }
        );
        let active: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM classlist WHERE class_id = 1 AND status = 'active'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(active, 3);
    }
}
