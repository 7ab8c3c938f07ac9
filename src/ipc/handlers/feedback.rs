use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::export;
use crate::feedback_gate::FeedbackForm;
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    full_name_sql, opt_i64, opt_str, param_i64, param_i64_list, param_str, placeholders,
    query_json, windowed,
};
use crate::ipc::types::{AppState, Request};

fn feedback_select() -> String {
    format!(
        "SELECT f.id, f.student_user_id,
                COALESCE(sp.student_number, 'N/A') AS student_id_str,
                sp.first_name, sp.middle_name, sp.last_name,
                {student} AS student_name,
                f.pc_number, f.equipment_condition, f.monitor_condition,
                f.keyboard_condition, f.mouse_condition, f.comments, f.date_submitted,
                f.status, f.forwarded_by_user_id, f.forwarded_at, f.working_student_notes,
                CASE WHEN f.forwarded_by_user_id IS NULL THEN NULL ELSE {forwarder} END
                  AS forwarded_by_name
         FROM feedback f
         JOIN users su ON su.id = f.student_user_id
         LEFT JOIN user_profiles sp ON sp.user_id = f.student_user_id
         LEFT JOIN users fu ON fu.id = f.forwarded_by_user_id
         LEFT JOIN user_profiles fp ON fp.user_id = f.forwarded_by_user_id",
        student = full_name_sql("sp", "su"),
        forwarder = full_name_sql("fp", "fu"),
    )
}

fn feedback_by_status(conn: &Connection, status: &str) -> AppResult<Vec<Value>> {
    let sql = format!(
        "{select} WHERE f.status = ? ORDER BY f.date_submitted DESC, f.id DESC",
        select = feedback_select()
    );
    query_json(conn, &sql, [status])
}

fn handle_feedback_gate(_state: &mut AppState, req: &Request) -> AppResult<Value> {
    let form = req
        .params
        .get("form")
        .ok_or_else(|| AppError::bad_params("missing form"))?;
    let status = FeedbackForm::from_json(form)?.status();
    serde_json::to_value(status).map_err(|e| AppError::bad_params(e.to_string()))
}

fn handle_feedback_submit(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let user_id = opt_i64(&req.params, "userId")
        .or_else(|| state.session.as_ref().map(|s| s.user.id))
        .ok_or_else(|| AppError::bad_params("missing userId"))?;
    let pc = state.pc_number(
        opt_str(&req.params, "pcNumber").or_else(|| state.session.as_ref().map(|s| s.pc_number.clone())),
    );
    let submission = FeedbackForm::from_json(&req.params)?.submission()?;
    let conn = state.conn()?;

    conn.execute(
        "INSERT INTO feedback(student_user_id, pc_number, equipment_condition, monitor_condition,
            keyboard_condition, mouse_condition, comments, date_submitted, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending')",
        rusqlite::params![
            user_id,
            pc,
            submission.computer.as_str(),
            submission.monitor.as_str(),
            submission.keyboard.as_str(),
            submission.mouse.as_str(),
            submission.comments,
            db::now_stamp(),
        ],
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "feedback", e))?;
    let id = conn.last_insert_rowid();
    tracing::info!(feedback_id = id, user_id, pc = %pc, "equipment feedback saved");
    Ok(json!({ "feedbackId": id }))
}

fn handle_feedback_pending(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let rows = feedback_by_status(state.conn()?, "pending")?;
    windowed(&req.params, "feedback", rows)
}

fn handle_feedback_forwarded(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let rows = feedback_by_status(state.conn()?, "forwarded")?;
    windowed(&req.params, "feedback", rows)
}

fn handle_feedback_student(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let user_id = param_i64(&req.params, "userId")?;
    let sql = format!(
        "{select} WHERE f.student_user_id = ? ORDER BY f.date_submitted DESC, f.id DESC",
        select = feedback_select()
    );
    let rows = query_json(conn, &sql, [user_id])?;
    windowed(&req.params, "feedback", rows)
}

/// Only pending rows move; anything already forwarded is left alone.
pub(crate) fn forward_feedback(
    conn: &Connection,
    ids: &[i64],
    working_student: i64,
    notes: Option<String>,
) -> AppResult<usize> {
    if ids.is_empty() {
        return Err(AppError::bad_params("no feedback IDs provided"));
    }
    let sql = format!(
        "UPDATE feedback
         SET status = 'forwarded', forwarded_by_user_id = ?, forwarded_at = ?,
             working_student_notes = ?
         WHERE status = 'pending' AND id IN ({})",
        placeholders(ids.len())
    );
    let mut bind: Vec<rusqlite::types::Value> = vec![
        working_student.into(),
        db::now_stamp().into(),
        notes.map_or(rusqlite::types::Value::Null, Into::into),
    ];
    bind.extend(ids.iter().map(|&id| rusqlite::types::Value::Integer(id)));
    let forwarded = conn
        .execute(&sql, rusqlite::params_from_iter(bind))
        .map_err(|e| AppError::db_table("db_update_failed", "feedback", e))?;
    if forwarded == 0 {
        return Err(AppError::not_found(
            "no feedback items were forwarded (may already be forwarded or not found)",
        ));
    }
    Ok(forwarded)
}

fn handle_feedback_forward(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let ids = param_i64_list(&req.params, "feedbackIds")?;
    let working_student = param_i64(&req.params, "workingStudentId")?;
    let notes = opt_str(&req.params, "notes");
    let forwarded = forward_feedback(conn, &ids, working_student, notes)?;
    tracing::info!(forwarded, working_student, "feedback forwarded to admin");
    Ok(json!({ "forwarded": forwarded }))
}

fn handle_feedback_export_csv(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let out_path = PathBuf::from(param_str(&req.params, "outPath")?);
    let status = opt_str(&req.params, "status").unwrap_or_else(|| "forwarded".to_string());
    let rows = feedback_by_status(conn, &status)?;
    let written = export::write_csv(&out_path, export::FEEDBACK_COLUMNS, &rows)
        .map_err(|e| AppError::Export(format!("{e:#}")))?;
    tracing::info!(path = %out_path.display(), rows = written, "feedback exported");
    Ok(json!({ "path": out_path.to_string_lossy(), "rows": written }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "feedback.gate" => handle_feedback_gate(state, req),
        "feedback.submit" => handle_feedback_submit(state, req),
        "feedback.pending" => handle_feedback_pending(state, req),
        "feedback.forwarded" => handle_feedback_forwarded(state, req),
        "feedback.student" => handle_feedback_student(state, req),
        "feedback.forward" => handle_feedback_forward(state, req),
        "feedback.exportCsv" => handle_feedback_export_csv(state, req),
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
            "CREATE TABLE feedback(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'pending',
                forwarded_by_user_id INTEGER,
                forwarded_at TEXT,
                working_student_notes TEXT
             );
             INSERT INTO feedback(id, status) VALUES (1, 'pending'), (2, 'forwarded'), (3, 'pending');",
        )
        .expect("schema");
        conn
    }

    #[test]
    fn forwarding_touches_only_pending_rows() {
        let conn = seeded();
        let n = forward_feedback(&conn, &[1, 2, 3], 7, Some("checked".into())).expect("forward");
        assert_eq!(n, 2);
        let notes: Option<String> = conn
            .query_row("SELECT working_student_notes FROM feedback WHERE id = 2", [], |r| r.get(0))
            .expect("row");
        assert_eq!(notes, None);
    }

    #[test]
    fn forwarding_nothing_is_not_found() {
        let conn = seeded();
        let e = forward_feedback(&conn, &[2], 7, None).unwrap_err();
        assert_eq!(e.kind(), "not_found");
        assert_eq!(forward_feedback(&conn, &[], 7, None).unwrap_err().kind(), "bad_params");
    }
}
