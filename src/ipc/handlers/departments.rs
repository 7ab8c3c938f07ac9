use rusqlite::OptionalExtension;
use serde_json::{json, Value};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{opt_bool, opt_str, param_str, query_json, windowed};
use crate::ipc::types::{AppState, Request};

fn handle_departments_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let rows = query_json(
        conn,
        "SELECT d.department_code, d.department_name, d.description, d.is_active, d.created_at,
                (SELECT COUNT(*) FROM user_profiles p
                  JOIN users u ON u.id = p.user_id
                  WHERE p.department_code = d.department_code AND u.user_type = 'teacher') AS teacher_count
         FROM departments d
         ORDER BY d.department_code",
        [],
    )?;
    windowed(&req.params, "departments", rows)
}

fn handle_departments_create(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let code = param_str(&req.params, "code")?;
    let name = param_str(&req.params, "name")?;
    let description = opt_str(&req.params, "description");

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM departments WHERE department_code = ?",
            [&code],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Err(AppError::conflict(format!("department already exists: {}", code)));
    }

    conn.execute(
        "INSERT INTO departments(department_code, department_name, description, is_active, created_at)
         VALUES(?, ?, ?, 1, ?)",
        (&code, &name, &description, db::now_stamp()),
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "departments", e))?;
    tracing::info!(code = %code, "department created");
    Ok(json!({ "departmentCode": code }))
}

fn handle_departments_update(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let old_code = param_str(&req.params, "oldCode")?;
    let code = opt_str(&req.params, "code").unwrap_or_else(|| old_code.clone());
    let name = param_str(&req.params, "name")?;
    let description = opt_str(&req.params, "description");
    let is_active = opt_bool(&req.params, "isActive").unwrap_or(true);

    if code != old_code {
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM departments WHERE department_code = ?",
                [&code],
                |r| r.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(AppError::conflict(format!("department already exists: {}", code)));
        }
    }

    let tx = conn.unchecked_transaction()?;
    let changed = tx
        .execute(
            "UPDATE departments
             SET department_code = ?, department_name = ?, description = ?, is_active = ?
             WHERE department_code = ?",
            (&code, &name, &description, is_active as i64, &old_code),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "departments", e))?;
    if changed == 0 {
        return Err(AppError::not_found(format!("department not found: {}", old_code)));
    }
    if code != old_code {
        // Profiles store the code by value.
        tx.execute(
            "UPDATE user_profiles SET department_code = ? WHERE department_code = ?",
            (&code, &old_code),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "user_profiles", e))?;
    }
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;

    tracing::info!(from = %old_code, to = %code, "department updated");
    Ok(json!({ "departmentCode": code }))
}

fn handle_departments_delete(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let code = param_str(&req.params, "code")?;

    let teachers: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_profiles p
         JOIN users u ON u.id = p.user_id
         WHERE p.department_code = ? AND u.user_type = 'teacher'",
        [&code],
        |r| r.get(0),
    )?;
    if teachers > 0 {
        return Err(AppError::conflict(format!(
            "cannot delete department: {} teacher(s) are assigned to this department",
            teachers
        )));
    }

    let deleted = conn
        .execute("DELETE FROM departments WHERE department_code = ?", [&code])
        .map_err(|e| AppError::db_table("db_delete_failed", "departments", e))?;
    if deleted == 0 {
        return Err(AppError::not_found(format!("department not found: {}", code)));
    }
    tracing::info!(code = %code, "department deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "departments.list" => handle_departments_list(state, req),
        "departments.create" => handle_departments_create(state, req),
        "departments.update" => handle_departments_update(state, req),
        "departments.delete" => handle_departments_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
