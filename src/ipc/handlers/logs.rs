use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::export;
use crate::grouping::{group_by_date, GroupedView};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    full_name_sql, opt_bool, opt_i64, opt_str, param_i64, param_i64_list, param_str,
    placeholders, query_json, windowed, with_durations,
};
use crate::ipc::types::{AppState, Request};
use crate::view::PageSize;

/// Most recent rows returned by `logs.user`.
const USER_LOG_LIMIT: i64 = 100;

fn log_select() -> String {
    format!(
        "SELECT ll.id, ll.user_id, COALESCE(ll.user_type, u.user_type, 'unknown') AS user_type,
                ll.pc_number, ll.login_time, ll.logout_time, ll.logout_reason, ll.login_status,
                ll.is_archived, ll.archived_at, ll.archived_by_user_id,
                {name} AS user_name,
                COALESCE(p.student_number, p.employee_number, u.username) AS user_id_number
         FROM login_logs ll
         JOIN users u ON u.id = ll.user_id
         LEFT JOIN user_profiles p ON p.user_id = ll.user_id",
        name = full_name_sql("p", "u")
    )
}

fn fetch_logs<P: rusqlite::Params>(conn: &Connection, filter: &str, params: P) -> AppResult<Vec<Value>> {
    let sql = format!(
        "{select} WHERE {filter} ORDER BY ll.login_time DESC, ll.id DESC",
        select = log_select()
    );
    Ok(with_durations(query_json(conn, &sql, params)?))
}

fn handle_logs_today(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let rows = fetch_logs(
        conn,
        "ll.is_archived = 0 AND substr(ll.login_time, 1, 10) = ?",
        [db::today()],
    )?;
    windowed(&req.params, "logs", rows)
}

fn handle_logs_all(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let start = opt_str(&req.params, "startDate");
    let end = opt_str(&req.params, "endDate");
    let rows = fetch_logs(
        conn,
        "ll.is_archived = 0
         AND (?1 IS NULL OR substr(ll.login_time, 1, 10) >= ?1)
         AND (?2 IS NULL OR substr(ll.login_time, 1, 10) <= ?2)",
        (start, end),
    )?;
    windowed(&req.params, "logs", rows)
}

fn handle_logs_user(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let user_id = param_i64(&req.params, "userId")?;
    let sql = format!(
        "{select} WHERE ll.user_id = ? ORDER BY ll.login_time DESC, ll.id DESC LIMIT ?",
        select = log_select()
    );
    let rows = with_durations(query_json(conn, &sql, (user_id, USER_LOG_LIMIT))?);
    windowed(&req.params, "logs", rows)
}

fn handle_logs_dates(state: &mut AppState, _req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT substr(login_time, 1, 10) AS log_date
         FROM login_logs WHERE is_archived = 0
         ORDER BY log_date DESC",
    )?;
    let dates = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "dates": dates }))
}

fn handle_logs_archive_by_date(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let date = param_str(&req.params, "date")?;
    let actor = opt_i64(&req.params, "actorId");
    let archived = conn
        .execute(
            "UPDATE login_logs SET is_archived = 1, archived_at = ?, archived_by_user_id = ?
             WHERE substr(login_time, 1, 10) = ? AND is_archived = 0",
            (db::now_stamp(), actor, &date),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "login_logs", e))?;
    tracing::info!(date = %date, archived, "login logs archived");
    Ok(json!({ "archived": archived }))
}

fn handle_logs_archive_selected(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let ids = param_i64_list(&req.params, "logIds")?;
    if ids.is_empty() {
        return Ok(json!({ "archived": 0 }));
    }
    let actor = opt_i64(&req.params, "actorId");
    let sql = format!(
        "UPDATE login_logs SET is_archived = 1, archived_at = ?, archived_by_user_id = ?
         WHERE is_archived = 0 AND id IN ({})",
        placeholders(ids.len())
    );
    let mut bind: Vec<rusqlite::types::Value> = vec![
        db::now_stamp().into(),
        actor.map_or(rusqlite::types::Value::Null, Into::into),
    ];
    bind.extend(ids.iter().map(|&id| rusqlite::types::Value::Integer(id)));
    let archived = conn
        .execute(&sql, rusqlite::params_from_iter(bind))
        .map_err(|e| AppError::db_table("db_update_failed", "login_logs", e))?;
    tracing::info!(requested = ids.len(), archived, "selected login logs archived");
    Ok(json!({ "archived": archived }))
}

fn handle_logs_unarchive_by_date(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let date = param_str(&req.params, "date")?;
    let restored = conn
        .execute(
            "UPDATE login_logs SET is_archived = 0, archived_at = NULL, archived_by_user_id = NULL
             WHERE substr(login_time, 1, 10) = ? AND is_archived = 1",
            [&date],
        )
        .map_err(|e| AppError::db_table("db_update_failed", "login_logs", e))?;
    Ok(json!({ "restored": restored }))
}

fn handle_logs_unarchive_selected(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let ids = param_i64_list(&req.params, "logIds")?;
    if ids.is_empty() {
        return Ok(json!({ "restored": 0 }));
    }
    let sql = format!(
        "UPDATE login_logs SET is_archived = 0, archived_at = NULL, archived_by_user_id = NULL
         WHERE is_archived = 1 AND id IN ({})",
        placeholders(ids.len())
    );
    let restored = conn
        .execute(&sql, rusqlite::params_from_iter(ids.iter()))
        .map_err(|e| AppError::db_table("db_update_failed", "login_logs", e))?;
    Ok(json!({ "restored": restored }))
}

fn handle_logs_archived_sheets(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let rows = query_json(
        conn,
        "SELECT substr(ll.login_time, 1, 10) AS log_date,
                COUNT(*) AS total_logins,
                SUM(CASE WHEN COALESCE(ll.user_type, u.user_type) = 'student' THEN 1 ELSE 0 END) AS student_count,
                SUM(CASE WHEN COALESCE(ll.user_type, u.user_type) = 'teacher' THEN 1 ELSE 0 END) AS teacher_count,
                SUM(CASE WHEN COALESCE(ll.user_type, u.user_type) = 'admin' THEN 1 ELSE 0 END) AS admin_count,
                SUM(CASE WHEN COALESCE(ll.user_type, u.user_type) = 'working_student' THEN 1 ELSE 0 END) AS working_student_count,
                COUNT(DISTINCT ll.pc_number) AS unique_pcs
         FROM login_logs ll
         JOIN users u ON u.id = ll.user_id
         WHERE ll.is_archived = 1
         GROUP BY log_date
         ORDER BY log_date DESC",
        [],
    )?;
    windowed(&req.params, "sheets", rows)
}

fn archived_logs(conn: &Connection, date: Option<&str>) -> AppResult<Vec<Value>> {
    fetch_logs(
        conn,
        "ll.is_archived = 1 AND (?1 IS NULL OR substr(ll.login_time, 1, 10) = ?1)",
        [date],
    )
}

fn handle_logs_archived_by_date(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let date = param_str(&req.params, "date")?;
    let rows = archived_logs(conn, Some(&date))?;
    windowed(&req.params, "logs", rows)
}

fn page_size_param(params: &Value, key: &str) -> AppResult<PageSize> {
    match params.get(key).and_then(|v| v.as_u64()) {
        Some(n) => Ok(PageSize::try_from(n)?),
        None => Ok(PageSize::Ten),
    }
}

/// Archived logs grouped by day. `groupPage` pages over days, `rowPages`
/// maps a day to the page shown inside it.
fn handle_logs_archived_grouped(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let p = &req.params;
    let mut view = GroupedView::new(page_size_param(p, "groupSize")?, page_size_param(p, "rowSize")?);
    if let Some(page) = p.get("groupPage").and_then(|v| v.as_u64()) {
        view.set_group_page(page as usize);
    }
    if let Some(pages) = p.get("rowPages").and_then(|v| v.as_object()) {
        for (date, page) in pages {
            if let Some(page) = page.as_u64() {
                view.set_row_page(date.clone(), page as usize);
            }
        }
    }

    let rows = archived_logs(conn, None)?;
    let groups = group_by_date(&rows, "login_time");
    serde_json::to_value(view.window(&groups)).map_err(|e| AppError::bad_params(e.to_string()))
}

fn handle_logs_export_csv(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let out_path = PathBuf::from(param_str(&req.params, "outPath")?);
    let archived = opt_bool(&req.params, "archived").unwrap_or(false);
    let date = opt_str(&req.params, "date");

    let rows = fetch_logs(
        conn,
        "ll.is_archived = ?1 AND (?2 IS NULL OR substr(ll.login_time, 1, 10) = ?2)",
        (archived as i64, date),
    )?;
    if rows.is_empty() {
        return Err(AppError::Export("no logs to export".into()));
    }
    let written = export::write_csv(&out_path, export::LOG_COLUMNS, &rows)
        .map_err(|e| AppError::Export(format!("{e:#}")))?;
    tracing::info!(path = %out_path.display(), rows = written, archived, "login logs exported");
    Ok(json!({ "path": out_path.to_string_lossy(), "rows": written }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "logs.today" => handle_logs_today(state, req),
        "logs.all" => handle_logs_all(state, req),
        "logs.user" => handle_logs_user(state, req),
        "logs.dates" => handle_logs_dates(state, req),
        "logs.archiveByDate" => handle_logs_archive_by_date(state, req),
        "logs.archiveSelected" => handle_logs_archive_selected(state, req),
        "logs.unarchiveByDate" => handle_logs_unarchive_by_date(state, req),
        "logs.unarchiveSelected" => handle_logs_unarchive_selected(state, req),
        "logs.archivedSheets" => handle_logs_archived_sheets(state, req),
        "logs.archivedByDate" => handle_logs_archived_by_date(state, req),
        "logs.archivedGrouped" => handle_logs_archived_grouped(state, req),
        "logs.exportCsv" => handle_logs_export_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
