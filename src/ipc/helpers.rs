use chrono::NaiveDateTime;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::view::ViewState;

pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Required string param, trimmed and non-empty.
pub fn param_str(params: &Value, key: &str) -> AppResult<String> {
    opt_str(params, key).ok_or_else(|| AppError::bad_params(format!("missing {}", key)))
}

pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Numbers may arrive as JSON numbers or numeric strings.
pub fn opt_i64(params: &Value, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn param_i64(params: &Value, key: &str) -> AppResult<i64> {
    opt_i64(params, key).ok_or_else(|| AppError::bad_params(format!("missing {}", key)))
}

pub fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub fn param_i64_list(params: &Value, key: &str) -> AppResult<Vec<i64>> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(AppError::bad_params(format!("missing {}", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| AppError::bad_params(format!("{} must contain integers", key)))
        })
        .collect()
}

pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn sql_to_json(name: &str, v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if name.starts_with("is_") => Value::Bool(i != 0),
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(b.len()),
    }
}

/// Run a query and return each row as a JSON object keyed by column name.
/// `is_*` integer columns come back as booleans.
pub fn query_json<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> AppResult<Vec<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let rows = stmt
        .query_map(params, |row| {
            let mut obj = serde_json::Map::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                obj.insert(name.clone(), sql_to_json(name, row.get_ref(i)?));
            }
            Ok(Value::Object(obj))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn query_one_json<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> AppResult<Option<Value>> {
    Ok(query_json(conn, sql, params)?.into_iter().next())
}

/// Without `params.view` the full list comes back under `key`; with it, the
/// filtered, sorted page plus the resulting `view` state.
pub fn windowed(params: &Value, key: &str, rows: Vec<Value>) -> AppResult<Value> {
    match params.get("view") {
        None | Some(Value::Null) => {
            let mut obj = serde_json::Map::new();
            obj.insert(key.to_string(), Value::Array(rows));
            Ok(Value::Object(obj))
        }
        Some(v) => {
            let mut view = ViewState::from_params(v)?;
            let window = view.window(&rows);
            view.go_to_page(window.page_index);
            let mut out =
                serde_json::to_value(window).map_err(|e| AppError::bad_params(e.to_string()))?;
            out["view"] = view.to_params();
            Ok(out)
        }
    }
}

/// `"Last, First Middle"` from a `user_profiles` alias, falling back to the
/// username of a `users` alias.
pub fn full_name_sql(profile: &str, user: &str) -> String {
    format!(
        "CASE WHEN {p}.last_name IS NOT NULL AND {p}.first_name IS NOT NULL
           THEN {p}.last_name || ', ' || {p}.first_name || COALESCE(' ' || NULLIF({p}.middle_name, ''), '')
           ELSE {u}.username END",
        p = profile,
        u = user
    )
}

/// `"2h 5m"` between login and logout, `"Active"` while still signed in.
pub fn duration_label(login: &str, logout: Option<&str>) -> String {
    let Some(logout) = logout else {
        return "Active".to_string();
    };
    let (Ok(a), Ok(b)) = (
        NaiveDateTime::parse_from_str(login, STAMP_FORMAT),
        NaiveDateTime::parse_from_str(logout, STAMP_FORMAT),
    ) else {
        return String::new();
    };
    let minutes = (b - a).num_minutes().max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Adds `duration` to every login log row.
pub fn with_durations(mut rows: Vec<Value>) -> Vec<Value> {
    for row in rows.iter_mut() {
        let login = row.get("login_time").and_then(|v| v.as_str()).unwrap_or("");
        let logout = row.get("logout_time").and_then(|v| v.as_str());
        let label = duration_label(login, logout);
        row["duration"] = Value::String(label);
    }
    rows
}
