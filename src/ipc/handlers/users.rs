use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{full_name_sql, opt_str, param_i64, param_str, query_json, windowed};
use crate::ipc::types::{AppState, Request};
use crate::password;
use crate::photo;
use crate::session::Role;

/// Profile columns and the request keys that carry them.
const PROFILE_FIELDS: [(&str, &str); 11] = [
    ("first_name", "firstName"),
    ("middle_name", "middleName"),
    ("last_name", "lastName"),
    ("gender", "gender"),
    ("employee_number", "employeeId"),
    ("student_number", "studentId"),
    ("email", "email"),
    ("contact_number", "contactNumber"),
    ("department_code", "departmentCode"),
    ("year_level", "year"),
    ("section", "section"),
];

#[derive(Debug, Clone, Default)]
pub(crate) struct NewUser {
    pub role: Option<Role>,
    pub password: Option<String>,
    pub profile: HashMap<&'static str, String>,
    pub account_status: Option<&'static str>,
}

impl NewUser {
    fn from_params(params: &Value) -> AppResult<Self> {
        let role_raw = param_str(params, "role")?;
        let role = Role::parse(&role_raw)
            .ok_or_else(|| AppError::bad_params(format!("invalid role: {}", role_raw)))?;
        let mut profile = HashMap::new();
        for (column, key) in PROFILE_FIELDS {
            if let Some(v) = opt_str(params, key) {
                profile.insert(column, v);
            }
        }
        Ok(Self {
            role: Some(role),
            password: params
                .get("password")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            profile,
            account_status: None,
        })
    }

    fn field(&self, column: &str) -> Option<&str> {
        self.profile.get(column).map(String::as_str)
    }

    /// Staff sign in with their employee number, students with their
    /// student number.
    fn username(&self, role: Role) -> AppResult<String> {
        if role.is_student() {
            self.field("student_number").map(str::to_string).ok_or_else(|| {
                AppError::bad_params(format!("student ID is required for {} role", role.as_str()))
            })
        } else {
            self.field("employee_number").map(str::to_string).ok_or_else(|| {
                AppError::bad_params(format!("employee ID is required for {} role", role.as_str()))
            })
        }
    }
}

/// Insert the account and its profile in one transaction. The password
/// defaults to the username.
pub(crate) fn create_user(conn: &Connection, new: &NewUser) -> AppResult<(i64, String)> {
    let tx = conn.unchecked_transaction()?;
    let created = insert_user(&tx, new)?;
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;
    Ok(created)
}

/// Account plus profile rows on a connection the caller already holds a
/// transaction on.
pub(crate) fn insert_user(conn: &Connection, new: &NewUser) -> AppResult<(i64, String)> {
    let role = new.role.ok_or_else(|| AppError::bad_params("missing role"))?;
    let username = new.username(role)?;
    if role == Role::WorkingStudent
        && (new.field("first_name").is_none() || new.field("last_name").is_none())
    {
        return Err(AppError::bad_params("first name and last name are required"));
    }

    let exists: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE username = ?", [&username], |r| r.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(AppError::conflict(if role.is_student() {
            "this student ID is already registered".to_string()
        } else {
            format!("this {} ID is already registered", role.as_str())
        }));
    }

    let secret = new.password.clone().unwrap_or_else(|| username.clone());
    let salt = password::new_salt();
    let (status, active) = match new.account_status {
        Some("pending") => ("pending", 0),
        _ => ("active", 1),
    };

    conn.execute(
        "INSERT INTO users(username, password_hash, password_salt, user_type, account_status, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &username,
            password::hash_password(&salt, &secret),
            &salt,
            role.as_str(),
            status,
            active,
            db::now_stamp(),
        ),
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "users", e))?;
    let user_id = conn.last_insert_rowid();

    conn.execute(
        "INSERT INTO user_profiles(user_id, first_name, middle_name, last_name, gender,
            employee_number, student_number, email, contact_number, department_code,
            year_level, section)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            user_id,
            new.field("first_name"),
            new.field("middle_name"),
            new.field("last_name"),
            new.field("gender"),
            new.field("employee_number"),
            new.field("student_number"),
            new.field("email"),
            new.field("contact_number"),
            new.field("department_code"),
            new.field("year_level"),
            new.field("section"),
        ],
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "user_profiles", e))?;

    Ok((user_id, username))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let user_type = opt_str(&req.params, "userType");
    let search = opt_str(&req.params, "search").map(|s| format!("%{}%", s));

    let sql = format!(
        "SELECT u.id, u.username, u.user_type, u.account_status, u.is_active,
                u.account_lock AS is_locked, u.created_at,
                p.first_name, p.middle_name, p.last_name, p.gender,
                p.employee_number, p.student_number, p.email, p.contact_number,
                p.department_code, p.year_level, p.section,
                {name} AS full_name
         FROM users u
         LEFT JOIN user_profiles p ON p.user_id = u.id
         WHERE (?1 IS NULL OR u.user_type = ?1)
           AND (?2 IS NULL
                OR u.username LIKE ?2
                OR p.first_name LIKE ?2
                OR p.middle_name LIKE ?2
                OR p.last_name LIKE ?2
                OR p.employee_number LIKE ?2
                OR p.student_number LIKE ?2
                OR substr(u.created_at, 1, 10) LIKE ?2)
         ORDER BY u.created_at DESC, u.id DESC",
        name = full_name_sql("p", "u")
    );
    let rows = query_json(conn, &sql, (user_type, search))?;
    windowed(&req.params, "users", rows)
}

fn handle_users_create(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let new = NewUser::from_params(&req.params)?;
    let (user_id, username) = create_user(conn, &new)?;
    tracing::info!(user_id, username = %username, "user created");
    Ok(json!({ "userId": user_id, "username": username }))
}

fn handle_users_update(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let id = param_i64(&req.params, "id")?;

    let current: Option<String> = conn
        .query_row("SELECT user_type FROM users WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    let Some(current_type) = current else {
        return Err(AppError::not_found("user not found"));
    };
    let role = match opt_str(&req.params, "role") {
        Some(r) => Role::parse(&r).ok_or_else(|| AppError::bad_params(format!("invalid role: {}", r)))?,
        None => Role::parse(&current_type).unwrap_or(Role::Student),
    };

    // Only keys present in the request are written; an empty string clears.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Option<String>> = Vec::new();
    for (column, key) in PROFILE_FIELDS {
        if let Some(v) = req.params.get(key) {
            sets.push(format!("{} = ?", column));
            values.push(
                v.as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO user_profiles(user_id) VALUES(?)",
        [id],
    )?;
    if !sets.is_empty() {
        let sql = format!("UPDATE user_profiles SET {} WHERE user_id = ?", sets.join(", "));
        let mut bind: Vec<rusqlite::types::Value> = values
            .into_iter()
            .map(|v| match v {
                Some(s) => rusqlite::types::Value::Text(s),
                None => rusqlite::types::Value::Null,
            })
            .collect();
        bind.push(rusqlite::types::Value::Integer(id));
        tx.execute(&sql, rusqlite::params_from_iter(bind))
            .map_err(|e| AppError::db_table("db_update_failed", "user_profiles", e))?;
    }
    tx.execute(
        "UPDATE users SET user_type = ? WHERE id = ?",
        (role.as_str(), id),
    )
    .map_err(|e| AppError::db_table("db_update_failed", "users", e))?;
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
}

fn handle_users_update_photo(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let id = param_i64(&req.params, "userId")?;
    let bytes = photo::decode(&param_str(&req.params, "photo")?)?;
    let conn = state.conn()?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("user not found"));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("INSERT OR IGNORE INTO user_profiles(user_id) VALUES(?)", [id])?;
    tx.execute(
        "UPDATE user_profiles SET profile_photo = ? WHERE user_id = ?",
        (&bytes, id),
    )
    .map_err(|e| AppError::db_table("db_update_failed", "user_profiles", e))?;
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;

    let url = photo::to_data_url(&bytes);
    if let Some(session) = state.session.as_mut().filter(|s| s.user.id == id) {
        session.user.profile_photo = Some(url.clone());
    }
    tracing::info!(user_id = id, bytes = bytes.len(), "profile photo updated");
    Ok(json!({ "ok": true, "profilePhoto": url }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let id = param_i64(&req.params, "id")?;
    if state.session.as_ref().map(|s| s.user.id) == Some(id) {
        return Err(AppError::conflict("cannot delete the signed-in account"));
    }
    let conn = state.conn()?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("user not found"));
    }
    let classes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM classes WHERE teacher_user_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if classes > 0 {
        return Err(AppError::conflict(format!(
            "cannot delete user: {} class(es) are assigned to this teacher",
            classes
        )));
    }

    let tx = conn.unchecked_transaction()?;
    // Explicit dependency order (no ON DELETE CASCADE).
    for (table, sql) in [
        ("attendance", "DELETE FROM attendance WHERE student_user_id = ?"),
        ("classlist", "DELETE FROM classlist WHERE student_user_id = ?"),
        ("feedback", "DELETE FROM feedback WHERE student_user_id = ?"),
        ("login_logs", "DELETE FROM login_logs WHERE user_id = ?"),
        ("registration_approvals", "DELETE FROM registration_approvals WHERE user_id = ?"),
        ("user_profiles", "DELETE FROM user_profiles WHERE user_id = ?"),
        ("users", "DELETE FROM users WHERE id = ?"),
    ] {
        tx.execute(sql, [id])
            .map_err(|e| AppError::db_table("db_delete_failed", table, e))?;
    }
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;

    tracing::info!(user_id = id, "user deleted");
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct BulkColumns {
    student_code: Option<usize>,
    first_name: Option<usize>,
    last_name: Option<usize>,
    middle_name: Option<usize>,
    email: Option<usize>,
    contact: Option<usize>,
}

fn looks_like_header(row: &[String]) -> bool {
    let joined = row.join(" ").to_lowercase();
    ["student", "code", "name"]
        .iter()
        .any(|w| joined.contains(w))
}

fn detect_columns(headers: &[String]) -> BulkColumns {
    let mut cols = BulkColumns::default();
    for (i, raw) in headers.iter().enumerate() {
        let h = raw.trim().to_lowercase();
        let has = |s: &str| h.contains(s);
        if cols.student_code.is_none()
            && ((has("student") && (has("code") || has("id")))
                || (has("id") && !has("email") && !has("contact")))
        {
            cols.student_code = Some(i);
        } else if cols.first_name.is_none()
            && ((has("first") && has("name")) || has("firstname") || has("fname") || h == "first")
        {
            cols.first_name = Some(i);
        } else if cols.last_name.is_none()
            && ((has("last") && has("name"))
                || has("lastname")
                || has("lname")
                || has("surname")
                || h == "last")
        {
            cols.last_name = Some(i);
        } else if cols.middle_name.is_none()
            && ((has("middle") && has("name")) || has("mname") || h == "middle" || h == "mi")
        {
            cols.middle_name = Some(i);
        } else if cols.email.is_none() && (has("email") || has("e-mail") || has("mail")) {
            cols.email = Some(i);
        } else if cols.contact.is_none()
            && (has("contact") || has("phone") || has("mobile") || has("cell"))
        {
            cols.contact = Some(i);
        }
    }
    cols
}

/// Positional fallback when the file has no header row.
fn positional_columns(width: usize) -> BulkColumns {
    BulkColumns {
        student_code: Some(0),
        first_name: Some(1),
        last_name: Some(2),
        middle_name: (width > 3).then_some(3),
        contact: (width > 4).then_some(4),
        email: None,
    }
}

/// Index of the first data row and the column mapping for it. Headers that
/// leave either name column unresolved fall back to positions.
fn resolve_columns(records: &[Vec<String>]) -> (usize, BulkColumns) {
    let Some(first) = records.first() else {
        return (0, BulkColumns::default());
    };
    let (start, cols) = if looks_like_header(first) {
        (1, detect_columns(first))
    } else {
        (0, BulkColumns::default())
    };
    if cols.first_name.is_none() || cols.last_name.is_none() {
        return (start, positional_columns(first.len()));
    }
    (start, cols)
}

fn parse_bulk_csv(text: &str) -> AppResult<Vec<Vec<String>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| AppError::bad_params(format!("invalid csv: {}", e)))?;
        let row: Vec<String> = rec.iter().map(str::to_string).collect();
        if row.iter().all(|c| c.is_empty()) {
            continue;
        }
        out.push(row);
    }
    Ok(out)
}

fn handle_users_bulk_create(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let text = req
        .params
        .get("csv")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::bad_params("missing csv"))?;
    let conn = state.conn()?;
    let records = parse_bulk_csv(text)?;

    let (start, cols) = resolve_columns(&records);

    let cell = |row: &[String], idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut created = 0usize;
    let mut errors: Vec<String> = Vec::new();
    for (i, row) in records.iter().enumerate().skip(start) {
        let row_num = i + 1;
        let (Some(code), Some(first), Some(last)) = (
            cell(row, cols.student_code),
            cell(row, cols.first_name),
            cell(row, cols.last_name),
        ) else {
            errors.push(format!("Row {}: Missing required field", row_num));
            continue;
        };

        let mut profile = HashMap::new();
        profile.insert("student_number", code.clone());
        profile.insert("first_name", first);
        profile.insert("last_name", last);
        if let Some(m) = cell(row, cols.middle_name) {
            profile.insert("middle_name", m);
        }
        if let Some(e) = cell(row, cols.email) {
            profile.insert("email", e);
        }
        if let Some(c) = cell(row, cols.contact) {
            profile.insert("contact_number", c);
        }
        let new = NewUser {
            role: Some(Role::Student),
            password: None,
            profile,
            account_status: None,
        };
        match create_user(conn, &new) {
            Ok(_) => created += 1,
            Err(e) => errors.push(format!("Row {} ({}): {}", row_num, code, e)),
        }
    }

    let total = records.len().saturating_sub(start);
    tracing::info!(created, failed = errors.len(), total, "bulk student import");
    Ok(json!({
        "created": created,
        "skipped": errors.len(),
        "total": total,
        "errors": errors,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "users.list" => handle_users_list(state, req),
        "users.create" => handle_users_create(state, req),
        "users.update" => handle_users_update(state, req),
        "users.delete" => handle_users_delete(state, req),
        "users.updatePhoto" => handle_users_update_photo(state, req),
        "users.bulkCreate" => handle_users_bulk_create(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
