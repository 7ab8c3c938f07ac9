use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::handlers::attendance;
use crate::ipc::helpers::{opt_i64, opt_str, param_str};
use crate::ipc::types::{AppState, Request};
use crate::password;
use crate::photo;
use crate::session::{Role, Session, SessionUser};

struct Account {
    id: i64,
    username: String,
    hash: String,
    salt: String,
    user_type: String,
    account_status: String,
    is_active: bool,
    locked: bool,
    created_at: String,
}

fn find_account(conn: &Connection, username: &str) -> AppResult<Option<Account>> {
    Ok(conn
        .query_row(
            "SELECT id, username, password_hash, password_salt, user_type, account_status,
                    is_active, account_lock, created_at
             FROM users WHERE username = ?",
            [username],
            |r| {
                Ok(Account {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    hash: r.get(2)?,
                    salt: r.get(3)?,
                    user_type: r.get(4)?,
                    account_status: r.get(5)?,
                    is_active: r.get::<_, i64>(6)? != 0,
                    locked: r.get::<_, i64>(7)? != 0,
                    created_at: r.get(8)?,
                })
            },
        )
        .optional()?)
}

fn raw_password(params: &serde_json::Value, key: &str) -> AppResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_params(format!("missing {}", key)))
}

pub(crate) fn load_session_user(
    conn: &Connection,
    user_id: i64,
    role: Role,
    username: &str,
    created: &str,
) -> AppResult<SessionUser> {
    let profile = conn
        .query_row(
            "SELECT first_name, middle_name, last_name, gender, employee_number,
                    student_number, email, contact_number, department_code, profile_photo
             FROM user_profiles WHERE user_id = ?",
            [user_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, Option<String>>(8)?,
                    r.get::<_, Option<Vec<u8>>>(9)?,
                ))
            },
        )
        .optional()?
        .unwrap_or_default();

    Ok(SessionUser {
        id: user_id,
        name: username.to_string(),
        role,
        first_name: profile.0,
        middle_name: profile.1,
        last_name: profile.2,
        gender: profile.3,
        employee_id: profile.4,
        student_id: profile.5,
        email: profile.6,
        contact_number: profile.7,
        department_code: profile.8,
        profile_photo: profile
            .9
            .filter(|b| !b.is_empty())
            .map(|b| photo::to_data_url(&b)),
        created: created.to_string(),
        login_log_id: None,
    })
}

fn handle_login(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let username = param_str(&req.params, "username")?;
    let candidate = raw_password(&req.params, "password")?;
    let pc = state.pc_number(opt_str(&req.params, "pcNumber"));
    let grace = state.config.late_grace_minutes;
    let conn = state.conn()?;

    let invalid = || AppError::Unauthorized("invalid credentials".into());
    let account = find_account(conn, &username)?.ok_or_else(invalid)?;
    if !password::verify_password(&account.salt, &account.hash, &candidate) {
        tracing::info!(username = %username, "login rejected");
        return Err(invalid());
    }
    match account.account_status.as_str() {
        "pending" => {
            return Err(AppError::Forbidden(
                "your registration is still pending approval".into(),
            ))
        }
        "rejected" => return Err(AppError::Forbidden("your registration was rejected".into())),
        _ => {}
    }
    if account.locked {
        return Err(AppError::Forbidden("account is locked".into()));
    }
    if !account.is_active {
        return Err(AppError::Forbidden("account is inactive".into()));
    }
    let role = Role::parse(&account.user_type).ok_or_else(|| {
        AppError::db(
            "db_query_failed",
            format!("unknown user type: {}", account.user_type),
        )
    })?;

    conn.execute(
        "INSERT INTO login_logs(user_id, user_type, pc_number, login_time, login_status)
         VALUES(?, ?, ?, ?, 'success')",
        (account.id, role.as_str(), &pc, db::now_stamp()),
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "login_logs", e))?;
    let log_id = conn.last_insert_rowid();

    let mut user = load_session_user(conn, account.id, role, &account.username, &account.created_at)?;
    user.login_log_id = Some(log_id);

    if role.is_student() {
        // Attendance is best effort; a failure here must not block sign-in.
        match attendance::auto_record_on_login(conn, account.id, &pc, Local::now().naive_local(), grace) {
            Ok(n) if n > 0 => tracing::info!(user_id = account.id, classes = n, "attendance auto-recorded"),
            Ok(_) => {}
            Err(e) => tracing::warn!(user_id = account.id, error = %e, "auto attendance failed"),
        }
    }

    tracing::info!(user_id = account.id, role = role.as_str(), pc = %pc, log_id, "login");
    let session = Session::new(user, pc);
    let blob = session.to_storage_json();
    state.session = Some(session);
    Ok(blob)
}

/// Why an open login log was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogoutReason {
    SignedOut,
    Timeout,
}

impl LogoutReason {
    fn as_str(self) -> &'static str {
        match self {
            LogoutReason::SignedOut => "logout",
            LogoutReason::Timeout => "timeout",
        }
    }
}

/// Stamp the newest open log of `user_id`. Returns false when none was open.
fn close_open_log(conn: &Connection, user_id: i64, reason: LogoutReason) -> AppResult<bool> {
    let closed = conn
        .execute(
            "UPDATE login_logs SET logout_time = ?, logout_reason = ?
             WHERE id = (
               SELECT id FROM login_logs
               WHERE user_id = ? AND logout_time IS NULL
               ORDER BY login_time DESC, id DESC
               LIMIT 1
             )",
            (db::now_stamp(), reason.as_str(), user_id),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "login_logs", e))?;
    Ok(closed > 0)
}

fn end_session(
    state: &mut AppState,
    req: &Request,
    reason: LogoutReason,
) -> AppResult<serde_json::Value> {
    let user_id = opt_i64(&req.params, "userId")
        .or_else(|| state.session.as_ref().map(|s| s.user.id))
        .ok_or_else(|| AppError::bad_params("missing userId"))?;
    let conn = state.conn()?;

    let closed = close_open_log(conn, user_id, reason)?;
    if !closed {
        tracing::debug!(user_id, "no open login log to close");
    } else if reason == LogoutReason::Timeout {
        tracing::info!(user_id, "session timed out");
    }

    if state.session.as_ref().map(|s| s.user.id) == Some(user_id) {
        state.session = None;
    }
    Ok(json!({ "closed": closed }))
}

fn handle_change_password(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let username = param_str(&req.params, "username")?;
    let old = raw_password(&req.params, "oldPassword")?;
    let new = raw_password(&req.params, "newPassword")?;
    if new.len() < password::MIN_LEN {
        return Err(AppError::bad_params(format!(
            "password must be at least {} characters long",
            password::MIN_LEN
        )));
    }
    let conn = state.conn()?;
    let account = find_account(conn, &username)?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    if !password::verify_password(&account.salt, &account.hash, &old) {
        return Err(AppError::Unauthorized("current password is incorrect".into()));
    }

    let salt = password::new_salt();
    conn.execute(
        "UPDATE users SET password_hash = ?, password_salt = ? WHERE id = ?",
        (password::hash_password(&salt, &new), &salt, account.id),
    )
    .map_err(|e| AppError::db_table("db_update_failed", "users", e))?;
    tracing::info!(user_id = account.id, "password changed");
    Ok(json!({ "ok": true }))
}

fn handle_session(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    Ok(state
        .session
        .as_ref()
        .map(Session::to_storage_json)
        .unwrap_or(serde_json::Value::Null))
}

fn handle_update_user(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let raw = req
        .params
        .get("user")
        .cloned()
        .ok_or_else(|| AppError::bad_params("missing user"))?;
    let user: SessionUser =
        serde_json::from_value(raw).map_err(|e| AppError::bad_params(e.to_string()))?;
    let session = state
        .session
        .as_mut()
        .ok_or_else(|| AppError::Unauthorized("not signed in".into()))?;
    session.update_user(user).map_err(AppError::BadParams)?;
    Ok(session.to_storage_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => handle_login(state, req),
        "auth.logout" => end_session(state, req, LogoutReason::SignedOut),
        "auth.timeoutLogout" => end_session(state, req, LogoutReason::Timeout),
        "auth.changePassword" => handle_change_password(state, req),
        "auth.session" => handle_session(state, req),
        "auth.updateUser" => handle_update_user(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
