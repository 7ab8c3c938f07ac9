use regex::Regex;
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::handlers::users::{insert_user, NewUser};
use crate::ipc::helpers::{opt_i64, opt_str, param_i64, param_str, query_json, windowed};
use crate::ipc::types::{AppState, Request};
use crate::password;
use crate::session::Role;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RegistrationForm {
    pub student_id: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_number: String,
    pub password: String,
    pub confirm_password: String,
}

fn email_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").ok())
        .as_ref()
}

/// Mobile numbers are `09` plus nine digits; landlines 7 to 15 digits.
fn phone_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(09\d{9}|\d{7,15})$").ok())
        .as_ref()
}

impl RegistrationForm {
    /// First failing rule, as the message shown to the student.
    pub fn validate(&self) -> Result<(), String> {
        let id = self.student_id.trim();
        if id.is_empty() {
            return Err("student ID is required".into());
        }
        if !(4..=50).contains(&id.chars().count()) {
            return Err("student ID must be between 4 and 50 characters".into());
        }
        if self.first_name.trim().is_empty() {
            return Err("first name is required".into());
        }
        if self.last_name.trim().is_empty() {
            return Err("last name is required".into());
        }

        let email = self.email.trim();
        if email.is_empty() {
            return Err("email is required".into());
        }
        if !email_re().is_some_and(|re| re.is_match(email)) {
            return Err("invalid email format".into());
        }

        if self.contact_number.trim().is_empty() {
            return Err("contact number is required".into());
        }
        let phone: String = self
            .contact_number
            .chars()
            .filter(|c| *c != '-' && *c != ' ')
            .collect();
        if !phone_re().is_some_and(|re| re.is_match(&phone)) {
            return Err("invalid contact number format".into());
        }

        if self.password.trim().is_empty() {
            return Err("password is required".into());
        }
        if self.password.chars().count() < password::MIN_LEN {
            return Err(format!(
                "password must be at least {} characters long",
                password::MIN_LEN
            ));
        }
        if self.password != self.confirm_password {
            return Err("passwords do not match".into());
        }
        Ok(())
    }

    fn to_new_user(&self) -> NewUser {
        let mut profile = HashMap::new();
        for (column, value) in [
            ("student_number", &self.student_id),
            ("first_name", &self.first_name),
            ("middle_name", &self.middle_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
            ("contact_number", &self.contact_number),
        ] {
            let v = value.trim();
            if !v.is_empty() {
                profile.insert(column, v.to_string());
            }
        }
        NewUser {
            role: Some(Role::Student),
            password: Some(self.password.clone()),
            profile,
            account_status: Some("pending"),
        }
    }
}

fn handle_registration_submit(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let form: RegistrationForm = serde_json::from_value(req.params.clone())
        .map_err(|e| AppError::bad_params(e.to_string()))?;
    form.validate().map_err(AppError::BadParams)?;
    let conn = state.conn()?;

    let email_taken: Option<i64> = conn
        .query_row(
            "SELECT user_id FROM user_profiles WHERE lower(email) = lower(?)",
            [form.email.trim()],
            |r| r.get(0),
        )
        .optional()?;
    if email_taken.is_some() {
        return Err(AppError::conflict("email already registered"));
    }

    let tx = conn.unchecked_transaction()?;
    let (user_id, username) = insert_user(&tx, &form.to_new_user())?;
    tx.execute(
        "INSERT INTO registration_approvals(user_id, status, submitted_at) VALUES(?, 'pending', ?)",
        (user_id, db::now_stamp()),
    )
    .map_err(|e| AppError::db_table("db_insert_failed", "registration_approvals", e))?;
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;

    tracing::info!(user_id, student_id = %username, "registration submitted");
    Ok(json!({ "userId": user_id, "status": "pending" }))
}

fn handle_registration_pending(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let conn = state.conn()?;
    let rows = query_json(
        conn,
        "SELECT u.id AS user_id, p.student_number AS student_id, p.last_name, p.first_name,
                p.middle_name, p.contact_number, p.email,
                COALESCE(ra.submitted_at, u.created_at) AS submitted_at
         FROM users u
         LEFT JOIN user_profiles p ON p.user_id = u.id
         LEFT JOIN registration_approvals ra ON ra.user_id = u.id AND ra.status = 'pending'
         WHERE u.account_status = 'pending' AND u.user_type = 'student'
         ORDER BY u.created_at ASC, u.id ASC",
        [],
    )?;
    windowed(&req.params, "registrations", rows)
}

fn handle_registration_process(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let user_id = param_i64(&req.params, "userId")?;
    let approved_by = opt_i64(&req.params, "approvedBy")
        .or_else(|| state.session.as_ref().map(|s| s.user.id));
    let action = param_str(&req.params, "action")?;
    let reason = opt_str(&req.params, "rejectionReason");
    let (account_status, active, approval_status) = match action.as_str() {
        "approve" => ("active", 1, "approved"),
        "reject" => ("rejected", 0, "rejected"),
        _ => {
            return Err(AppError::bad_params(
                "invalid action: must be 'approve' or 'reject'",
            ))
        }
    };
    if action == "reject" && reason.is_none() {
        return Err(AppError::bad_params("rejection reason is required"));
    }
    let conn = state.conn()?;

    let tx = conn.unchecked_transaction()?;
    let changed = tx
        .execute(
            "UPDATE users SET account_status = ?, is_active = ?
             WHERE id = ? AND account_status = 'pending'",
            (account_status, active, user_id),
        )
        .map_err(|e| AppError::db_table("db_update_failed", "users", e))?;
    if changed == 0 {
        return Err(AppError::not_found("no pending registration for this user"));
    }
    tx.execute(
        "UPDATE registration_approvals
         SET status = ?, approved_by_user_id = ?, rejection_reason = ?, processed_at = ?
         WHERE user_id = ? AND status = 'pending'",
        (
            approval_status,
            approved_by,
            if action == "reject" { reason } else { None },
            db::now_stamp(),
            user_id,
        ),
    )
    .map_err(|e| AppError::db_table("db_update_failed", "registration_approvals", e))?;
    tx.commit()
        .map_err(|e| AppError::db("db_commit_failed", e))?;

    tracing::info!(user_id, status = approval_status, "registration processed");
    Ok(json!({ "userId": user_id, "status": approval_status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "registration.submit" => handle_registration_submit(state, req),
        "registration.pending" => handle_registration_pending(state, req),
        "registration.process" => handle_registration_process(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
