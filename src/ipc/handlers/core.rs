use crate::db;
use crate::error::{AppError, AppResult};
use crate::fetch::POLL_INTERVAL;
use crate::ipc::error::respond;
use crate::ipc::helpers::param_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "pollIntervalSeconds": POLL_INTERVAL.as_secs(),
        "signedIn": state.session.is_some(),
    }))
}

/// Open (or create) the workspace database and make it current. Any session
/// from the previous workspace is dropped.
pub fn select_workspace(state: &mut AppState, path: &Path) -> AppResult<bool> {
    let conn = db::open_db(path).map_err(|e| AppError::db("db_open_failed", format!("{e:#}")))?;
    let seeded = db::seed_default_admin(&conn)
        .map_err(|e| AppError::db("db_seed_failed", format!("{e:#}")))?;
    if seeded {
        tracing::info!(workspace = %path.display(), "seeded default admin account");
    }

    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.session = None;
    state.fetches.reset();
    tracing::info!(workspace = %path.display(), "workspace selected");
    Ok(seeded)
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let path = PathBuf::from(param_str(&req.params, "path")?);
    let seeded = select_workspace(state, &path)?;
    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "seededAdmin": seeded,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
