use serde_json::{json, Value};
use std::path::PathBuf;

use crate::backup;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::handlers::core::select_workspace;
use crate::ipc::helpers::{opt_str, param_str};
use crate::ipc::types::{AppState, Request};

/// `workspacePath` param, else the selected workspace.
fn target_workspace(state: &AppState, req: &Request) -> AppResult<PathBuf> {
    opt_str(&req.params, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or(AppError::NoWorkspace)
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let workspace = target_workspace(state, req)?;
    let out_path = PathBuf::from(param_str(&req.params, "outPath")?);
    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| AppError::Bundle(format!("{e:#}")))?;
    tracing::info!(
        workspace = %workspace.display(),
        out = %out_path.display(),
        bytes = summary.db_bytes,
        "workspace bundle exported"
    );
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "dbBytes": summary.db_bytes,
        "sha256": summary.sha256,
    }))
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> AppResult<Value> {
    let workspace = target_workspace(state, req)?;
    let in_path = PathBuf::from(param_str(&req.params, "inPath")?);
    let is_current = state.workspace.as_deref() == Some(workspace.as_path());
    if is_current {
        // Release the file before it is replaced.
        state.db = None;
    }

    let imported = backup::import_workspace_bundle(&in_path, &workspace)
        .map_err(|e| AppError::Bundle(format!("{e:#}")));
    // Reopen even when the import failed so the workspace stays usable.
    if is_current {
        select_workspace(state, &workspace)?;
    }
    let summary = imported?;

    tracing::info!(
        workspace = %workspace.display(),
        format = %summary.bundle_format_detected,
        bytes = summary.db_bytes,
        "workspace bundle imported"
    );
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
        "dbBytes": summary.db_bytes,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_backup_export_workspace_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_backup_import_workspace_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
