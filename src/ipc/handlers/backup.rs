use crate::backup;
use crate::ipc::error::{ActionError, ActionResult};
use crate::ipc::helpers::{required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::session::SessionRole;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Bundles hold every school in the workspace, so only admins move them.
fn require_admin(state: &AppState) -> ActionResult<PathBuf> {
    let workspace = state.workspace.clone().ok_or(ActionError::NoWorkspace)?;
    let session = state.session.as_ref().ok_or(ActionError::Unauthenticated)?;
    if session.role != SessionRole::Admin {
        return Err(ActionError::Forbidden("admin"));
    }
    Ok(workspace)
}

fn backup_export(state: &mut AppState, params: &Value) -> ActionResult<Value> {
    let workspace_path = require_admin(state)?;
    let out_path = required_str(params.get("outPath"), "outPath")?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| ActionError::Storage(format!("{e:#}")))?;
    tracing::info!(path = %out_path, sha256 = %export.db_sha256, "workspace exported");
    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn backup_import(state: &mut AppState, params: &Value) -> ActionResult<Value> {
    let workspace_path = require_admin(state)?;
    let in_path = required_str(params.get("inPath"), "inPath")?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(ActionError::NotFound {
            entity: "bundle file",
            details: Some(json!({ "path": in_path })),
        });
    }

    let kind = backup::detect_source(&src).map_err(|e| ActionError::Storage(format!("{e:#}")))?;
    if kind == backup::SourceKind::Unknown {
        return Err(ActionError::bad_params_with(
            "inPath is neither a workspace bundle nor a SQLite database",
            json!({ "path": in_path }),
        ));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let imported = backup::import_workspace_bundle(&src, &workspace_path)
        .map_err(|e| ActionError::Storage(format!("{e:#}")));
    // Reopen whatever is on disk now, the old file if the import failed.
    let reopened = state
        .open_workspace(&workspace_path)
        .map_err(|e| ActionError::Storage(format!("{e:#}")));
    let import = imported?;
    reopened?;

    // Imported data may not contain the session's school or role.
    state.session = None;
    tracing::info!(path = %in_path, format = %import.bundle_format_detected, "workspace imported");
    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "checksumVerified": import.checksum_verified,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "backup.export" => Some(respond(req, backup_export(state, &req.params))),
        "backup.import" => Some(respond(req, backup_import(state, &req.params))),
        _ => None,
    }
}
