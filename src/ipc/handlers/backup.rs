use crate::backup;
use crate::db;
use crate::ipc::helpers::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

fn required_path(params: &Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn target_workspace(state: &AppState, params: &Value) -> Result<PathBuf, HandlerErr> {
    params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn export_bundle(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = required_path(params, "outPath")?;
    let workspace_path = target_workspace(state, params)?;

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            warn!(error = %e, "wal checkpoint before export failed");
        }
    }

    let out = PathBuf::from(&out_path);
    let export = backup::export_workspace_bundle(&workspace_path, &out).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    info!(
        path = %out_path,
        entries = export.entry_count,
        documents = export.document_count,
        "workspace bundle exported"
    );
    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "documentCount": export.document_count,
    }))
}

fn import_bundle(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = required_path(params, "inPath")?;
    let workspace_path = target_workspace(state, params)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // The database file is replaced underneath any open handle.
    let replacing_open = state.workspace.as_deref() == Some(workspace_path.as_path());
    if replacing_open {
        state.db = None;
    }

    let imported = backup::import_workspace_bundle(&src, &workspace_path).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}"))
            .with_details(json!({ "path": src.to_string_lossy() }))
    });
    // A failed import leaves the previous files in place, so the old handle is reopened.
    if replacing_open || imported.is_ok() {
        match db::open_db(&workspace_path) {
            Ok(conn) => {
                state.workspace = Some(workspace_path.clone());
                state.db = Some(conn);
            }
            Err(e) => {
                state.workspace = None;
                if imported.is_ok() {
                    return Err(HandlerErr::new("db_open_failed", format!("{e:#}")));
                }
            }
        }
    }
    let import = imported?;

    info!(
        workspace = %workspace_path.to_string_lossy(),
        documents = import.document_count,
        "workspace bundle imported"
    );
    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "documentCount": import.document_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(req, export_bundle(state, &req.params))),
        "backup.importWorkspaceBundle" => Some(respond(req, import_bundle(state, &req.params))),
        _ => None,
    }
}
