use super::get_required_str;
use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let paths = get_required_str(&req.params, "workspacePath")
        .and_then(|ws| get_required_str(&req.params, "outPath").map(|out| (ws, out)));
    let (workspace_path, out_path) = match paths {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(
        &PathBuf::from(&workspace_path),
        &PathBuf::from(&out_path),
    ) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "outPath": out_path
            }),
        ),
        Err(e) => err(&req.id, "backup_failed", format!("{e:?}"), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let paths = get_required_str(&req.params, "workspacePath")
        .and_then(|ws| get_required_str(&req.params, "inPath").map(|inp| (ws, inp)));
    let (workspace_path, in_path) = match paths {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let workspace = PathBuf::from(&workspace_path);

    let summary = match backup::import_workspace_bundle(&PathBuf::from(&in_path), &workspace) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "backup_failed", format!("{e:?}"), None),
    };

    // The live connection still points at the replaced file; reopen it.
    if state.workspace.as_deref() == Some(workspace.as_path()) {
        state.db = None;
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    ok(
        &req.id,
        json!({ "bundleFormatDetected": summary.bundle_format_detected }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import(state, req)),
        _ => None,
    }
}
