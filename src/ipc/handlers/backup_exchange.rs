use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn session_guard(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    require_session(conn, req)?;
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match session_guard(state, req) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "fileCount": summary.file_count,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match session_guard(state, req) {
        Ok(w) => w,
        Err(e) => return e.response(&req.id),
    };
    let in_path = match get_required_str(&req.params, "inPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // The live connection holds the database file; release it for the swap.
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);

    // Reopen whatever is on disk now, whether or not the import succeeded.
    match db::open_db(&workspace) {
        Ok(conn) => state.db = Some(conn),
        Err(e) => {
            return err(
                &req.id,
                "db_open_failed",
                format!("workspace reopen failed: {e:?}"),
                None,
            )
        }
    }

    match imported {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format_detected,
                "fileCount": summary.file_count
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
