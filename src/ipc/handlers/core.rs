use crate::config::AppConfig;
use crate::db;
use crate::gateway::FsDocumentStore;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let config = match AppConfig::load(&conn) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", format!("{e:?}"), None),
    };
    let roots = match FsDocumentStore::new(&conn, &path).bootstrap(&config.visit_sheet_name) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "drive_init_failed", format!("{e:?}"), None),
    };

    tracing::info!(workspace = %path.display(), "workspace opened");
    let result = json!({
        "workspacePath": path.to_string_lossy(),
        "rootFolderId": roots.root_folder_id,
        "templateDocumentId": roots.template_document_id,
    });
    state.workspace = Some(path);
    state.db = Some(conn);
    state.roots = Some(roots);
    state.config = config;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
