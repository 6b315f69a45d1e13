use crate::config::SETTINGS_KEY;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    match serde_json::to_value(&state.config) {
        Ok(v) => ok(&req.id, json!({ "config": v })),
        Err(e) => err(&req.id, "internal", e.to_string(), None),
    }
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    let next = match state.config.merged(patch) {
        Ok(c) => c,
        Err(message) => return err(&req.id, "bad_params", message, None),
    };
    let value = match serde_json::to_value(&next) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };
    if let Err(e) = db::settings_set_json(conn, SETTINGS_KEY, &value) {
        return err(
            &req.id,
            "db_update_failed",
            format!("{e:?}"),
            Some(json!({ "key": SETTINGS_KEY })),
        );
    }

    tracing::info!(fields = patch.len(), "configuration updated");
    state.config = next;
    ok(&req.id, json!({ "config": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
