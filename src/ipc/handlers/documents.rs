use crate::ipc::helpers::{get_required_str, respond, to_json, with_collaborators, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::triggers::edit_cell;
use serde_json::json;

fn handle_document_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let sheet = c.documents.open_sheet(&document_id)?;
        Ok(json!({ "documentId": document_id, "sheet": to_json(&sheet)? }))
    });
    respond(&req.id, result)
}

fn handle_document_edit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let cell = get_required_str(&req.params, "cell")?;
        let value = req
            .params
            .get("value")
            .cloned()
            .ok_or_else(|| HandlerErr::bad_params("missing value"))?;
        // Edits without an identity are treated as coming from an anonymous user.
        let editor = req
            .params
            .get("editor")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        to_json(&edit_cell(c, &document_id, &cell, value, editor)?)
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "document.get" => Some(handle_document_get(state, req)),
        "document.edit" => Some(handle_document_edit(state, req)),
        _ => None,
    }
}
