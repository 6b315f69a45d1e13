use crate::ipc::helpers::{get_required_str, respond, to_json, with_collaborators, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::populate::{
    list_visit_evidence, remove_staged_evidence, replace_visit_notes, stage_evidence,
    stage_visit_note, staged_notes, EvidenceUpload,
};
use crate::staging::{evidence_summary, notes_summary, NoteCategory, StagedNotes};
use base64::Engine;
use serde_json::json;

fn notes_view(notes: &StagedNotes) -> Result<serde_json::Value, HandlerErr> {
    let mut summaries = serde_json::Map::new();
    for category in NoteCategory::ALL {
        summaries.insert(category.table().to_string(), json!(notes_summary(notes, category)));
    }
    Ok(json!({ "notes": to_json(notes)?, "summaries": summaries }))
}

fn handle_notes_stage(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let working_line = get_required_str(&req.params, "workingLine")?;
        let raw_category = get_required_str(&req.params, "category")?;
        let text = get_required_str(&req.params, "text")?;
        let category = NoteCategory::parse(&raw_category)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown category: {raw_category}")))?;
        let notes = stage_visit_note(c, &document_id, &working_line, category, &text)?;
        notes_view(&notes)
    });
    respond(&req.id, result)
}

fn handle_notes_replace(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let raw = req
            .params
            .get("notes")
            .cloned()
            .ok_or_else(|| HandlerErr::bad_params("missing notes"))?;
        let notes: StagedNotes = serde_json::from_value(raw)
            .map_err(|e| HandlerErr::bad_params(format!("invalid notes: {e}")))?;
        let notes = replace_visit_notes(c, &document_id, notes)?;
        notes_view(&notes)
    });
    respond(&req.id, result)
}

fn handle_notes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        notes_view(&staged_notes(c, &document_id)?)
    });
    respond(&req.id, result)
}

fn parse_uploads(params: &serde_json::Value) -> Result<Vec<EvidenceUpload>, HandlerErr> {
    let Some(files) = params.get("files").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing files"));
    };
    let mut out = Vec::with_capacity(files.len());
    for (i, f) in files.iter().enumerate() {
        let field = |key: &str| f.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(field("dataBase64").trim())
            .map_err(|e| HandlerErr {
                code: "bad_params",
                message: format!("files[{i}].dataBase64 is not base64: {e}"),
                details: Some(json!({ "index": i })),
            })?;
        let mime_type = match field("mimeType") {
            m if m.trim().is_empty() => "application/octet-stream".to_string(),
            m => m,
        };
        out.push(EvidenceUpload {
            evidence_type: field("type"),
            original_name: field("name"),
            mime_type,
            bytes,
        });
    }
    Ok(out)
}

fn handle_evidence_stage(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let uploads = parse_uploads(&req.params)?;
        let outcome = stage_evidence(c, &document_id, uploads)?;
        let active = list_visit_evidence(c, &document_id)?;
        Ok(json!({
            "staged": to_json(&outcome.staged)?,
            "failures": to_json(&outcome.failures)?,
            "summary": evidence_summary(&active),
        }))
    });
    respond(&req.id, result)
}

fn handle_evidence_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let evidence_type = get_required_str(&req.params, "type")?;
        let removed = remove_staged_evidence(c, &document_id, &evidence_type)?;
        Ok(json!({ "removed": to_json(&removed)? }))
    });
    respond(&req.id, result)
}

fn handle_evidence_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let evidence = list_visit_evidence(c, &document_id)?;
        Ok(json!({
            "evidence": to_json(&evidence)?,
            "summary": evidence_summary(&evidence),
        }))
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "visit.notes.stage" => Some(handle_notes_stage(state, req)),
        "visit.notes.replace" => Some(handle_notes_replace(state, req)),
        "visit.notes.get" => Some(handle_notes_get(state, req)),
        "visit.evidence.stage" => Some(handle_evidence_stage(state, req)),
        "visit.evidence.remove" => Some(handle_evidence_remove(state, req)),
        "visit.evidence.list" => Some(handle_evidence_list(state, req)),
        _ => None,
    }
}
