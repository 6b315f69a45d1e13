use crate::ipc::helpers::{
    get_date, get_required_i64, get_required_str, respond, to_json, with_collaborators,
    with_progress, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::orchestrator::{abandon_visit, finalize_visit, start_visit, visit_status};
use crate::provision::provision_visits;
use crate::repo;
use serde_json::json;

fn handle_visits_provision(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(template) = state.roots.as_ref().map(|r| r.template_document_id.clone()) else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    let result = with_collaborators(state, |c| {
        let accompaniment_id = get_required_i64(&req.params, "accompanimentId")?;
        let count = get_required_i64(&req.params, "count")?;
        with_progress(|progress| {
            let visits = provision_visits(c, &template, accompaniment_id, count, progress)?;
            Ok(json!({
                "requested": count,
                "created": visits.len(),
                "visits": to_json(&visits)?,
            }))
        })
    });
    respond(&req.id, result)
}

fn handle_visits_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let accompaniment_id = get_required_i64(&req.params, "accompanimentId")?;
        let files = repo::list_visit_files(c.records, accompaniment_id)?;
        let last = repo::last_started_sequence(c.records, accompaniment_id)?;
        Ok(json!({ "visits": to_json(&files)?, "lastStartedSequence": last }))
    });
    respond(&req.id, result)
}

fn handle_visit_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        let participant_count = get_required_i64(&req.params, "participantCount")?;
        let today = get_date(&req.params)?;
        with_progress(|progress| {
            Ok(start_visit(c, &document_id, participant_count, today, progress)?)
        })
    });
    respond(&req.id, result)
}

fn handle_visit_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        to_json(&visit_status(c, &document_id)?)
    });
    respond(&req.id, result)
}

fn handle_visit_finalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        with_progress(|progress| Ok(finalize_visit(c, &document_id, progress)?))
    });
    respond(&req.id, result)
}

fn handle_visit_abandon(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let document_id = get_required_str(&req.params, "documentId")?;
        abandon_visit(c, &document_id)?;
        Ok(json!({ "documentId": document_id, "abandoned": true }))
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "visits.provision" => Some(handle_visits_provision(state, req)),
        "visits.list" => Some(handle_visits_list(state, req)),
        "visit.start" => Some(handle_visit_start(state, req)),
        "visit.status" => Some(handle_visit_status(state, req)),
        "visit.finalize" => Some(handle_visit_finalize(state, req)),
        "visit.abandon" => Some(handle_visit_abandon(state, req)),
        _ => None,
    }
}
