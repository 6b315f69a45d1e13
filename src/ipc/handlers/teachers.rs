use crate::ipc::helpers::{get_required_i64, get_required_str, respond, to_json, with_collaborators, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::teachers::{find_teacher, save_teacher, TeacherProfile};
use serde_json::json;

fn handle_teachers_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let institution_id = get_required_i64(&req.params, "institutionId")?;
        let raw = req
            .params
            .get("profile")
            .cloned()
            .ok_or_else(|| HandlerErr::bad_params("missing profile"))?;
        let profile: TeacherProfile = serde_json::from_value(raw)
            .map_err(|e| HandlerErr::bad_params(format!("invalid profile: {e}")))?;
        let saved = save_teacher(c.records, &profile, institution_id)?;
        to_json(&saved)
    });
    respond(&req.id, result)
}

fn handle_teachers_find(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let id_type = get_required_i64(&req.params, "idType")?;
        let id_number = get_required_str(&req.params, "idNumber")?;
        let institution_id = get_required_i64(&req.params, "institutionId")?;
        let found = find_teacher(c.records, id_type, &id_number, institution_id)?;
        Ok(json!({ "teacher": to_json(&found)? }))
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.save" => Some(handle_teachers_save(state, req)),
        "teachers.find" => Some(handle_teachers_find(state, req)),
        _ => None,
    }
}
