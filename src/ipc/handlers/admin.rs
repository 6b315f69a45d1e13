use crate::error::GatewayError;
use crate::gateway::{row, RecordStore, Select};
use crate::ipc::helpers::{get_required_i64, get_required_str, respond, with_collaborators, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;

/// Catalogs that hold a plain list of active names.
const NAME_CATALOGS: [&str; 5] = [
    "work_lines",
    "work_line_areas",
    "institutional_roles",
    "teaching_areas",
    "grades",
];

fn insert_unique(records: &dyn RecordStore, table: &str, values: &crate::gateway::Row) -> Result<i64, HandlerErr> {
    records.insert(table, values).map_err(|e| match e {
        GatewayError::Conflict(message) => HandlerErr {
            code: "conflict",
            message,
            details: Some(json!({ "table": table })),
        },
        other => other.into(),
    })
}

fn require_row(records: &dyn RecordStore, table: &str, id: i64) -> Result<(), HandlerErr> {
    if records.select(&Select::from(table, &["id"]).where_eq("id", id))?.is_empty() {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("{table} {id} not found"),
            details: None,
        });
    }
    Ok(())
}

fn non_empty(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let value = get_required_str(params, key)?.trim().to_string();
    if value.is_empty() {
        return Err(HandlerErr::bad_params(format!("{key} must not be empty")));
    }
    Ok(value)
}

fn handle_institutions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let name = non_empty(&req.params, "name")?;
        let folder_name = req
            .params
            .get("folderName")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| name.clone());
        let id = insert_unique(
            c.records,
            "institutions",
            &row(&[("name", json!(name)), ("folder_name", json!(folder_name))]),
        )?;
        tracing::info!(institution = id, "institution created");
        Ok(json!({ "institutionId": id, "name": name, "folderName": folder_name }))
    });
    respond(&req.id, result)
}

fn handle_professionals_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(root) = state.roots.as_ref().map(|r| r.root_folder_id.clone()) else {
        return HandlerErr::no_workspace().response(&req.id);
    };
    let result = with_collaborators(state, |c| {
        let name = non_empty(&req.params, "name")?;
        let email = non_empty(&req.params, "email")?;
        let folder = c.documents.find_or_create_folder(&root, &name)?;
        let id = insert_unique(
            c.records,
            "professionals",
            &row(&[
                ("name", json!(name)),
                ("email", json!(email)),
                ("root_folder_id", json!(folder.id)),
            ]),
        )?;
        tracing::info!(professional = id, "professional created");
        Ok(json!({ "professionalId": id, "rootFolderId": folder.id }))
    });
    respond(&req.id, result)
}

fn handle_accompaniments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let professional_id = get_required_i64(&req.params, "professionalId")?;
        let institution_id = get_required_i64(&req.params, "institutionId")?;
        require_row(c.records, "professionals", professional_id)?;
        require_row(c.records, "institutions", institution_id)?;
        let id = insert_unique(
            c.records,
            "accompaniments",
            &row(&[
                ("professional_id", json!(professional_id)),
                ("institution_id", json!(institution_id)),
            ]),
        )?;
        Ok(json!({ "accompanimentId": id }))
    });
    respond(&req.id, result)
}

fn parse_day(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{key} must be YYYY-MM-DD")))
}

fn handle_catalog_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = with_collaborators(state, |c| {
        let catalog = get_required_str(&req.params, "catalog")?;
        if catalog == "cutoff_weeks" {
            let starts_on = parse_day(&req.params, "startsOn")?;
            let ends_on = parse_day(&req.params, "endsOn")?;
            if ends_on < starts_on {
                return Err(HandlerErr::bad_params("endsOn is before startsOn"));
            }
            let id = insert_unique(
                c.records,
                "cutoff_weeks",
                &row(&[
                    ("starts_on", json!(starts_on.to_string())),
                    ("ends_on", json!(ends_on.to_string())),
                ]),
            )?;
            return Ok(json!({ "catalog": catalog, "id": id }));
        }
        if !NAME_CATALOGS.contains(&catalog.as_str()) {
            return Err(HandlerErr::bad_params(format!("unknown catalog: {catalog}")));
        }
        let name = non_empty(&req.params, "name")?;
        let active = req.params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
        let id = insert_unique(
            c.records,
            &catalog,
            &row(&[("name", json!(name)), ("active", json!(i64::from(active)))]),
        )?;
        Ok(json!({ "catalog": catalog, "id": id, "name": name }))
    });
    respond(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.institutions.create" => Some(handle_institutions_create(state, req)),
        "admin.professionals.create" => Some(handle_professionals_create(state, req)),
        "admin.accompaniments.create" => Some(handle_accompaniments_create(state, req)),
        "admin.catalog.add" => Some(handle_catalog_add(state, req)),
        _ => None,
    }
}
