use crate::error::VisitError;
use crate::gateway::{FsDocumentStore, RecordCatalog, SqliteRecordStore, SqliteSessionStore};
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::orchestrator::Collaborators;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn no_workspace() -> Self {
        Self {
            code: "no_workspace",
            message: "select a workspace first".to_string(),
            details: None,
        }
    }
}

impl From<VisitError> for HandlerErr {
    fn from(e: VisitError) -> Self {
        match &e {
            VisitError::PersistenceFailure(_) | VisitError::LockFailure(_) => {
                tracing::error!(code = e.code(), "{e}")
            }
            _ => tracing::warn!(code = e.code(), "{e}"),
        }
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<crate::error::GatewayError> for HandlerErr {
    fn from(e: crate::error::GatewayError) -> Self {
        VisitError::from(e).into()
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// `params.date` as `YYYY-MM-DD`, defaulting to today in local time.
pub fn get_date(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params(format!("date must be YYYY-MM-DD, got {raw}"))),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

/// Builds the SQLite and file-tree collaborators for the open workspace and
/// runs `work` against them.
pub fn with_collaborators<T>(
    state: &AppState,
    work: impl FnOnce(&Collaborators<'_>) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let (Some(conn), Some(workspace)) = (state.db.as_ref(), state.workspace.as_ref()) else {
        return Err(HandlerErr::no_workspace());
    };
    let records = SqliteRecordStore::new(conn);
    let catalog = RecordCatalog::new(&records);
    let documents = FsDocumentStore::new(conn, workspace);
    let sessions = SqliteSessionStore::new(conn);
    let c = Collaborators {
        records: &records,
        catalog: &catalog,
        documents: &documents,
        sessions: &sessions,
        schema: &state.schema,
        config: &state.config,
    };
    work(&c)
}

/// Runs `work` with a progress sink and returns its result with the collected
/// messages under `progress`.
pub fn with_progress<T: Serialize>(
    work: impl FnOnce(&mut dyn FnMut(&str)) -> Result<T, HandlerErr>,
) -> Result<serde_json::Value, HandlerErr> {
    let mut progress: Vec<String> = Vec::new();
    let value = work(&mut |m: &str| progress.push(m.to_string()))?;
    let mut out = to_json(&value)?;
    match out.as_object_mut() {
        Some(obj) => {
            obj.insert("progress".to_string(), json!(progress));
        }
        None => {
            out = json!({ "value": out, "progress": progress });
        }
    }
    Ok(out)
}
