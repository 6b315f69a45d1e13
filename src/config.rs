use serde::{Deserialize, Serialize};

pub const SETTINGS_KEY: &str = "app.config";

/// Workspace-level settings. Every field has a default so partially written
/// or older settings blobs still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Identity kept as the sole editor of protected ranges and locked reports.
    pub owner_editor: String,
    pub reports_folder_name: String,
    pub report_document_prefix: String,
    pub report_sheet_name: String,
    pub accompaniment_folder_name: String,
    pub evidence_folder_name: String,
    pub removed_folder_name: String,
    pub visit_document_prefix: String,
    pub visit_sheet_name: String,
    pub participants_start_row: u32,
    /// Work lines that reveal the area row.
    pub area_trigger_values: Vec<String>,
    /// Institutional roles whose name cell is restricted to registered teachers.
    pub teacher_role_values: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            owner_editor: "visitd@localhost".to_string(),
            reports_folder_name: "Reports".to_string(),
            report_document_prefix: "Accompaniment Report".to_string(),
            report_sheet_name: "Visits".to_string(),
            accompaniment_folder_name: "1. Accompaniment".to_string(),
            evidence_folder_name: "Evidence".to_string(),
            removed_folder_name: "REMOVED".to_string(),
            visit_document_prefix: "Accompaniment follow-up - Visit".to_string(),
            visit_sheet_name: "Visit".to_string(),
            participants_start_row: 21,
            area_trigger_values: vec!["Study Plans".to_string()],
            teacher_role_values: vec![
                "Teacher".to_string(),
                "Principal".to_string(),
                "Coordinator".to_string(),
                "Tutor".to_string(),
            ],
        }
    }
}

impl AppConfig {
    pub fn load(conn: &rusqlite::Connection) -> anyhow::Result<Self> {
        match crate::db::settings_get_json(conn, SETTINGS_KEY)? {
            Some(saved) => match serde_json::from_value::<AppConfig>(saved) {
                Ok(cfg) => Ok(cfg),
                Err(e) => {
                    // Malformed historical values must not keep the workspace closed.
                    tracing::warn!("ignoring malformed {SETTINGS_KEY}: {e}");
                    Ok(Self::default())
                }
            },
            None => Ok(Self::default()),
        }
    }

    /// Applies a camelCase JSON patch over the current values.
    pub fn merged(&self, patch: &serde_json::Map<String, serde_json::Value>) -> Result<Self, String> {
        let mut current = serde_json::to_value(self).map_err(|e| e.to_string())?;
        let Some(obj) = current.as_object_mut() else {
            return Err("config must serialize to an object".to_string());
        };
        for (k, v) in patch {
            if !obj.contains_key(k) {
                return Err(format!("unknown config field: {k}"));
            }
            obj.insert(k.clone(), v.clone());
        }
        let next: AppConfig = serde_json::from_value(current).map_err(|e| e.to_string())?;
        if next.owner_editor.trim().is_empty() {
            return Err("ownerEditor must not be empty".to_string());
        }
        if next.participants_start_row < 21 {
            return Err("participantsStartRow must be below the header (>= 21)".to_string());
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_blob_fills_defaults() {
        let cfg: AppConfig = serde_json::from_value(json!({ "ownerEditor": "ops@example.org" }))
            .expect("parse");
        assert_eq!(cfg.owner_editor, "ops@example.org");
        assert_eq!(cfg.reports_folder_name, "Reports");
    }

    #[test]
    fn merge_rejects_unknown_and_invalid_fields() {
        let base = AppConfig::default();
        let patch = json!({ "nope": 1 });
        assert!(base.merged(patch.as_object().expect("obj")).is_err());

        let patch = json!({ "ownerEditor": " " });
        assert!(base.merged(patch.as_object().expect("obj")).is_err());

        let patch = json!({ "removedFolderName": "TRASH" });
        let next = base.merged(patch.as_object().expect("obj")).expect("merge");
        assert_eq!(next.removed_folder_name, "TRASH");
    }
}
