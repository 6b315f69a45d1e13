use std::path::PathBuf;

use crate::config::AppConfig;
use crate::gateway::drive::DriveRoots;
use crate::template::TemplateSchema;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub roots: Option<DriveRoots>,
    pub config: AppConfig,
    pub schema: TemplateSchema,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            roots: None,
            config: AppConfig::default(),
            schema: TemplateSchema::visit_report(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
