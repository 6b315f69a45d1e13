//! Contracts of the external collaborators the lifecycle depends on.
//!
//! Production code talks to SQLite and the workspace file tree through the
//! implementations in the submodules; tests swap in the fakes from
//! `crate::testing`.

pub mod catalog;
pub mod drive;
pub mod properties;
pub mod records;

use crate::error::GatewayError;
use crate::sheet::Sheet;
use crate::template::DynamicSource;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

pub use catalog::RecordCatalog;
pub use drive::FsDocumentStore;
pub use properties::SqliteSessionStore;
pub use records::SqliteRecordStore;

/// One record, keyed by bare column name.
pub type Row = serde_json::Map<String, Value>;

/// Progress sink for long-running operations.
pub type ProgressReporter<'a> = &'a mut dyn FnMut(&str);

pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    /// Column of the joined table.
    pub on: String,
    /// Qualified column it must equal (`"visits.id"`).
    pub equals: String,
}

/// Filtered query against one table, optionally joined with others.
///
/// Columns may be qualified (`"teachers.first_name"`); rows come back keyed
/// by the bare column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub joins: Vec<Join>,
    pub filters: Vec<(String, Value)>,
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: &str, columns: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            joins: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn join(mut self, table: &str, on: &str, equals: &str) -> Self {
        self.joins.push(Join {
            table: table.to_string(),
            on: on.to_string(),
            equals: equals.to_string(),
        });
        self
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), true));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), false));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Bare column name of a possibly qualified reference.
pub fn bare_column(reference: &str) -> &str {
    reference.rsplit('.').next().unwrap_or(reference)
}

/// Table and column names only ever come from code, but they are spliced
/// into SQL, so anything outside `[A-Za-z0-9_.]` is refused.
pub fn check_identifier(name: &str) -> Result<&str, GatewayError> {
    let ok = !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if ok {
        Ok(name)
    } else {
        Err(GatewayError::BadIdentifier(name.to_string()))
    }
}

pub trait RecordStore {
    fn select(&self, query: &Select) -> Result<Vec<Row>, GatewayError>;

    /// Inserts one row and returns its id.
    fn insert(&self, table: &str, row: &Row) -> Result<i64, GatewayError>;

    fn insert_many(&self, table: &str, rows: &[Row]) -> Result<Vec<i64>, GatewayError> {
        rows.iter().map(|r| self.insert(table, r)).collect()
    }

    /// Applies `patch` to every row matching all of `filter`.
    fn update(&self, table: &str, patch: &Row, filter: &Row) -> Result<usize, GatewayError>;

    fn delete(&self, table: &str, filter: &Row) -> Result<usize, GatewayError>;

    /// Runs `work` so that either all of its writes land or none do.
    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn RecordStore) -> Result<(), GatewayError>,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherName {
    pub teacher_id: i64,
    pub full_name: String,
}

pub trait CatalogGateway {
    fn resolve_id(&self, table: &str, column: &str, value: &str) -> Result<Option<i64>, GatewayError>;

    fn list_active_values(&self, source: &DynamicSource) -> Result<Vec<String>, GatewayError>;

    /// Cut-off week whose inclusive range contains `date`.
    fn find_cutoff_week(&self, date: NaiveDate) -> Result<Option<i64>, GatewayError>;

    fn list_institution_teachers(&self, institution_id: i64) -> Result<Vec<TeacherName>, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub url: String,
    pub sha256: String,
}

pub trait DocumentStore {
    /// Returns the child folder called `name`, creating it when absent.
    fn find_or_create_folder(&self, parent_id: &str, name: &str) -> Result<FolderRef, GatewayError>;

    /// Document called `name` directly inside `folder_id`, if any.
    fn find_document(&self, folder_id: &str, name: &str) -> Result<Option<DocumentRef>, GatewayError>;

    fn create_document(&self, folder_id: &str, name: &str, sheet: &Sheet) -> Result<DocumentRef, GatewayError>;

    fn copy_document(&self, source_id: &str, folder_id: &str, name: &str) -> Result<DocumentRef, GatewayError>;

    fn move_file(&self, file_id: &str, folder_id: &str) -> Result<(), GatewayError>;

    fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<FileRef, GatewayError>;

    fn parent_of(&self, id: &str) -> Result<Option<String>, GatewayError>;

    fn open_sheet(&self, document_id: &str) -> Result<Sheet, GatewayError>;

    fn save_sheet(&self, document_id: &str, sheet: &Sheet) -> Result<(), GatewayError>;
}

/// Key/value cache scoped per document.
pub trait SessionPropertyStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>, GatewayError>;

    fn set(&self, scope: &str, key: &str, value: &str) -> Result<(), GatewayError>;

    fn delete(&self, scope: &str, key: &str) -> Result<(), GatewayError>;
}

pub fn value_i64(row: &Row, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_str(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
