//! In-memory collaborators and seed data for unit tests.

use crate::error::GatewayError;
use crate::gateway::{
    row, DocumentRef, DocumentStore, FileRef, FolderRef, RecordStore, SessionPropertyStore,
};
use crate::sheet::Sheet;
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

/// Fresh in-memory SQLite database with the workspace schema.
pub fn memory_db() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    crate::db::init_schema(&conn).expect("schema");
    conn
}

#[derive(Default)]
pub struct MemorySessionStore {
    values: RefCell<HashMap<(String, String), String>>,
}

impl SessionPropertyStore for MemorySessionStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>, GatewayError> {
        Ok(self
            .values
            .borrow()
            .get(&(scope.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, scope: &str, key: &str, value: &str) -> Result<(), GatewayError> {
        self.values
            .borrow_mut()
            .insert((scope.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, scope: &str, key: &str) -> Result<(), GatewayError> {
        self.values
            .borrow_mut()
            .remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemEntry {
    pub parent: Option<String>,
    pub name: String,
    pub kind: &'static str,
}

/// Document store kept in maps. Set `fail_locked_saves` to make saving a
/// whole-sheet-protected document fail, which is how lock failures are
/// simulated.
#[derive(Default)]
pub struct MemoryDocumentStore {
    pub entries: RefCell<BTreeMap<String, MemEntry>>,
    pub sheets: RefCell<HashMap<String, Sheet>>,
    pub files: RefCell<HashMap<String, Vec<u8>>>,
    pub fail_locked_saves: Cell<bool>,
    next: Cell<u64>,
}

impl MemoryDocumentStore {
    /// Store with a root folder and a blank template document.
    pub fn with_root(root_id: &str, template_id: &str) -> Self {
        let store = Self::default();
        store.entries.borrow_mut().insert(
            root_id.to_string(),
            MemEntry {
                parent: None,
                name: "root".into(),
                kind: "folder",
            },
        );
        store.entries.borrow_mut().insert(
            template_id.to_string(),
            MemEntry {
                parent: Some(root_id.to_string()),
                name: "Visit Template".into(),
                kind: "document",
            },
        );
        store
            .sheets
            .borrow_mut()
            .insert(template_id.to_string(), Sheet::blank("Template"));
        store
    }

    fn fresh_id(&self) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        format!("mem-{n}")
    }

    fn child(&self, parent: &str, name: &str, kind: &str) -> Option<String> {
        self.entries
            .borrow()
            .iter()
            .find(|(_, e)| e.parent.as_deref() == Some(parent) && e.name == name && e.kind == kind)
            .map(|(id, _)| id.clone())
    }

    fn require(&self, id: &str, kind: &'static str) -> Result<(), GatewayError> {
        match self.entries.borrow().get(id) {
            Some(e) if e.kind == kind => Ok(()),
            _ => Err(GatewayError::missing(kind, id)),
        }
    }

    pub fn children(&self, parent: &str) -> Vec<(String, MemEntry)> {
        self.entries
            .borrow()
            .iter()
            .filter(|(_, e)| e.parent.as_deref() == Some(parent))
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.entries.borrow().values().filter(|e| e.kind == kind).count()
    }

    pub fn sheet(&self, id: &str) -> Sheet {
        self.sheets.borrow().get(id).cloned().expect("sheet exists")
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find_or_create_folder(&self, parent_id: &str, name: &str) -> Result<FolderRef, GatewayError> {
        self.require(parent_id, "folder")?;
        if let Some(id) = self.child(parent_id, name, "folder") {
            return Ok(FolderRef {
                id,
                name: name.to_string(),
            });
        }
        let id = self.fresh_id();
        self.entries.borrow_mut().insert(
            id.clone(),
            MemEntry {
                parent: Some(parent_id.to_string()),
                name: name.to_string(),
                kind: "folder",
            },
        );
        Ok(FolderRef {
            id,
            name: name.to_string(),
        })
    }

    fn find_document(&self, folder_id: &str, name: &str) -> Result<Option<DocumentRef>, GatewayError> {
        Ok(self.child(folder_id, name, "document").map(|id| DocumentRef {
            id,
            name: name.to_string(),
        }))
    }

    fn create_document(&self, folder_id: &str, name: &str, sheet: &Sheet) -> Result<DocumentRef, GatewayError> {
        self.require(folder_id, "folder")?;
        let id = self.fresh_id();
        self.entries.borrow_mut().insert(
            id.clone(),
            MemEntry {
                parent: Some(folder_id.to_string()),
                name: name.to_string(),
                kind: "document",
            },
        );
        self.sheets.borrow_mut().insert(id.clone(), sheet.clone());
        Ok(DocumentRef {
            id,
            name: name.to_string(),
        })
    }

    fn copy_document(&self, source_id: &str, folder_id: &str, name: &str) -> Result<DocumentRef, GatewayError> {
        let sheet = self.open_sheet(source_id)?;
        self.create_document(folder_id, name, &sheet)
    }

    fn move_file(&self, file_id: &str, folder_id: &str) -> Result<(), GatewayError> {
        self.require(folder_id, "folder")?;
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .get_mut(file_id)
            .ok_or_else(|| GatewayError::missing("file", file_id))?;
        entry.parent = Some(folder_id.to_string());
        Ok(())
    }

    fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        bytes: &[u8],
        _mime_type: &str,
    ) -> Result<FileRef, GatewayError> {
        self.require(folder_id, "folder")?;
        let id = self.fresh_id();
        self.entries.borrow_mut().insert(
            id.clone(),
            MemEntry {
                parent: Some(folder_id.to_string()),
                name: name.to_string(),
                kind: "file",
            },
        );
        self.files.borrow_mut().insert(id.clone(), bytes.to_vec());
        Ok(FileRef {
            url: format!("mem://{id}"),
            id,
            name: name.to_string(),
            sha256: format!("{:x}", Sha256::digest(bytes)),
        })
    }

    fn parent_of(&self, id: &str) -> Result<Option<String>, GatewayError> {
        self.entries
            .borrow()
            .get(id)
            .map(|e| e.parent.clone())
            .ok_or_else(|| GatewayError::missing("drive entry", id))
    }

    fn open_sheet(&self, document_id: &str) -> Result<Sheet, GatewayError> {
        self.sheets
            .borrow()
            .get(document_id)
            .cloned()
            .ok_or_else(|| GatewayError::missing("document", document_id))
    }

    fn save_sheet(&self, document_id: &str, sheet: &Sheet) -> Result<(), GatewayError> {
        self.require(document_id, "document")?;
        if self.fail_locked_saves.get() && crate::lock::is_locked(sheet) {
            return Err(GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "protection service unavailable",
            )));
        }
        self.sheets
            .borrow_mut()
            .insert(document_id.to_string(), sheet.clone());
        Ok(())
    }
}

pub struct Seeded {
    pub institution_id: i64,
    pub professional_id: i64,
    pub accompaniment_id: i64,
    pub cutoff_week_id: i64,
    pub work_line_ids: Vec<i64>,
}

pub const ROOT_FOLDER: &str = "root-ana";
pub const TEMPLATE_DOCUMENT: &str = "template";

/// One institution, one professional whose root folder is `ROOT_FOLDER`,
/// their accompaniment, a cut-off week covering 2026-03-02..=2026-03-08 and
/// the catalogs the visit template reads.
pub fn seed_basics(store: &dyn RecordStore) -> Seeded {
    let institution_id = store
        .insert(
            "institutions",
            &row(&[("name", json!("IE San Jose")), ("folder_name", json!("IE San Jose"))]),
        )
        .expect("institution");
    let professional_id = store
        .insert(
            "professionals",
            &row(&[
                ("name", json!("Ana Ruiz")),
                ("email", json!("ana@example.org")),
                ("root_folder_id", json!(ROOT_FOLDER)),
            ]),
        )
        .expect("professional");
    let accompaniment_id = store
        .insert(
            "accompaniments",
            &row(&[
                ("professional_id", json!(professional_id)),
                ("institution_id", json!(institution_id)),
            ]),
        )
        .expect("accompaniment");
    let cutoff_week_id = store
        .insert(
            "cutoff_weeks",
            &row(&[("starts_on", json!("2026-03-02")), ("ends_on", json!("2026-03-08"))]),
        )
        .expect("cutoff week");
    let work_line_ids = ["Reading", "Study Plans"]
        .iter()
        .map(|name| {
            store
                .insert("work_lines", &row(&[("name", json!(name))]))
                .expect("work line")
        })
        .collect();
    store
        .insert("work_line_areas", &row(&[("name", json!("Maths"))]))
        .expect("area");
    for role in ["Teacher", "Parent"] {
        store
            .insert("institutional_roles", &row(&[("name", json!(role))]))
            .expect("role");
    }
    Seeded {
        institution_id,
        professional_id,
        accompaniment_id,
        cutoff_week_id,
        work_line_ids,
    }
}
