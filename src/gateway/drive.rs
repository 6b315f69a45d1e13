//! Document store backed by the workspace file tree.
//!
//! Every folder, document and uploaded file gets an opaque uuid. The
//! `drive_entries` table maps that id to a path relative to `<workspace>/drive`,
//! so callers never see filesystem paths except through upload URLs.
//! Documents are stored as pretty-printed `Sheet` JSON.

use super::{DocumentRef, DocumentStore, FileRef, FolderRef};
use crate::error::GatewayError;
use crate::sheet::Sheet;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const ROOTS_KEY: &str = "drive.roots";
const TEMPLATES_FOLDER: &str = "Templates";
const TEMPLATE_DOCUMENT: &str = "Visit Template";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveRoots {
    pub root_folder_id: String,
    pub template_document_id: String,
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    parent_id: Option<String>,
    name: String,
    kind: String,
    rel_path: String,
}

pub struct FsDocumentStore<'a> {
    conn: &'a Connection,
    base: PathBuf,
}

fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '-',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "untitled".to_string(),
        _ => cleaned,
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn join_rel(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

impl<'a> FsDocumentStore<'a> {
    pub fn new(conn: &'a Connection, workspace: &Path) -> Self {
        Self {
            conn,
            base: workspace.join("drive"),
        }
    }

    fn abs(&self, rel: &str) -> PathBuf {
        let mut p = self.base.clone();
        for part in rel.split('/').filter(|s| !s.is_empty()) {
            p.push(part);
        }
        p
    }

    fn entry(&self, id: &str) -> Result<Entry, GatewayError> {
        self.conn
            .query_row(
                "SELECT id, parent_id, name, kind, rel_path FROM drive_entries WHERE id = ?",
                [id],
                |r| {
                    Ok(Entry {
                        id: r.get(0)?,
                        parent_id: r.get(1)?,
                        name: r.get(2)?,
                        kind: r.get(3)?,
                        rel_path: r.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| GatewayError::missing("drive entry", id))
    }

    fn folder(&self, id: &str) -> Result<Entry, GatewayError> {
        let e = self.entry(id)?;
        if e.kind != "folder" {
            return Err(GatewayError::missing("folder", id));
        }
        Ok(e)
    }

    fn child(&self, parent_id: &str, name: &str, kind: &str) -> Result<Option<Entry>, GatewayError> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM drive_entries
                 WHERE parent_id = ? AND name = ? AND kind = ?
                 ORDER BY created_at LIMIT 1",
                (parent_id, name, kind),
                |r| r.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(Some(self.entry(&id)?)),
            None => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &self,
        id: &str,
        parent_id: Option<&str>,
        name: &str,
        kind: &str,
        rel_path: &str,
        mime_type: Option<&str>,
        sha256: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.conn.execute(
            "INSERT INTO drive_entries(id, parent_id, name, kind, rel_path, mime_type, sha256, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id,
                parent_id,
                name,
                kind,
                rel_path,
                mime_type,
                sha256,
                chrono::Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    fn write_sheet(&self, rel: &str, sheet: &Sheet) -> Result<(), GatewayError> {
        let path = self.abs(rel);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(sheet)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Creates the drive root and the blank visit template on first use and
    /// returns their ids on every later call.
    pub fn bootstrap(&self, template_sheet: &str) -> anyhow::Result<DriveRoots> {
        if let Some(saved) = crate::db::settings_get_json(self.conn, ROOTS_KEY)? {
            if let Ok(roots) = serde_json::from_value::<DriveRoots>(saved) {
                if self.entry(&roots.root_folder_id).is_ok()
                    && self.entry(&roots.template_document_id).is_ok()
                {
                    return Ok(roots);
                }
                tracing::warn!("drive roots point at missing entries; recreating");
            }
        }

        std::fs::create_dir_all(&self.base)?;
        let root_id = Uuid::new_v4().to_string();
        self.register(&root_id, None, "drive", "folder", "", None, None)?;
        let templates = self.find_or_create_folder(&root_id, TEMPLATES_FOLDER)?;
        let template = self.create_document(&templates.id, TEMPLATE_DOCUMENT, &Sheet::blank(template_sheet))?;

        let roots = DriveRoots {
            root_folder_id: root_id,
            template_document_id: template.id,
        };
        crate::db::settings_set_json(self.conn, ROOTS_KEY, &serde_json::to_value(&roots)?)?;
        tracing::info!(root = %roots.root_folder_id, "drive initialised");
        Ok(roots)
    }

    #[cfg(test)]
    pub fn path_of(&self, id: &str) -> Result<PathBuf, GatewayError> {
        Ok(self.abs(&self.entry(id)?.rel_path))
    }
}

impl DocumentStore for FsDocumentStore<'_> {
    fn find_or_create_folder(&self, parent_id: &str, name: &str) -> Result<FolderRef, GatewayError> {
        let parent = self.folder(parent_id)?;
        if let Some(existing) = self.child(&parent.id, name, "folder")? {
            return Ok(FolderRef {
                id: existing.id,
                name: existing.name,
            });
        }
        let id = Uuid::new_v4().to_string();
        let rel = join_rel(&parent.rel_path, &safe_name(name));
        std::fs::create_dir_all(self.abs(&rel))?;
        self.register(&id, Some(&parent.id), name, "folder", &rel, None, None)?;
        tracing::debug!(%id, name, "folder created");
        Ok(FolderRef {
            id,
            name: name.to_string(),
        })
    }

    fn find_document(&self, folder_id: &str, name: &str) -> Result<Option<DocumentRef>, GatewayError> {
        Ok(self.child(folder_id, name, "document")?.map(|e| DocumentRef {
            id: e.id,
            name: e.name,
        }))
    }

    fn create_document(&self, folder_id: &str, name: &str, sheet: &Sheet) -> Result<DocumentRef, GatewayError> {
        let parent = self.folder(folder_id)?;
        let id = Uuid::new_v4().to_string();
        let rel = join_rel(
            &parent.rel_path,
            &format!("{}-{}.sheet.json", safe_name(name), short(&id)),
        );
        self.write_sheet(&rel, sheet)?;
        self.register(&id, Some(&parent.id), name, "document", &rel, Some("application/json"), None)?;
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
        let entry = self.entry(file_id)?;
        let dest = self.folder(folder_id)?;
        let file_name = entry
            .rel_path
            .rsplit('/')
            .next()
            .unwrap_or(entry.rel_path.as_str())
            .to_string();
        let rel = join_rel(&dest.rel_path, &file_name);
        std::fs::rename(self.abs(&entry.rel_path), self.abs(&rel))?;
        self.conn.execute(
            "UPDATE drive_entries SET parent_id = ?, rel_path = ? WHERE id = ?",
            (&dest.id, &rel, &entry.id),
        )?;
        tracing::debug!(id = %entry.id, from = ?entry.parent_id, to = %dest.id, "file moved");
        Ok(())
    }

    fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<FileRef, GatewayError> {
        let parent = self.folder(folder_id)?;
        let id = Uuid::new_v4().to_string();
        let rel = join_rel(&parent.rel_path, &format!("{}-{}", short(&id), safe_name(name)));
        let path = self.abs(&rel);
        std::fs::write(&path, bytes)?;
        let sha256 = format!("{:x}", Sha256::digest(bytes));
        self.register(&id, Some(&parent.id), name, "file", &rel, Some(mime_type), Some(&sha256))?;
        Ok(FileRef {
            id,
            name: name.to_string(),
            url: format!("file://{}", path.display()),
            sha256,
        })
    }

    fn parent_of(&self, id: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.entry(id)?.parent_id)
    }

    fn open_sheet(&self, document_id: &str) -> Result<Sheet, GatewayError> {
        let entry = self.entry(document_id)?;
        if entry.kind != "document" {
            return Err(GatewayError::missing("document", document_id));
        }
        let raw = std::fs::read(self.abs(&entry.rel_path))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn save_sheet(&self, document_id: &str, sheet: &Sheet) -> Result<(), GatewayError> {
        let entry = self.entry(document_id)?;
        if entry.kind != "document" {
            return Err(GatewayError::missing("document", document_id));
        }
        self.write_sheet(&entry.rel_path, sheet)
    }
}
