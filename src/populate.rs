//! Staged edits of an in-progress visit: notes and evidence.
//!
//! Nothing here writes to the record store. Every mutation updates the
//! session blobs, rewrites the summary cells of the document and marks the
//! visit dirty.

use crate::error::VisitError;
use crate::orchestrator::{refresh_summaries, resume_session, visit_file_for, Collaborators};
use crate::repo;
use crate::session::{SessionContext, VisitStatus};
use crate::staging::{self, EvidenceDescriptor, EvidenceState, NoteCategory, StagedNotes};
use serde::Serialize;

fn require_in_progress(c: &Collaborators<'_>, ctx: &SessionContext<'_>) -> Result<(), VisitError> {
    match resume_session(c, ctx)? {
        VisitStatus::InProgress => Ok(()),
        VisitStatus::NotStarted => Err(VisitError::NotStarted),
        VisitStatus::Finalized => Err(VisitError::ValidationFailed(
            "visit is already finalized".to_string(),
        )),
    }
}

fn touched(c: &Collaborators<'_>, ctx: &SessionContext<'_>) -> Result<(), VisitError> {
    refresh_summaries(c, ctx)?;
    ctx.mark_dirty()?;
    Ok(())
}

pub fn stage_visit_note(
    c: &Collaborators<'_>,
    document_id: &str,
    working_line: &str,
    category: NoteCategory,
    text: &str,
) -> Result<StagedNotes, VisitError> {
    let ctx = c.session(document_id);
    require_in_progress(c, &ctx)?;
    let notes = staging::stage_note(&ctx, working_line, category, text)?;
    touched(c, &ctx)?;
    Ok(notes)
}

pub fn replace_visit_notes(
    c: &Collaborators<'_>,
    document_id: &str,
    notes: StagedNotes,
) -> Result<StagedNotes, VisitError> {
    let ctx = c.session(document_id);
    require_in_progress(c, &ctx)?;
    let notes = staging::replace_notes(&ctx, notes)?;
    touched(c, &ctx)?;
    Ok(notes)
}

pub fn staged_notes(c: &Collaborators<'_>, document_id: &str) -> Result<StagedNotes, VisitError> {
    Ok(staging::load_notes(&c.session(document_id))?)
}

/// One file handed over for upload.
#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    pub evidence_type: String,
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    pub original_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvidenceOutcome {
    pub staged: Vec<EvidenceDescriptor>,
    pub failures: Vec<UploadFailure>,
}

/// Staged entries, else the stored evidence of the visit (which then seeds
/// the staging cache), else nothing.
fn current_entries(
    c: &Collaborators<'_>,
    ctx: &SessionContext<'_>,
) -> Result<Vec<EvidenceDescriptor>, VisitError> {
    if let Some(staged) = staging::load_evidence(ctx)? {
        return Ok(staged);
    }
    let visit_id = match ctx.visit_id()? {
        Some(id) => Some(id),
        None => visit_file_for(c, ctx.document_id())?.visit_id,
    };
    let Some(visit_id) = visit_id else {
        return Ok(Vec::new());
    };
    let stored: Vec<EvidenceDescriptor> = repo::list_evidence(c.records, visit_id)?
        .into_iter()
        .map(|r| EvidenceDescriptor {
            evidence_type: r.evidence_type,
            original_name: r.original_name,
            url: r.url,
            mime_type: r.mime_type,
            state: if r.state == EvidenceState::Deleted.as_str() {
                EvidenceState::Deleted
            } else {
                EvidenceState::Active
            },
            storage_id: r.storage_id,
            uploaded_at: Some(r.uploaded_at),
            sha256: r.sha256,
        })
        .collect();
    if !stored.is_empty() {
        tracing::debug!(visit = visit_id, count = stored.len(), "staging re-seeded from stored evidence");
        staging::save_evidence(ctx, &stored)?;
    }
    Ok(stored)
}

/// Active evidence of the visit document.
pub fn list_visit_evidence(
    c: &Collaborators<'_>,
    document_id: &str,
) -> Result<Vec<EvidenceDescriptor>, VisitError> {
    let ctx = c.session(document_id);
    Ok(current_entries(c, &ctx)?
        .into_iter()
        .filter(|e| e.is_active())
        .collect())
}

/// Uploads each file into the evidence folder of the visit as
/// `<type>_<original name>` and stages a descriptor for it. A failed upload
/// is reported and does not stop the others.
pub fn stage_evidence(
    c: &Collaborators<'_>,
    document_id: &str,
    uploads: Vec<EvidenceUpload>,
) -> Result<StageEvidenceOutcome, VisitError> {
    let ctx = c.session(document_id);
    require_in_progress(c, &ctx)?;
    let file = visit_file_for(c, document_id)?;
    let mut entries = current_entries(c, &ctx)?;

    let mut outcome = StageEvidenceOutcome::default();
    for upload in uploads {
        let evidence_type = upload.evidence_type.trim();
        let original_name = upload.original_name.trim();
        if evidence_type.is_empty() || original_name.is_empty() {
            outcome.failures.push(UploadFailure {
                original_name: upload.original_name.clone(),
                message: "evidence type and file name are required".to_string(),
            });
            continue;
        }
        let stored_name = format!("{evidence_type}_{original_name}");
        match c.documents.upload_file(
            &file.evidence_folder_id,
            &stored_name,
            &upload.bytes,
            &upload.mime_type,
        ) {
            Ok(uploaded) => {
                let entry = EvidenceDescriptor {
                    evidence_type: evidence_type.to_string(),
                    original_name: original_name.to_string(),
                    url: uploaded.url,
                    mime_type: upload.mime_type.clone(),
                    state: EvidenceState::Active,
                    storage_id: uploaded.id,
                    uploaded_at: Some(repo::now_ts()),
                    sha256: Some(uploaded.sha256),
                };
                entries.push(entry.clone());
                outcome.staged.push(entry);
            }
            Err(e) => {
                tracing::warn!(document = document_id, file = %stored_name, "evidence upload failed: {e}");
                outcome.failures.push(UploadFailure {
                    original_name: original_name.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    if !outcome.staged.is_empty() {
        staging::save_evidence(&ctx, &entries)?;
        touched(c, &ctx)?;
    }
    Ok(outcome)
}

/// Soft delete: moves the first active file of `evidence_type` into the
/// removed folder beside it and marks the staged entry deleted.
pub fn remove_staged_evidence(
    c: &Collaborators<'_>,
    document_id: &str,
    evidence_type: &str,
) -> Result<EvidenceDescriptor, VisitError> {
    let ctx = c.session(document_id);
    require_in_progress(c, &ctx)?;
    let mut entries = current_entries(c, &ctx)?;
    let wanted = evidence_type.trim();
    let Some(index) = entries
        .iter()
        .position(|e| e.is_active() && e.evidence_type == wanted)
    else {
        return Err(VisitError::NotFound(format!(
            "no active evidence of type {wanted}"
        )));
    };

    let storage_id = entries[index].storage_id.clone();
    let parent = c
        .documents
        .parent_of(&storage_id)?
        .ok_or_else(|| VisitError::NotFound(format!("file {storage_id} has no folder")))?;
    let removed = c
        .documents
        .find_or_create_folder(&parent, &c.config.removed_folder_name)?;
    c.documents.move_file(&storage_id, &removed.id)?;

    entries[index].state = EvidenceState::Deleted;
    staging::save_evidence(&ctx, &entries)?;
    touched(c, &ctx)?;
    tracing::info!(document = document_id, evidence_type = wanted, "evidence moved to removed folder");
    Ok(entries[index].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::gateway::{DocumentStore, RecordCatalog, RecordStore, SqliteRecordStore};
    use crate::orchestrator::start_visit;
    use crate::provision::provision_visits;
    use crate::template::{self, TemplateSchema};
    use crate::testing::{
        memory_db, seed_basics, MemoryDocumentStore, MemorySessionStore, ROOT_FOLDER,
        TEMPLATE_DOCUMENT,
    };
    use chrono::NaiveDate;

    fn upload(kind: &str, name: &str) -> EvidenceUpload {
        EvidenceUpload {
            evidence_type: kind.into(),
            original_name: name.into(),
            mime_type: "image/jpeg".into(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn evidence_staging_and_soft_delete() {
        let conn = memory_db();
        let records = SqliteRecordStore::new(&conn);
        let seeded = seed_basics(&records);
        let catalog = RecordCatalog::new(&records);
        let documents = MemoryDocumentStore::with_root(ROOT_FOLDER, TEMPLATE_DOCUMENT);
        let sessions = MemorySessionStore::default();
        let schema = TemplateSchema::visit_report();
        let config = AppConfig::default();
        let c = Collaborators {
            records: &records,
            catalog: &catalog,
            documents: &documents,
            sessions: &sessions,
            schema: &schema,
            config: &config,
        };
        let visit = provision_visits(&c, TEMPLATE_DOCUMENT, seeded.accompaniment_id, 1, &mut |_| {})
            .expect("provision")
            .remove(0);
        let doc = visit.document_id.as_str();

        let before_start = stage_evidence(&c, doc, vec![upload("Photo", "a.jpg")]).expect_err("not started");
        assert!(matches!(before_start, VisitError::NotStarted));

        let day = NaiveDate::from_ymd_opt(2026, 3, 3).expect("date");
        start_visit(&c, doc, 1, day, &mut |_| {}).expect("start");

        let out = stage_evidence(
            &c,
            doc,
            vec![upload("Photo", "a.jpg"), upload("", "b.jpg"), upload("Photo", "c.jpg")],
        )
        .expect("stage");
        assert_eq!(out.staged.len(), 2);
        assert_eq!(out.failures.len(), 1);
        let names: Vec<String> = documents
            .children(&visit.evidence_folder_id)
            .into_iter()
            .map(|(_, e)| e.name)
            .collect();
        assert!(names.contains(&"Photo_a.jpg".to_string()));

        let sheet = documents.sheet(doc);
        assert_eq!(
            sheet.get_str(template::EVIDENCE).as_deref(),
            Some("Photo (a.jpg)\nPhoto (c.jpg)")
        );
        assert!(c.session(doc).is_dirty().expect("dirty"));

        let removed = remove_staged_evidence(&c, doc, "Photo").expect("remove");
        assert_eq!(removed.original_name, "a.jpg");
        let parent = documents.parent_of(&removed.storage_id).expect("parent").expect("some");
        assert_eq!(documents.entries.borrow()[&parent].name, "REMOVED");

        let listed = list_visit_evidence(&c, doc).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_name, "c.jpg");

        remove_staged_evidence(&c, doc, "Photo").expect("remove second");
        assert!(matches!(
            remove_staged_evidence(&c, doc, "Photo"),
            Err(VisitError::NotFound(_))
        ));
        assert_eq!(
            documents.sheet(doc).get_str(template::EVIDENCE).as_deref(),
            Some("No evidence uploaded.")
        );
    }

    #[test]
    fn listing_falls_back_to_stored_evidence() {
        let conn = memory_db();
        let records = SqliteRecordStore::new(&conn);
        let seeded = seed_basics(&records);
        let catalog = RecordCatalog::new(&records);
        let documents = MemoryDocumentStore::with_root(ROOT_FOLDER, TEMPLATE_DOCUMENT);
        let sessions = MemorySessionStore::default();
        let schema = TemplateSchema::visit_report();
        let config = AppConfig::default();
        let c = Collaborators {
            records: &records,
            catalog: &catalog,
            documents: &documents,
            sessions: &sessions,
            schema: &schema,
            config: &config,
        };
        let visit = provision_visits(&c, TEMPLATE_DOCUMENT, seeded.accompaniment_id, 1, &mut |_| {})
            .expect("provision")
            .remove(0);
        let doc = visit.document_id.as_str();
        assert!(list_visit_evidence(&c, doc).expect("empty").is_empty());

        let day = NaiveDate::from_ymd_opt(2026, 3, 3).expect("date");
        let started = start_visit(&c, doc, 1, day, &mut |_| {}).expect("start");
        let stored = EvidenceDescriptor {
            evidence_type: "Attendance".into(),
            original_name: "list.pdf".into(),
            url: "mem://old".into(),
            mime_type: "application/pdf".into(),
            state: EvidenceState::Active,
            storage_id: "mem-old".into(),
            uploaded_at: Some("2026-03-03T10:00:00Z".into()),
            sha256: None,
        };
        records
            .insert("evidence", &repo::evidence_row(started.visit_id, &stored))
            .expect("stored evidence");

        let listed = list_visit_evidence(&c, doc).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].evidence_type, "Attendance");
        assert!(staging::load_evidence(&c.session(doc)).expect("load").is_some());
    }

    #[test]
    fn staged_notes_refresh_summary_cells() {
        let conn = memory_db();
        let records = SqliteRecordStore::new(&conn);
        let seeded = seed_basics(&records);
        let catalog = RecordCatalog::new(&records);
        let documents = MemoryDocumentStore::with_root(ROOT_FOLDER, TEMPLATE_DOCUMENT);
        let sessions = MemorySessionStore::default();
        let schema = TemplateSchema::visit_report();
        let config = AppConfig::default();
        let c = Collaborators {
            records: &records,
            catalog: &catalog,
            documents: &documents,
            sessions: &sessions,
            schema: &schema,
            config: &config,
        };
        let doc = provision_visits(&c, TEMPLATE_DOCUMENT, seeded.accompaniment_id, 1, &mut |_| {})
            .expect("provision")
            .remove(0)
            .document_id;
        let day = NaiveDate::from_ymd_opt(2026, 3, 3).expect("date");
        start_visit(&c, &doc, 1, day, &mut |_| {}).expect("start");

        stage_visit_note(&c, &doc, "Reading", NoteCategory::Achievements, "plan agreed").expect("stage");
        stage_visit_note(&c, &doc, "Reading", NoteCategory::Achievements, "books sorted").expect("stage");
        assert_eq!(
            documents.sheet(&doc).get_str(template::ACHIEVEMENTS).as_deref(),
            Some("Work Lines\n\n1. Reading\n• plan agreed\n• books sorted")
        );
        assert!(documents.sheet(&doc).get(template::DIFFICULTIES).is_none());

        let empty = stage_visit_note(&c, &doc, "Reading", NoteCategory::Agreements, "   ");
        assert!(matches!(empty, Err(VisitError::ValidationFailed(_))));

        replace_visit_notes(&c, &doc, StagedNotes::new()).expect("replace");
        assert!(documents.sheet(&doc).get(template::ACHIEVEMENTS).is_none());
        assert!(staged_notes(&c, &doc).expect("notes").is_empty());
    }
}
