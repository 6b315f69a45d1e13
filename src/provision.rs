use crate::error::VisitError;
use crate::gateway::ProgressReporter;
use crate::orchestrator::Collaborators;
use crate::render::{apply_template, resolve_list_data};
use crate::repo::{self, AccompanimentInfo, NewVisitFile};
use crate::sheet::Sheet;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedVisit {
    pub visit_file_id: i64,
    pub sequence_number: i64,
    pub document_id: String,
    pub document_name: String,
    pub folder_id: String,
    pub evidence_folder_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStructure {
    pub reports_folder_id: String,
    pub report_document_id: String,
}

fn report(on_progress: ProgressReporter<'_>, message: String) {
    tracing::info!("{message}");
    on_progress(&message);
}

/// Makes sure the professional has a reports folder and exactly one report
/// document, registering whichever part was missing.
pub fn ensure_report_structure(
    c: &Collaborators<'_>,
    acc: &AccompanimentInfo,
    root_folder_id: &str,
) -> Result<ReportStructure, VisitError> {
    let folder = c
        .documents
        .find_or_create_folder(root_folder_id, &c.config.reports_folder_name)?;
    if acc.reports_folder_id.as_deref() != Some(folder.id.as_str()) {
        repo::set_reports_folder(c.records, acc.professional_id, &folder.id)?;
    }

    if let Some(document_id) = repo::find_professional_report(c.records, acc.professional_id)? {
        return Ok(ReportStructure {
            reports_folder_id: folder.id,
            report_document_id: document_id,
        });
    }

    let name = format!(
        "{} - {}",
        c.config.report_document_prefix, acc.professional_name
    );
    let document = match c.documents.find_document(&folder.id, &name)? {
        Some(existing) => existing,
        None => c.documents.create_document(
            &folder.id,
            &name,
            &Sheet::blank(&c.config.report_sheet_name),
        )?,
    };
    repo::insert_professional_report(c.records, acc.professional_id, &document.id)?;
    tracing::info!(professional = acc.professional_id, document = %document.id, "report document registered");
    Ok(ReportStructure {
        reports_folder_id: folder.id,
        report_document_id: document.id,
    })
}

/// Creates `count` numbered visit documents after the last started visit.
/// Sequence numbers that already have a document are skipped, so repeating
/// a call creates nothing new.
pub fn provision_visits(
    c: &Collaborators<'_>,
    template_document_id: &str,
    accompaniment_id: i64,
    count: i64,
    on_progress: ProgressReporter<'_>,
) -> Result<Vec<ProvisionedVisit>, VisitError> {
    if count < 1 {
        return Err(VisitError::ValidationFailed(
            "number of visits must be at least 1".to_string(),
        ));
    }
    let acc = repo::find_accompaniment(c.records, accompaniment_id)?
        .ok_or_else(|| VisitError::NotFound(format!("accompaniment {accompaniment_id} not found")))?;
    let Some(root) = acc.root_folder_id.clone() else {
        return Err(VisitError::NotFound(format!(
            "professional {} has no root folder",
            acc.professional_name
        )));
    };

    let last = repo::last_started_sequence(c.records, acc.id)?;
    let institution_folder = c
        .documents
        .find_or_create_folder(&root, &acc.institution_folder_name)?;
    let base_folder = c
        .documents
        .find_or_create_folder(&institution_folder.id, &c.config.accompaniment_folder_name)?;
    ensure_report_structure(c, &acc, &root)?;
    let lists = resolve_list_data(c.catalog, c.schema)?;

    let mut created = Vec::new();
    for sequence_number in (last + 1)..=(last + count) {
        if repo::find_visit_file(c.records, acc.id, sequence_number)?.is_some() {
            report(
                on_progress,
                format!("Visit {sequence_number} already exists, skipping"),
            );
            continue;
        }
        report(on_progress, format!("Creating visit {sequence_number}"));

        let folder = c
            .documents
            .find_or_create_folder(&base_folder.id, &format!("{sequence_number}. Visit"))?;
        let evidence = c
            .documents
            .find_or_create_folder(&folder.id, &c.config.evidence_folder_name)?;
        let document_name = format!("{} {}", c.config.visit_document_prefix, sequence_number);
        let document = c
            .documents
            .copy_document(template_document_id, &folder.id, &document_name)?;

        let mut sheet = c.documents.open_sheet(&document.id)?;
        sheet.name = c.config.visit_sheet_name.clone();
        apply_template(&mut sheet, c.schema, &lists, &c.config.owner_editor);
        c.documents.save_sheet(&document.id, &sheet)?;

        let visit_file_id = repo::insert_visit_file(
            c.records,
            &NewVisitFile {
                accompaniment_id: acc.id,
                sequence_number,
                document_id: &document.id,
                folder_id: &folder.id,
                evidence_folder_id: &evidence.id,
            },
        )?;
        created.push(ProvisionedVisit {
            visit_file_id,
            sequence_number,
            document_id: document.id,
            document_name,
            folder_id: folder.id,
            evidence_folder_id: evidence.id,
        });
    }

    if (created.len() as i64) < count {
        tracing::warn!(
            requested = count,
            created = created.len(),
            accompaniment = acc.id,
            "provisioning created fewer visits than requested"
        );
    }
    Ok(created)
}
