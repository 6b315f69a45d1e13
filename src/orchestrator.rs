//! Visit lifecycle: `NotStarted -> InProgress -> Finalized`.

use crate::config::AppConfig;
use crate::error::{GatewayError, VisitError};
use crate::gateway::{
    CatalogGateway, DocumentStore, ProgressReporter, RecordStore, SessionPropertyStore,
};
use crate::lock::lock_document;
use crate::reconcile::reconcile_by_natural_key;
use crate::repo::{self, NewVisit, PlanCounts, StoredNote, VisitFile};
use crate::session::{SessionContext, StartedVisit, VisitStatus};
use crate::sheet::Sheet;
use crate::staging::{self, NoteCategory};
use crate::template::{self, BorderKind, CellRange, DynamicSource, TemplateSchema};
use crate::validate::{validate_participant_count, FieldValidator};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Everything the lifecycle talks to, injected by the caller.
pub struct Collaborators<'a> {
    pub records: &'a dyn RecordStore,
    pub catalog: &'a dyn CatalogGateway,
    pub documents: &'a dyn DocumentStore,
    pub sessions: &'a dyn SessionPropertyStore,
    pub schema: &'a TemplateSchema,
    pub config: &'a AppConfig,
}

impl<'a> Collaborators<'a> {
    pub fn session(&self, document_id: &str) -> SessionContext<'a> {
        SessionContext::new(document_id, self.sessions)
    }
}

fn report(on_progress: ProgressReporter<'_>, message: &str) {
    tracing::info!("{message}");
    on_progress(message);
}

pub fn visit_file_for(c: &Collaborators<'_>, document_id: &str) -> Result<VisitFile, VisitError> {
    repo::find_visit_file_by_document(c.records, document_id)?
        .ok_or_else(|| VisitError::NotFound(format!("document {document_id} is not a provisioned visit")))
}

/// Status of the visit behind `ctx`. A session that lost its keys is rebuilt
/// from the stored visit; only staged notes and evidence stay lost.
pub fn resume_session(c: &Collaborators<'_>, ctx: &SessionContext<'_>) -> Result<VisitStatus, VisitError> {
    let status = ctx.status()?;
    if status != VisitStatus::NotStarted {
        return Ok(status);
    }
    let Some(file) = repo::find_visit_file_by_document(c.records, ctx.document_id())? else {
        return Ok(status);
    };
    let Some(visit_id) = file.visit_id else {
        return Ok(status);
    };
    if VisitStatus::parse(&file.status) == Some(VisitStatus::Finalized) {
        ctx.set_status(VisitStatus::Finalized)?;
        return Ok(VisitStatus::Finalized);
    }
    let visit = repo::find_visit(c.records, visit_id)?
        .ok_or_else(|| VisitError::NotFound(format!("visit {visit_id} not found")))?;
    let acc = repo::find_accompaniment(c.records, file.accompaniment_id)?.ok_or_else(|| {
        VisitError::NotFound(format!("accompaniment {} not found", file.accompaniment_id))
    })?;
    tracing::warn!(
        document = ctx.document_id(),
        visit = visit_id,
        "session was empty for a started visit; restored from stored records"
    );
    ctx.record_start(&StartedVisit {
        visit_id,
        institution_id: acc.institution_id,
        institution_name: acc.institution_name,
        sequence_number: file.sequence_number,
        participant_count: visit.participant_count,
    })?;
    Ok(VisitStatus::InProgress)
}

fn role_source() -> DynamicSource {
    DynamicSource {
        table: "institutional_roles".to_string(),
        value_column: "name".to_string(),
        active_column: "active".to_string(),
    }
}

pub const MAX_PARTICIPANTS: i64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub visit_id: i64,
    pub date: String,
    pub sequence_number: i64,
    pub institution_name: String,
}

/// One bordered row per expected participant: role dropdown in the role
/// column, merged name and area cells, and the running total beside them.
fn lay_out_participants(sheet: &mut Sheet, start_row: u32, count: u32, roles: &[String]) {
    let end_row = start_row + count.saturating_sub(1);
    sheet.ensure_rows(end_row);
    for r in start_row..=end_row {
        sheet.set_validation(CellRange::cell(r, 1), roles.to_vec());
        if let Some(name) = CellRange::parse(&format!("B{r}:J{r}")) {
            sheet.merge(name);
        }
        if let Some(area) = CellRange::parse(&format!("L{r}:N{r}")) {
            sheet.merge(area);
        }
        if let Some(full) = CellRange::parse(&format!("A{r}:U{r}")) {
            sheet.borders.push((full, BorderKind::Full));
        }
    }
    if let Some(total) = CellRange::parse(&format!("K{start_row}:K{end_row}")) {
        sheet.merge(total);
    }
    refresh_participant_total(sheet, start_row);
}

/// Recomputes the total-participants cell from the filled name cells.
pub fn refresh_participant_total(sheet: &mut Sheet, start_row: u32) {
    let filled = sheet.count_non_empty(template::NAME_COLUMN, start_row);
    sheet.set(&format!("K{start_row}"), json!(filled));
}

pub fn start_visit(
    c: &Collaborators<'_>,
    document_id: &str,
    participant_count: i64,
    today: NaiveDate,
    on_progress: ProgressReporter<'_>,
) -> Result<StartOutcome, VisitError> {
    if participant_count < 1 {
        return Err(VisitError::ValidationFailed(
            "must register at least one participant".to_string(),
        ));
    }
    if participant_count > MAX_PARTICIPANTS {
        return Err(VisitError::ValidationFailed(format!(
            "at most {MAX_PARTICIPANTS} participants can be registered"
        )));
    }
    let file = visit_file_for(c, document_id)?;
    let ctx = c.session(document_id);
    if file.visit_id.is_some()
        || file.status != VisitStatus::NotStarted.as_str()
        || ctx.status()? != VisitStatus::NotStarted
    {
        return Err(VisitError::AlreadyStarted {
            sequence: file.sequence_number,
        });
    }

    let last = repo::last_started_sequence(c.records, file.accompaniment_id)?;
    if file.sequence_number != last + 1 {
        return Err(VisitError::SequenceMismatch {
            expected: last + 1,
            actual: file.sequence_number,
        });
    }
    let acc = repo::find_accompaniment(c.records, file.accompaniment_id)?.ok_or_else(|| {
        VisitError::NotFound(format!("accompaniment {} not found", file.accompaniment_id))
    })?;
    let cutoff_week_id = c
        .catalog
        .find_cutoff_week(today)?
        .ok_or(VisitError::NoCutoffWeek { date: today })?;

    report(on_progress, &format!("Recording visit {}", file.sequence_number));
    let date = today.format("%Y-%m-%d").to_string();
    let mut visit_id = 0;
    let committed = c.records.atomically(&mut |tx| {
        visit_id = repo::insert_visit(
            tx,
            &NewVisit {
                accompaniment_id: acc.id,
                cutoff_week_id,
                sequence_number: file.sequence_number,
                visit_date: &date,
                participant_count,
            },
        )?;
        repo::link_visit_file(tx, file.id, visit_id)
    });
    match committed {
        Ok(()) => {}
        Err(GatewayError::Conflict(msg)) => {
            tracing::warn!(document = document_id, "start lost a race: {msg}");
            let latest = repo::last_started_sequence(c.records, file.accompaniment_id)?;
            return Err(VisitError::SequenceMismatch {
                expected: latest + 1,
                actual: file.sequence_number,
            });
        }
        Err(e) => return Err(e.into()),
    }

    ctx.record_start(&StartedVisit {
        visit_id,
        institution_id: acc.institution_id,
        institution_name: acc.institution_name.clone(),
        sequence_number: file.sequence_number,
        participant_count,
    })?;

    report(on_progress, "Preparing participant rows");
    let roles = c.catalog.list_active_values(&role_source())?;
    let mut sheet = c.documents.open_sheet(document_id)?;
    sheet.set(template::VISIT_DATE, json!(date));
    sheet.set(template::SEQUENCE_NUMBER, json!(file.sequence_number));
    sheet.set(template::INSTITUTION, json!(acc.institution_name));
    let rows = u32::try_from(participant_count).unwrap_or(1);
    lay_out_participants(&mut sheet, c.config.participants_start_row, rows, &roles);
    c.documents.save_sheet(document_id, &sheet)?;

    tracing::info!(visit = visit_id, sequence = file.sequence_number, "visit started");
    Ok(StartOutcome {
        visit_id,
        date,
        sequence_number: file.sequence_number,
        institution_name: acc.institution_name,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub visit_id: i64,
    /// One line for the person who finalized the visit.
    pub message: String,
    pub work_lines: usize,
    pub notes: PlanCounts,
    pub evidence_inserted: usize,
    pub evidence_skipped: usize,
}

fn split_work_lines(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|p| p == part) {
            out.push(part.to_string());
        }
    }
    out
}

pub fn finalize_visit(
    c: &Collaborators<'_>,
    document_id: &str,
    on_progress: ProgressReporter<'_>,
) -> Result<FinalizeOutcome, VisitError> {
    let ctx = c.session(document_id);
    match resume_session(c, &ctx)? {
        VisitStatus::InProgress => {}
        VisitStatus::NotStarted => return Err(VisitError::NotStarted),
        VisitStatus::Finalized => {
            return Err(VisitError::ValidationFailed(
                "visit is already finalized".to_string(),
            ))
        }
    }
    let visit_id = ctx.visit_id()?.ok_or(VisitError::NotStarted)?;
    let sheet = c.documents.open_sheet(document_id)?;

    // Everything up to the first durable write may still abort cleanly.
    report(on_progress, "Validating visit");
    let outcome = FieldValidator::new(c.schema).validate_required_fields(&sheet);
    if !outcome.valid {
        return Err(VisitError::ValidationFailed(outcome.message));
    }
    let expected = match ctx.participant_count()? {
        Some(n) => n,
        None => repo::find_visit(c.records, visit_id)?
            .map(|v| v.participant_count)
            .unwrap_or(0),
    };
    let actual = sheet.count_non_empty(template::NAME_COLUMN, c.config.participants_start_row) as i64;
    let count = validate_participant_count(expected, actual);
    if !count.valid {
        return Err(VisitError::ValidationFailed(count.message));
    }
    let duration = sheet.get_f64(template::DURATION_HOURS).ok_or_else(|| {
        VisitError::ValidationFailed("DURATION (Hours) must be a number".to_string())
    })?;
    let visit_type = sheet.get_str(template::VISIT_TYPE).unwrap_or_default();
    let objective = sheet.get_str(template::OBJECTIVE).unwrap_or_default();

    let mut work_lines: BTreeMap<String, i64> = BTreeMap::new();
    for name in split_work_lines(&sheet.get_str(template::WORK_LINE).unwrap_or_default()) {
        let id = c
            .catalog
            .resolve_id("work_lines", "name", &name)?
            .ok_or_else(|| VisitError::ValidationFailed(format!("unknown work line: {name}")))?;
        work_lines.insert(name, id);
    }

    report(on_progress, "Saving visit details");
    repo::update_visit_scalars(c.records, visit_id, visit_type.trim(), objective.trim(), duration)?;

    let mut joins: BTreeMap<String, i64> = BTreeMap::new();
    for (name, work_line_id) in &work_lines {
        let join = repo::find_or_create_visit_work_line(c.records, visit_id, *work_line_id)?;
        joins.insert(name.clone(), join);
    }

    report(on_progress, "Saving achievements, difficulties and agreements");
    let mut notes_written = PlanCounts::default();
    for (line, notes) in staging::load_notes(&ctx)? {
        let join = match joins.get(&line) {
            Some(id) => *id,
            None => match c.catalog.resolve_id("work_lines", "name", &line)? {
                Some(work_line_id) => {
                    let id = repo::find_or_create_visit_work_line(c.records, visit_id, work_line_id)?;
                    joins.insert(line.clone(), id);
                    id
                }
                None => {
                    tracing::warn!(visit = visit_id, line = %line, "dropping notes for unknown work line");
                    continue;
                }
            },
        };
        let recorded_at = repo::now_ts();
        for category in NoteCategory::ALL {
            let desired: Vec<StoredNote> = notes
                .items(category)
                .iter()
                .map(|d| StoredNote {
                    id: None,
                    description: d.clone(),
                })
                .collect();
            let current = repo::list_notes(c.records, category, join)?;
            let plan = reconcile_by_natural_key(&desired, &current);
            notes_written += repo::apply_plan(c.records, category.table(), &plan, |n| {
                crate::gateway::row(&[
                    ("visit_work_line_id", json!(join)),
                    ("description", json!(n.description.trim())),
                    ("recorded_at", json!(recorded_at)),
                ])
            })?;
        }
    }

    report(on_progress, "Saving evidence");
    let mut evidence_inserted = 0;
    let mut evidence_skipped = 0;
    let staged = staging::load_evidence(&ctx)?.unwrap_or_default();
    let mut fresh = Vec::new();
    for entry in staged.iter().filter(|e| e.is_active()) {
        let pending_same_type = fresh
            .iter()
            .any(|r: &crate::gateway::Row| r.get("evidence_type") == Some(&json!(entry.evidence_type)));
        if pending_same_type || repo::evidence_exists(c.records, visit_id, &entry.evidence_type)? {
            evidence_skipped += 1;
            continue;
        }
        fresh.push(repo::evidence_row(visit_id, entry));
    }
    if !fresh.is_empty() {
        evidence_inserted = c.records.insert_many("evidence", &fresh)?.len();
    }

    report(on_progress, "Locking document");
    if let Err(e) = lock_document(c.documents, document_id, &c.config.owner_editor) {
        tracing::error!(
            visit = visit_id,
            document = document_id,
            "visit data saved but the document is not locked; manual follow-up required: {e}"
        );
        return Err(e);
    }

    let file = visit_file_for(c, document_id)?;
    repo::set_status(c.records, "visits", visit_id, VisitStatus::Finalized.as_str())?;
    repo::set_status(c.records, "visit_files", file.id, VisitStatus::Finalized.as_str())?;
    ctx.set_status(VisitStatus::Finalized)?;
    ctx.clear_visit()?;

    let message = format!(
        "Visit {} finalized: {} work lines, {} notes saved, {} evidence files recorded",
        file.sequence_number,
        joins.len(),
        notes_written.inserted,
        evidence_inserted
    );
    tracing::info!(visit = visit_id, "{message}");
    Ok(FinalizeOutcome {
        visit_id,
        message,
        work_lines: joins.len(),
        notes: notes_written,
        evidence_inserted,
        evidence_skipped,
    })
}

/// Drops staged notes and evidence without touching stored records.
pub fn abandon_visit(c: &Collaborators<'_>, document_id: &str) -> Result<(), VisitError> {
    visit_file_for(c, document_id)?;
    let ctx = c.session(document_id);
    ctx.clear_staging()?;
    if ctx.status()? == VisitStatus::InProgress {
        let mut sheet = c.documents.open_sheet(document_id)?;
        for cell in [template::ACHIEVEMENTS, template::DIFFICULTIES, template::AGREEMENTS] {
            sheet.clear(cell);
        }
        sheet.set(template::EVIDENCE, json!(staging::evidence_summary(&[])));
        c.documents.save_sheet(document_id, &sheet)?;
        ctx.mark_dirty()?;
    }
    tracing::info!(document = document_id, "staged visit data abandoned");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub document_id: String,
    pub status: VisitStatus,
    pub sequence_number: i64,
    pub visit_id: Option<i64>,
    pub institution_name: Option<String>,
    pub participant_count: Option<i64>,
    pub dirty: bool,
}

pub fn visit_status(c: &Collaborators<'_>, document_id: &str) -> Result<StatusView, VisitError> {
    let file = visit_file_for(c, document_id)?;
    let ctx = c.session(document_id);
    let status = resume_session(c, &ctx)?;
    Ok(StatusView {
        document_id: document_id.to_string(),
        status,
        sequence_number: ctx.sequence_number()?.unwrap_or(file.sequence_number),
        visit_id: file.visit_id,
        institution_name: ctx.institution_name()?,
        participant_count: ctx.participant_count()?,
        dirty: ctx.is_dirty()?,
    })
}

/// Rewrites the read-only summary cells from whatever is staged.
pub fn refresh_summaries(c: &Collaborators<'_>, ctx: &SessionContext<'_>) -> Result<(), VisitError> {
    let notes = staging::load_notes(ctx)?;
    let evidence = staging::load_evidence(ctx)?.unwrap_or_default();
    let mut sheet = c.documents.open_sheet(ctx.document_id())?;
    for (cell, category) in [
        (template::ACHIEVEMENTS, NoteCategory::Achievements),
        (template::DIFFICULTIES, NoteCategory::Difficulties),
        (template::AGREEMENTS, NoteCategory::Agreements),
    ] {
        let text = staging::notes_summary(&notes, category);
        if text.is_empty() {
            sheet.clear(cell);
        } else {
            sheet.set(cell, json!(text));
        }
    }
    sheet.set(template::EVIDENCE, json!(staging::evidence_summary(&evidence)));
    c.documents.save_sheet(ctx.document_id(), &sheet)?;
    Ok(())
}
