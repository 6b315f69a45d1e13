//! Cell edits on a visit document and the reactions they trigger.

use crate::error::VisitError;
use crate::orchestrator::{refresh_participant_total, resume_session, Collaborators};
use crate::session::{SessionContext, VisitStatus};
use crate::sheet::Sheet;
use crate::template::{self, column_index, CellRange};
use crate::validate::FieldValidator;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    WorkLineArea,
    InstitutionalRole,
}

type TriggerHandler =
    fn(&Collaborators<'_>, &SessionContext<'_>, &mut Sheet, u32) -> Result<(), VisitError>;

const TRIGGERS: [(TriggerKind, TriggerHandler); 2] = [
    (TriggerKind::WorkLineArea, on_work_line),
    (TriggerKind::InstitutionalRole, on_institutional_role),
];

fn handler(kind: TriggerKind) -> Option<TriggerHandler> {
    TRIGGERS.iter().find(|(k, _)| *k == kind).map(|(_, h)| *h)
}

fn trigger_for(c: &Collaborators<'_>, row: u32, col: u32) -> Option<TriggerKind> {
    let work_line = CellRange::parse(template::WORK_LINE)?;
    if c.schema
        .field_at(work_line.start_row, work_line.start_col)
        .map(|f| f.range.contains(row, col))
        .unwrap_or(false)
    {
        return Some(TriggerKind::WorkLineArea);
    }
    if Some(col) == column_index(template::ROLE_COLUMN) && row >= c.config.participants_start_row {
        return Some(TriggerKind::InstitutionalRole);
    }
    None
}

fn on_work_line(
    c: &Collaborators<'_>,
    _ctx: &SessionContext<'_>,
    sheet: &mut Sheet,
    _row: u32,
) -> Result<(), VisitError> {
    let selected = sheet.get_str(template::WORK_LINE).unwrap_or_default();
    let reveals = selected
        .split(',')
        .map(str::trim)
        .any(|line| c.config.area_trigger_values.iter().any(|v| v == line));
    if reveals {
        sheet.show_row(template::WORK_LINE_AREA_ROW);
    } else {
        sheet.hide_row(template::WORK_LINE_AREA_ROW);
    }
    tracing::debug!(selected = %selected, reveals, "area row toggled");
    Ok(())
}

fn on_institutional_role(
    c: &Collaborators<'_>,
    ctx: &SessionContext<'_>,
    sheet: &mut Sheet,
    row: u32,
) -> Result<(), VisitError> {
    let role = sheet.get_str(&format!("{}{row}", template::ROLE_COLUMN)).unwrap_or_default();
    let name_cell = format!("{}{row}", template::NAME_COLUMN);
    let Some(names) = CellRange::parse(&format!(
        "{}{row}:{}{row}",
        template::NAME_COLUMN,
        template::NAME_END_COLUMN
    )) else {
        return Ok(());
    };
    sheet.clear(&name_cell);
    sheet.clear_validation(names);

    if !c.config.teacher_role_values.iter().any(|v| v == role.trim()) {
        return Ok(());
    }
    let Some(institution_id) = ctx.institution_id()? else {
        tracing::warn!(document = ctx.document_id(), "teacher role picked before the visit started");
        return Ok(());
    };
    let teachers: Vec<String> = c
        .catalog
        .list_institution_teachers(institution_id)?
        .into_iter()
        .map(|t| t.full_name)
        .collect();
    tracing::debug!(row, count = teachers.len(), "name cell limited to institution teachers");
    sheet.set_validation(names, teachers);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub cell: String,
    pub trigger: Option<TriggerKind>,
    pub required: bool,
    pub dirty: bool,
}

/// Writes one cell as `editor`, then runs whichever trigger watches it.
pub fn edit_cell(
    c: &Collaborators<'_>,
    document_id: &str,
    a1: &str,
    value: Value,
    editor: &str,
) -> Result<EditOutcome, VisitError> {
    let range = CellRange::parse(a1)
        .ok_or_else(|| VisitError::ValidationFailed(format!("invalid cell reference: {a1}")))?;
    let mut sheet = c.documents.open_sheet(document_id)?;
    if let Some(p) = sheet.blocking_protection(a1, editor) {
        return Err(VisitError::ValidationFailed(format!(
            "{a1} is protected ({}) and cannot be edited",
            p.description
        )));
    }

    let (row, col) = (range.start_row, range.start_col);
    let anchor = sheet.anchor_of(row, col);
    sheet.set(&anchor, value);

    let ctx = c.session(document_id);
    let status = resume_session(c, &ctx)?;
    let trigger = trigger_for(c, row, col);
    if let Some(run) = trigger.and_then(handler) {
        run(c, &ctx, &mut sheet, row)?;
    }
    if row >= c.config.participants_start_row {
        refresh_participant_total(&mut sheet, c.config.participants_start_row);
    }
    c.documents.save_sheet(document_id, &sheet)?;

    let validator = FieldValidator::new(c.schema);
    let editable = validator.is_editable(&anchor) || row >= c.config.participants_start_row;
    let dirty = editable && status == VisitStatus::InProgress;
    if dirty {
        ctx.mark_dirty()?;
    }
    Ok(EditOutcome {
        required: validator.is_required(&anchor),
        cell: anchor,
        trigger,
        dirty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::gateway::{row as record, RecordCatalog, RecordStore, SqliteRecordStore};
    use crate::orchestrator::start_visit;
    use crate::provision::provision_visits;
    use crate::template::TemplateSchema;
    use crate::testing::{
        memory_db, seed_basics, MemoryDocumentStore, MemorySessionStore, ROOT_FOLDER,
        TEMPLATE_DOCUMENT,
    };
    use chrono::NaiveDate;
    use serde_json::json;

    const EDITOR: &str = "ana@example.org";

    #[test]
    fn trigger_table_covers_every_kind() {
        assert!(handler(TriggerKind::WorkLineArea).is_some());
        assert!(handler(TriggerKind::InstitutionalRole).is_some());
    }

    #[test]
    fn edits_run_triggers_and_respect_protections() {
        let conn = memory_db();
        let records = SqliteRecordStore::new(&conn);
        let seeded = seed_basics(&records);
        let teacher = records
            .insert(
                "teachers",
                &record(&[
                    ("id_type", json!(1)),
                    ("id_number", json!("1001")),
                    ("first_name", json!("Luis")),
                    ("last_name", json!("Mora")),
                ]),
            )
            .expect("teacher");
        records
            .insert(
                "institution_teachers",
                &record(&[
                    ("teacher_id", json!(teacher)),
                    ("institution_id", json!(seeded.institution_id)),
                ]),
            )
            .expect("link");
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
        assert!(documents.sheet(&doc).hidden_rows.contains(&template::WORK_LINE_AREA_ROW));

        let blocked = edit_cell(&c, &doc, template::SEQUENCE_NUMBER, json!(9), EDITOR);
        assert!(matches!(blocked, Err(VisitError::ValidationFailed(_))));
        edit_cell(&c, &doc, template::SEQUENCE_NUMBER, json!(9), &config.owner_editor).expect("owner edit");

        let out = edit_cell(&c, &doc, "M11", json!("Study Plans"), EDITOR).expect("work line");
        assert_eq!(out.cell, "I11");
        assert_eq!(out.trigger, Some(TriggerKind::WorkLineArea));
        assert!(!out.dirty);
        assert!(out.required);
        assert!(!documents.sheet(&doc).hidden_rows.contains(&template::WORK_LINE_AREA_ROW));
        edit_cell(&c, &doc, template::WORK_LINE, json!("Reading"), EDITOR).expect("work line");
        assert!(documents.sheet(&doc).hidden_rows.contains(&template::WORK_LINE_AREA_ROW));

        let day = NaiveDate::from_ymd_opt(2026, 3, 3).expect("date");
        start_visit(&c, &doc, 2, day, &mut |_| {}).expect("start");
        edit_cell(&c, &doc, "B21", json!("Someone"), EDITOR).expect("name");
        assert_eq!(documents.sheet(&doc).get_f64("K21"), Some(1.0));

        let out = edit_cell(&c, &doc, "A21", json!("Teacher"), EDITOR).expect("role");
        assert_eq!(out.trigger, Some(TriggerKind::InstitutionalRole));
        assert!(out.dirty);
        let sheet = documents.sheet(&doc);
        assert!(sheet.get("B21").is_none());
        assert_eq!(sheet.validation_for("C21"), Some(&vec!["Luis Mora".to_string()]));
        assert_eq!(sheet.get_f64("K21"), Some(0.0));

        edit_cell(&c, &doc, "A21", json!("Parent"), EDITOR).expect("role");
        assert!(documents.sheet(&doc).validation_for("C21").is_none());
    }
}
