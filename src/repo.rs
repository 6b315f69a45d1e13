//! Typed reads and writes over the record store.

use crate::error::GatewayError;
use crate::gateway::{row, value_i64, value_str, RecordStore, Row, Select};
use crate::reconcile::{ChildRecord, ReconcilePlan};
use crate::staging::{EvidenceDescriptor, NoteCategory};
use serde::Serialize;
use serde_json::{json, Value};

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccompanimentInfo {
    pub id: i64,
    pub institution_id: i64,
    pub institution_name: String,
    pub institution_folder_name: String,
    pub professional_id: i64,
    pub professional_name: String,
    pub root_folder_id: Option<String>,
    pub reports_folder_id: Option<String>,
}

pub fn find_accompaniment(records: &dyn RecordStore, id: i64) -> Result<Option<AccompanimentInfo>, GatewayError> {
    let rows = records.select(
        &Select::from(
            "accompaniments",
            &[
                "accompaniments.id",
                "accompaniments.institution_id",
                "accompaniments.professional_id",
            ],
        )
        .where_eq("accompaniments.id", id),
    )?;
    let Some(acc) = rows.first() else {
        return Ok(None);
    };
    let institution_id = value_i64(acc, "institution_id").unwrap_or_default();
    let professional_id = value_i64(acc, "professional_id").unwrap_or_default();

    let institution = records
        .select(&Select::from("institutions", &["name", "folder_name"]).where_eq("id", institution_id))?;
    let professional = records.select(
        &Select::from("professionals", &["name", "root_folder_id", "reports_folder_id"])
            .where_eq("id", professional_id),
    )?;
    let (Some(inst), Some(prof)) = (institution.first(), professional.first()) else {
        return Ok(None);
    };

    Ok(Some(AccompanimentInfo {
        id,
        institution_id,
        institution_name: value_str(inst, "name").unwrap_or_default(),
        institution_folder_name: value_str(inst, "folder_name").unwrap_or_default(),
        professional_id,
        professional_name: value_str(prof, "name").unwrap_or_default(),
        root_folder_id: value_str(prof, "root_folder_id").filter(|s| !s.is_empty()),
        reports_folder_id: value_str(prof, "reports_folder_id").filter(|s| !s.is_empty()),
    }))
}

pub fn set_reports_folder(records: &dyn RecordStore, professional_id: i64, folder_id: &str) -> Result<(), GatewayError> {
    records.update(
        "professionals",
        &row(&[("reports_folder_id", json!(folder_id))]),
        &row(&[("id", json!(professional_id))]),
    )?;
    Ok(())
}

pub fn find_professional_report(records: &dyn RecordStore, professional_id: i64) -> Result<Option<String>, GatewayError> {
    let rows = records.select(
        &Select::from("professional_reports", &["document_id"]).where_eq("professional_id", professional_id),
    )?;
    Ok(rows.first().and_then(|r| value_str(r, "document_id")))
}

pub fn insert_professional_report(
    records: &dyn RecordStore,
    professional_id: i64,
    document_id: &str,
) -> Result<i64, GatewayError> {
    let ts = now_ts();
    records.insert(
        "professional_reports",
        &row(&[
            ("professional_id", json!(professional_id)),
            ("document_id", json!(document_id)),
            ("created_at", json!(ts)),
            ("updated_at", json!(ts)),
        ]),
    )
}

/// Highest sequence number among visits actually started for the
/// accompaniment; 0 when none has started.
pub fn last_started_sequence(records: &dyn RecordStore, accompaniment_id: i64) -> Result<i64, GatewayError> {
    let rows = records.select(
        &Select::from("visits", &["sequence_number"])
            .where_eq("accompaniment_id", accompaniment_id)
            .order_by_desc("sequence_number")
            .limit(1),
    )?;
    Ok(rows.first().and_then(|r| value_i64(r, "sequence_number")).unwrap_or(0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitFile {
    pub id: i64,
    pub accompaniment_id: i64,
    pub sequence_number: i64,
    pub document_id: String,
    pub folder_id: String,
    pub evidence_folder_id: String,
    pub visit_id: Option<i64>,
    pub status: String,
}

const VISIT_FILE_COLUMNS: [&str; 8] = [
    "id",
    "accompaniment_id",
    "sequence_number",
    "document_id",
    "folder_id",
    "evidence_folder_id",
    "visit_id",
    "status",
];

fn visit_file_from(r: &Row) -> Option<VisitFile> {
    Some(VisitFile {
        id: value_i64(r, "id")?,
        accompaniment_id: value_i64(r, "accompaniment_id")?,
        sequence_number: value_i64(r, "sequence_number")?,
        document_id: value_str(r, "document_id")?,
        folder_id: value_str(r, "folder_id").unwrap_or_default(),
        evidence_folder_id: value_str(r, "evidence_folder_id").unwrap_or_default(),
        visit_id: value_i64(r, "visit_id"),
        status: value_str(r, "status").unwrap_or_default(),
    })
}

pub fn find_visit_file(
    records: &dyn RecordStore,
    accompaniment_id: i64,
    sequence_number: i64,
) -> Result<Option<VisitFile>, GatewayError> {
    let rows = records.select(
        &Select::from("visit_files", &VISIT_FILE_COLUMNS)
            .where_eq("accompaniment_id", accompaniment_id)
            .where_eq("sequence_number", sequence_number),
    )?;
    Ok(rows.first().and_then(visit_file_from))
}

pub fn find_visit_file_by_document(records: &dyn RecordStore, document_id: &str) -> Result<Option<VisitFile>, GatewayError> {
    let rows = records.select(&Select::from("visit_files", &VISIT_FILE_COLUMNS).where_eq("document_id", document_id))?;
    Ok(rows.first().and_then(visit_file_from))
}

pub fn list_visit_files(records: &dyn RecordStore, accompaniment_id: i64) -> Result<Vec<VisitFile>, GatewayError> {
    let rows = records.select(
        &Select::from("visit_files", &VISIT_FILE_COLUMNS)
            .where_eq("accompaniment_id", accompaniment_id)
            .order_by("sequence_number"),
    )?;
    Ok(rows.iter().filter_map(visit_file_from).collect())
}

pub struct NewVisitFile<'a> {
    pub accompaniment_id: i64,
    pub sequence_number: i64,
    pub document_id: &'a str,
    pub folder_id: &'a str,
    pub evidence_folder_id: &'a str,
}

pub fn insert_visit_file(records: &dyn RecordStore, file: &NewVisitFile<'_>) -> Result<i64, GatewayError> {
    let ts = now_ts();
    records.insert(
        "visit_files",
        &row(&[
            ("accompaniment_id", json!(file.accompaniment_id)),
            ("sequence_number", json!(file.sequence_number)),
            ("document_id", json!(file.document_id)),
            ("folder_id", json!(file.folder_id)),
            ("evidence_folder_id", json!(file.evidence_folder_id)),
            ("status", json!("not_started")),
            ("created_at", json!(ts)),
            ("updated_at", json!(ts)),
        ]),
    )
}

pub struct NewVisit<'a> {
    pub accompaniment_id: i64,
    pub cutoff_week_id: i64,
    pub sequence_number: i64,
    pub visit_date: &'a str,
    pub participant_count: i64,
}

pub fn insert_visit(records: &dyn RecordStore, visit: &NewVisit<'_>) -> Result<i64, GatewayError> {
    let ts = now_ts();
    records.insert(
        "visits",
        &row(&[
            ("accompaniment_id", json!(visit.accompaniment_id)),
            ("cutoff_week_id", json!(visit.cutoff_week_id)),
            ("sequence_number", json!(visit.sequence_number)),
            ("visit_date", json!(visit.visit_date)),
            ("status", json!("in_progress")),
            ("participant_count", json!(visit.participant_count)),
            ("created_at", json!(ts)),
            ("updated_at", json!(ts)),
        ]),
    )
}

pub fn link_visit_file(records: &dyn RecordStore, visit_file_id: i64, visit_id: i64) -> Result<(), GatewayError> {
    records.update(
        "visit_files",
        &row(&[
            ("visit_id", json!(visit_id)),
            ("status", json!("in_progress")),
            ("updated_at", json!(now_ts())),
        ]),
        &row(&[("id", json!(visit_file_id))]),
    )?;
    Ok(())
}

pub fn update_visit_scalars(
    records: &dyn RecordStore,
    visit_id: i64,
    visit_type: &str,
    objective: &str,
    duration_hours: f64,
) -> Result<(), GatewayError> {
    records.update(
        "visits",
        &row(&[
            ("visit_type", json!(visit_type)),
            ("objective", json!(objective)),
            ("duration_hours", json!(duration_hours)),
            ("updated_at", json!(now_ts())),
        ]),
        &row(&[("id", json!(visit_id))]),
    )?;
    Ok(())
}

pub fn set_status(records: &dyn RecordStore, table: &str, id: i64, status: &str) -> Result<(), GatewayError> {
    records.update(
        table,
        &row(&[("status", json!(status)), ("updated_at", json!(now_ts()))]),
        &row(&[("id", json!(id))]),
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub id: i64,
    pub accompaniment_id: i64,
    pub sequence_number: i64,
    pub visit_date: String,
    pub status: String,
    pub visit_type: String,
    pub objective: String,
    pub duration_hours: f64,
    pub participant_count: i64,
}

pub fn find_visit(records: &dyn RecordStore, visit_id: i64) -> Result<Option<VisitRecord>, GatewayError> {
    let rows = records.select(
        &Select::from(
            "visits",
            &[
                "id",
                "accompaniment_id",
                "sequence_number",
                "visit_date",
                "status",
                "visit_type",
                "objective",
                "duration_hours",
                "participant_count",
            ],
        )
        .where_eq("id", visit_id),
    )?;
    Ok(rows.first().map(|r| VisitRecord {
        id: visit_id,
        accompaniment_id: value_i64(r, "accompaniment_id").unwrap_or_default(),
        sequence_number: value_i64(r, "sequence_number").unwrap_or_default(),
        visit_date: value_str(r, "visit_date").unwrap_or_default(),
        status: value_str(r, "status").unwrap_or_default(),
        visit_type: value_str(r, "visit_type").unwrap_or_default(),
        objective: value_str(r, "objective").unwrap_or_default(),
        duration_hours: r.get("duration_hours").and_then(Value::as_f64).unwrap_or_default(),
        participant_count: value_i64(r, "participant_count").unwrap_or_default(),
    }))
}

/// Join row between a visit and a working line, created on first use.
pub fn find_or_create_visit_work_line(
    records: &dyn RecordStore,
    visit_id: i64,
    work_line_id: i64,
) -> Result<i64, GatewayError> {
    let existing = records.select(
        &Select::from("visit_work_lines", &["id"])
            .where_eq("visit_id", visit_id)
            .where_eq("work_line_id", work_line_id),
    )?;
    if let Some(id) = existing.first().and_then(|r| value_i64(r, "id")) {
        return Ok(id);
    }
    records.insert(
        "visit_work_lines",
        &row(&[("visit_id", json!(visit_id)), ("work_line_id", json!(work_line_id))]),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNote {
    pub id: Option<i64>,
    pub description: String,
}

impl ChildRecord for StoredNote {
    type Key = String;
    type Payload = String;

    fn record_id(&self) -> Option<i64> {
        self.id
    }

    fn natural_key(&self) -> String {
        self.description.trim().to_string()
    }

    fn payload(&self) -> String {
        self.natural_key()
    }
}

pub fn list_notes(
    records: &dyn RecordStore,
    category: NoteCategory,
    visit_work_line_id: i64,
) -> Result<Vec<StoredNote>, GatewayError> {
    let rows = records.select(
        &Select::from(category.table(), &["id", "description"])
            .where_eq("visit_work_line_id", visit_work_line_id)
            .order_by("id"),
    )?;
    Ok(rows
        .iter()
        .map(|r| StoredNote {
            id: value_i64(r, "id"),
            description: value_str(r, "description").unwrap_or_default(),
        })
        .collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl std::ops::AddAssign for PlanCounts {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// Writes a reconcile plan: one bulk insert, then updates, then deletes.
pub fn apply_plan<T: ChildRecord>(
    records: &dyn RecordStore,
    table: &str,
    plan: &ReconcilePlan<T>,
    to_row: impl Fn(&T) -> Row,
) -> Result<PlanCounts, GatewayError> {
    let rows: Vec<Row> = plan.to_insert.iter().map(&to_row).collect();
    let inserted = records.insert_many(table, &rows)?.len();
    let mut updated = 0;
    for (id, item) in &plan.to_update {
        updated += records.update(table, &to_row(item), &row(&[("id", json!(id))]))?;
    }
    let mut deleted = 0;
    for id in &plan.to_delete {
        deleted += records.delete(table, &row(&[("id", json!(id))]))?;
    }
    Ok(PlanCounts {
        inserted,
        updated,
        deleted,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRecord {
    pub id: i64,
    pub evidence_type: String,
    pub original_name: String,
    pub storage_id: String,
    pub url: String,
    pub mime_type: String,
    pub state: String,
    pub uploaded_at: String,
    pub sha256: Option<String>,
}

pub fn list_evidence(records: &dyn RecordStore, visit_id: i64) -> Result<Vec<EvidenceRecord>, GatewayError> {
    let rows = records.select(
        &Select::from(
            "evidence",
            &[
                "id",
                "evidence_type",
                "original_name",
                "storage_id",
                "url",
                "mime_type",
                "state",
                "uploaded_at",
                "sha256",
            ],
        )
        .where_eq("visit_id", visit_id)
        .order_by("id"),
    )?;
    Ok(rows
        .iter()
        .filter_map(|r| {
            Some(EvidenceRecord {
                id: value_i64(r, "id")?,
                evidence_type: value_str(r, "evidence_type").unwrap_or_default(),
                original_name: value_str(r, "original_name").unwrap_or_default(),
                storage_id: value_str(r, "storage_id").unwrap_or_default(),
                url: value_str(r, "url").unwrap_or_default(),
                mime_type: value_str(r, "mime_type").unwrap_or_default(),
                state: value_str(r, "state").unwrap_or_default(),
                uploaded_at: value_str(r, "uploaded_at").unwrap_or_default(),
                sha256: value_str(r, "sha256"),
            })
        })
        .collect())
}

pub fn evidence_exists(records: &dyn RecordStore, visit_id: i64, evidence_type: &str) -> Result<bool, GatewayError> {
    let rows = records.select(
        &Select::from("evidence", &["id"])
            .where_eq("visit_id", visit_id)
            .where_eq("evidence_type", evidence_type)
            .limit(1),
    )?;
    Ok(!rows.is_empty())
}

pub fn evidence_row(visit_id: i64, e: &EvidenceDescriptor) -> Row {
    let ts = now_ts();
    row(&[
        ("visit_id", json!(visit_id)),
        ("evidence_type", json!(e.evidence_type)),
        ("original_name", json!(e.original_name)),
        ("storage_id", json!(e.storage_id)),
        ("url", json!(e.url)),
        ("mime_type", json!(e.mime_type)),
        ("state", json!(e.state.as_str())),
        ("uploaded_at", json!(e.uploaded_at.clone().unwrap_or_else(|| ts.clone()))),
        ("sha256", json!(e.sha256)),
        ("created_at", json!(ts)),
        ("updated_at", json!(ts)),
    ])
}
