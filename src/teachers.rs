//! Teacher registry: one profile row plus its titles, auxiliary areas and
//! per-institution grades.

use crate::error::{GatewayError, VisitError};
use crate::gateway::{row, value_i64, value_str, RecordStore, Select};
use crate::reconcile::{reconcile_by_identity, reconcile_by_natural_key, ChildRecord};
use crate::repo::{apply_plan, PlanCounts};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub title_type: String,
    pub title: String,
}

impl ChildRecord for TitleEntry {
    type Key = (String, String);
    type Payload = (String, String);

    fn record_id(&self) -> Option<i64> {
        self.id
    }

    fn natural_key(&self) -> Self::Key {
        (self.title_type.trim().to_string(), self.title.trim().to_string())
    }

    fn payload(&self) -> Self::Payload {
        self.natural_key()
    }
}

/// Catalog reference held by a teacher (auxiliary area or grade).
#[derive(Debug, Clone, PartialEq)]
struct LinkedId {
    id: Option<i64>,
    target: i64,
}

impl ChildRecord for LinkedId {
    type Key = i64;
    type Payload = i64;

    fn record_id(&self) -> Option<i64> {
        self.id
    }

    fn natural_key(&self) -> i64 {
        self.target
    }

    fn payload(&self) -> i64 {
        self.target
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherProfile {
    #[serde(default)]
    pub teacher_id: Option<i64>,
    pub id_type: i64,
    pub id_number: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub main_area_id: Option<i64>,
    #[serde(default)]
    pub titles: Vec<TitleEntry>,
    #[serde(default)]
    pub aux_area_ids: Vec<i64>,
    #[serde(default)]
    pub grade_ids: Vec<i64>,
    #[serde(default, skip_deserializing)]
    pub exists_in_other_institution: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub teacher_id: i64,
    pub created: bool,
    pub titles: PlanCounts,
    pub aux_areas: PlanCounts,
    pub grades: PlanCounts,
    pub linked: bool,
}

impl SaveOutcome {
    pub fn child_changes(&self) -> usize {
        [self.titles, self.aux_areas, self.grades]
            .iter()
            .map(|c| c.inserted + c.updated + c.deleted)
            .sum()
    }
}

fn find_teacher_id(records: &dyn RecordStore, id_type: i64, id_number: &str) -> Result<Option<i64>, GatewayError> {
    let rows = records.select(
        &Select::from("teachers", &["id"])
            .where_eq("id_type", id_type)
            .where_eq("id_number", id_number.trim()),
    )?;
    Ok(rows.first().and_then(|r| value_i64(r, "id")))
}

fn list_titles(records: &dyn RecordStore, teacher_id: i64) -> Result<Vec<TitleEntry>, GatewayError> {
    let rows = records.select(
        &Select::from("teacher_titles", &["id", "title_type", "title"])
            .where_eq("teacher_id", teacher_id)
            .order_by("id"),
    )?;
    Ok(rows
        .iter()
        .map(|r| TitleEntry {
            id: value_i64(r, "id"),
            title_type: value_str(r, "title_type").unwrap_or_default(),
            title: value_str(r, "title").unwrap_or_default(),
        })
        .collect())
}

fn list_links(records: &dyn RecordStore, query: Select, column: &str) -> Result<Vec<LinkedId>, GatewayError> {
    Ok(records
        .select(&query.order_by("id"))?
        .iter()
        .filter_map(|r| {
            Some(LinkedId {
                id: value_i64(r, "id"),
                target: value_i64(r, column)?,
            })
        })
        .collect())
}

fn wanted(ids: &[i64]) -> Vec<LinkedId> {
    ids.iter()
        .map(|id| LinkedId {
            id: None,
            target: *id,
        })
        .collect()
}

fn write_profile(
    tx: &dyn RecordStore,
    profile: &TeacherProfile,
    institution_id: i64,
) -> Result<SaveOutcome, GatewayError> {
    let fields = row(&[
        ("id_type", json!(profile.id_type)),
        ("id_number", json!(profile.id_number.trim())),
        ("first_name", json!(profile.first_name.trim())),
        ("last_name", json!(profile.last_name.trim())),
        ("email", json!(profile.email)),
        ("phone", json!(profile.phone)),
        ("main_area_id", json!(profile.main_area_id)),
        ("active", json!(1)),
    ]);
    let existing = match profile.teacher_id {
        Some(id) => Some(id),
        None => find_teacher_id(tx, profile.id_type, &profile.id_number)?,
    };
    let (teacher_id, created) = match existing {
        Some(id) => {
            if tx.update("teachers", &fields, &row(&[("id", json!(id))]))? == 0 {
                return Err(GatewayError::missing("teacher", id.to_string()));
            }
            (id, false)
        }
        None => (tx.insert("teachers", &fields)?, true),
    };
    let mut out = SaveOutcome {
        teacher_id,
        created,
        ..SaveOutcome::default()
    };

    let titles = reconcile_by_identity(&profile.titles, &list_titles(tx, teacher_id)?);
    out.titles = apply_plan(tx, "teacher_titles", &titles, |t| {
        row(&[
            ("teacher_id", json!(teacher_id)),
            ("title_type", json!(t.title_type.trim())),
            ("title", json!(t.title.trim())),
        ])
    })?;

    let current_areas = list_links(
        tx,
        Select::from("teacher_aux_areas", &["id", "area_id"]).where_eq("teacher_id", teacher_id),
        "area_id",
    )?;
    let areas = reconcile_by_natural_key(&wanted(&profile.aux_area_ids), &current_areas);
    out.aux_areas = apply_plan(tx, "teacher_aux_areas", &areas, |a| {
        row(&[("teacher_id", json!(teacher_id)), ("area_id", json!(a.target))])
    })?;

    // Grades held at other institutions are left alone.
    let current_grades = list_links(
        tx,
        Select::from("teacher_grades", &["id", "grade_id"])
            .where_eq("teacher_id", teacher_id)
            .where_eq("institution_id", institution_id),
        "grade_id",
    )?;
    let grades = reconcile_by_natural_key(&wanted(&profile.grade_ids), &current_grades);
    out.grades = apply_plan(tx, "teacher_grades", &grades, |g| {
        row(&[
            ("teacher_id", json!(teacher_id)),
            ("institution_id", json!(institution_id)),
            ("grade_id", json!(g.target)),
        ])
    })?;

    let link = tx.select(
        &Select::from("institution_teachers", &["id", "active"])
            .where_eq("teacher_id", teacher_id)
            .where_eq("institution_id", institution_id),
    )?;
    match link.first() {
        Some(r) if value_i64(r, "active") == Some(1) => {}
        Some(r) => {
            let id = value_i64(r, "id").unwrap_or_default();
            tx.update("institution_teachers", &row(&[("active", json!(1))]), &row(&[("id", json!(id))]))?;
            out.linked = true;
        }
        None => {
            tx.insert(
                "institution_teachers",
                &row(&[
                    ("teacher_id", json!(teacher_id)),
                    ("institution_id", json!(institution_id)),
                    ("active", json!(1)),
                ]),
            )?;
            out.linked = true;
        }
    }
    Ok(out)
}

/// Inserts or updates the teacher and brings every child collection in line
/// with `profile`, all in one transaction.
pub fn save_teacher(
    records: &dyn RecordStore,
    profile: &TeacherProfile,
    institution_id: i64,
) -> Result<SaveOutcome, VisitError> {
    for (name, value) in [
        ("idNumber", &profile.id_number),
        ("firstName", &profile.first_name),
        ("lastName", &profile.last_name),
    ] {
        if value.trim().is_empty() {
            return Err(VisitError::ValidationFailed(format!("{name} is required")));
        }
    }
    if let Some(bad) = profile
        .titles
        .iter()
        .find(|t| t.title.trim().is_empty() || t.title_type.trim().is_empty())
    {
        return Err(VisitError::ValidationFailed(format!(
            "title entries need a type and a title: {bad:?}"
        )));
    }
    let institution = records.select(&Select::from("institutions", &["id"]).where_eq("id", institution_id))?;
    if institution.is_empty() {
        return Err(VisitError::NotFound(format!("institution {institution_id} not found")));
    }

    let mut saved = SaveOutcome::default();
    let result = records.atomically(&mut |tx| {
        saved = write_profile(tx, profile, institution_id)?;
        Ok(())
    });
    match result {
        Ok(()) => {}
        Err(GatewayError::Conflict(msg)) => {
            return Err(VisitError::ValidationFailed(format!(
                "another teacher already uses this identification: {msg}"
            )))
        }
        Err(e) => {
            tracing::error!(institution = institution_id, "teacher save rolled back: {e}");
            return Err(e.into());
        }
    }
    tracing::info!(
        teacher = saved.teacher_id,
        created = saved.created,
        changes = saved.child_changes(),
        "teacher saved"
    );
    Ok(saved)
}

/// Full profile by identification, flagged when the teacher also belongs to
/// an institution other than `institution_id`.
pub fn find_teacher(
    records: &dyn RecordStore,
    id_type: i64,
    id_number: &str,
    institution_id: i64,
) -> Result<Option<TeacherProfile>, VisitError> {
    let rows = records.select(
        &Select::from(
            "teachers",
            &["id", "id_type", "id_number", "first_name", "last_name", "email", "phone", "main_area_id"],
        )
        .where_eq("id_type", id_type)
        .where_eq("id_number", id_number.trim()),
    )?;
    let Some(t) = rows.first() else {
        return Ok(None);
    };
    let Some(teacher_id) = value_i64(t, "id") else {
        return Ok(None);
    };

    let aux_area_ids = list_links(
        records,
        Select::from("teacher_aux_areas", &["id", "area_id"]).where_eq("teacher_id", teacher_id),
        "area_id",
    )?
    .into_iter()
    .map(|l| l.target)
    .collect();
    let grade_ids = list_links(
        records,
        Select::from("teacher_grades", &["id", "grade_id"])
            .where_eq("teacher_id", teacher_id)
            .where_eq("institution_id", institution_id),
        "grade_id",
    )?
    .into_iter()
    .map(|l| l.target)
    .collect();
    let exists_in_other_institution = list_links(
        records,
        Select::from("institution_teachers", &["id", "institution_id"]).where_eq("teacher_id", teacher_id),
        "institution_id",
    )?
    .iter()
    .any(|l| l.target != institution_id);

    Ok(Some(TeacherProfile {
        teacher_id: Some(teacher_id),
        id_type: value_i64(t, "id_type").unwrap_or(id_type),
        id_number: value_str(t, "id_number").unwrap_or_default(),
        first_name: value_str(t, "first_name").unwrap_or_default(),
        last_name: value_str(t, "last_name").unwrap_or_default(),
        email: value_str(t, "email"),
        phone: value_str(t, "phone"),
        main_area_id: value_i64(t, "main_area_id"),
        titles: list_titles(records, teacher_id)?,
        aux_area_ids,
        grade_ids,
        exists_in_other_institution,
    }))
}
