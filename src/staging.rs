//! Staged visit data: evidence descriptors and working-line notes.
//!
//! Both live as JSON blobs in the session of the visit document until
//! finalization replays them into the record store. Older deployments wrote
//! the same blobs with Spanish field names; those still parse.

use crate::error::{GatewayError, VisitError};
use crate::session::{self, SessionContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceState {
    #[serde(alias = "activa")]
    Active,
    #[serde(alias = "eliminada")]
    Deleted,
}

impl EvidenceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceDescriptor {
    #[serde(rename = "type", alias = "tipo")]
    pub evidence_type: String,
    #[serde(alias = "nombreOriginal")]
    pub original_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(alias = "estado")]
    pub state: EvidenceState,
    #[serde(alias = "driveFileId")]
    pub storage_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl EvidenceDescriptor {
    pub fn is_active(&self) -> bool {
        self.state == EvidenceState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    Achievements,
    Difficulties,
    Agreements,
}

impl NoteCategory {
    pub const ALL: [NoteCategory; 3] = [Self::Achievements, Self::Difficulties, Self::Agreements];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "achievements" | "logros" => Some(Self::Achievements),
            "difficulties" | "dificultades" => Some(Self::Difficulties),
            "agreements" | "acuerdos" => Some(Self::Agreements),
            _ => None,
        }
    }

    /// Child table holding the durable notes of this category.
    pub fn table(self) -> &'static str {
        match self {
            Self::Achievements => "achievements",
            Self::Difficulties => "difficulties",
            Self::Agreements => "agreements",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingLineNotes {
    #[serde(default, alias = "logros")]
    pub achievements: Vec<String>,
    #[serde(default, alias = "dificultades")]
    pub difficulties: Vec<String>,
    #[serde(default, alias = "acuerdos")]
    pub agreements: Vec<String>,
}

impl WorkingLineNotes {
    pub fn items(&self, category: NoteCategory) -> &[String] {
        match category {
            NoteCategory::Achievements => &self.achievements,
            NoteCategory::Difficulties => &self.difficulties,
            NoteCategory::Agreements => &self.agreements,
        }
    }

    pub fn items_mut(&mut self, category: NoteCategory) -> &mut Vec<String> {
        match category {
            NoteCategory::Achievements => &mut self.achievements,
            NoteCategory::Difficulties => &mut self.difficulties,
            NoteCategory::Agreements => &mut self.agreements,
        }
    }

    pub fn is_empty(&self) -> bool {
        NoteCategory::ALL.iter().all(|c| self.items(*c).is_empty())
    }
}

/// Notes grouped by working line name.
pub type StagedNotes = BTreeMap<String, WorkingLineNotes>;

fn read_blob<T: serde::de::DeserializeOwned>(
    ctx: &SessionContext<'_>,
    key: &str,
) -> Result<Option<T>, GatewayError> {
    let Some(raw) = ctx.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<T>(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(document = ctx.document_id(), key, "discarding corrupt staging blob: {e}");
            Ok(None)
        }
    }
}

fn write_blob<T: Serialize>(ctx: &SessionContext<'_>, key: &str, value: &T) -> Result<(), GatewayError> {
    ctx.set(key, &serde_json::to_string(value)?)
}

/// `None` when nothing was staged or the blob is unreadable.
pub fn load_evidence(ctx: &SessionContext<'_>) -> Result<Option<Vec<EvidenceDescriptor>>, GatewayError> {
    read_blob(ctx, session::STAGED_EVIDENCE)
}

pub fn save_evidence(ctx: &SessionContext<'_>, entries: &[EvidenceDescriptor]) -> Result<(), GatewayError> {
    write_blob(ctx, session::STAGED_EVIDENCE, &entries)
}

pub fn load_notes(ctx: &SessionContext<'_>) -> Result<StagedNotes, GatewayError> {
    Ok(read_blob(ctx, session::STAGED_NOTES)?.unwrap_or_default())
}

pub fn save_notes(ctx: &SessionContext<'_>, notes: &StagedNotes) -> Result<(), GatewayError> {
    write_blob(ctx, session::STAGED_NOTES, notes)
}

pub fn stage_note(
    ctx: &SessionContext<'_>,
    working_line: &str,
    category: NoteCategory,
    text: &str,
) -> Result<StagedNotes, VisitError> {
    let line = working_line.trim();
    let text = text.trim();
    if line.is_empty() {
        return Err(VisitError::ValidationFailed("working line is required".to_string()));
    }
    if text.is_empty() {
        return Err(VisitError::ValidationFailed("note text is required".to_string()));
    }
    let mut notes = load_notes(ctx)?;
    notes
        .entry(line.to_string())
        .or_default()
        .items_mut(category)
        .push(text.to_string());
    save_notes(ctx, &notes)?;
    Ok(notes)
}

/// Replaces all staged notes, dropping empty items and working lines.
pub fn replace_notes(ctx: &SessionContext<'_>, notes: StagedNotes) -> Result<StagedNotes, GatewayError> {
    let mut cleaned = StagedNotes::new();
    for (line, mut entry) in notes {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        for category in NoteCategory::ALL {
            let items = entry.items_mut(category);
            items.iter_mut().for_each(|s| *s = s.trim().to_string());
            items.retain(|s| !s.is_empty());
        }
        if !entry.is_empty() {
            cleaned.insert(line, entry);
        }
    }
    save_notes(ctx, &cleaned)?;
    Ok(cleaned)
}

/// Read-only summary of one category, grouped and numbered by working line.
/// Empty when no working line has items in the category.
pub fn notes_summary(notes: &StagedNotes, category: NoteCategory) -> String {
    let blocks: Vec<String> = notes
        .iter()
        .filter(|(_, n)| !n.items(category).is_empty())
        .enumerate()
        .map(|(i, (line, n))| {
            let mut block = format!("{}. {}", i + 1, line);
            for item in n.items(category) {
                block.push_str("\n• ");
                block.push_str(item);
            }
            block
        })
        .collect();
    if blocks.is_empty() {
        return String::new();
    }
    format!("Work Lines\n\n{}", blocks.join("\n\n"))
}

pub fn evidence_summary(entries: &[EvidenceDescriptor]) -> String {
    let active: Vec<String> = entries
        .iter()
        .filter(|e| e.is_active())
        .map(|e| format!("{} ({})", e.evidence_type, e.original_name))
        .collect();
    if active.is_empty() {
        "No evidence uploaded.".to_string()
    } else {
        active.join("\n")
    }
}
