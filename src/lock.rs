use crate::error::VisitError;
use crate::gateway::DocumentStore;
use crate::sheet::{Protection, Sheet};

pub const LOCK_DESCRIPTION: &str = "Finalized visit";

/// Replaces every protection on the sheet with one strict whole-sheet
/// protection that only `editor` may pass.
pub fn apply_lock(sheet: &mut Sheet, editor: &str) {
    sheet.protections.clear();
    sheet.protections.push(Protection {
        range: None,
        description: LOCK_DESCRIPTION.to_string(),
        editors: vec![editor.to_string()],
        warning_only: false,
        domain_edit: false,
    });
}

pub fn is_locked(sheet: &Sheet) -> bool {
    sheet
        .protections
        .iter()
        .any(|p| p.range.is_none() && !p.warning_only)
}

pub fn lock_document(store: &dyn DocumentStore, document_id: &str, editor: &str) -> Result<(), VisitError> {
    let mut sheet = store
        .open_sheet(document_id)
        .map_err(|e| VisitError::LockFailure(e.to_string()))?;
    apply_lock(&mut sheet, editor);
    store
        .save_sheet(document_id, &sheet)
        .map_err(|e| VisitError::LockFailure(e.to_string()))
}
