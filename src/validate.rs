use crate::sheet::{is_blank, Sheet};
use crate::template::{CellRange, TemplateSchema};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    pub failing_field: Option<String>,
    pub message: String,
}

impl ValidationOutcome {
    fn pass(message: &str) -> Self {
        Self {
            valid: true,
            failing_field: None,
            message: message.to_string(),
        }
    }

    fn fail(field: Option<String>, message: String) -> Self {
        Self {
            valid: false,
            failing_field: field,
            message,
        }
    }
}

pub struct FieldValidator<'a> {
    schema: &'a TemplateSchema,
}

impl<'a> FieldValidator<'a> {
    pub fn new(schema: &'a TemplateSchema) -> Self {
        Self { schema }
    }

    pub fn is_editable(&self, a1: &str) -> bool {
        CellRange::parse(a1)
            .and_then(|r| self.schema.field_at(r.start_row, r.start_col))
            .map(|f| f.editable)
            .unwrap_or(false)
    }

    pub fn is_required(&self, a1: &str) -> bool {
        CellRange::parse(a1)
            .and_then(|r| self.schema.field_at(r.start_row, r.start_col))
            .map(|f| f.required)
            .unwrap_or(false)
    }

    /// Stops at the first required field without a value so the caller always
    /// has exactly one thing to tell the user.
    pub fn validate_required_fields(&self, sheet: &Sheet) -> ValidationOutcome {
        for field in self.schema.fields.iter().filter(|f| f.required) {
            let location = field.range.to_string();
            let missing = sheet.get(&location).map(is_blank).unwrap_or(true);
            if !missing {
                continue;
            }
            let name = self
                .schema
                .label_for(field)
                .and_then(|l| l.label.as_deref())
                .map(|l| l.trim().trim_end_matches(':').trim().to_string())
                .unwrap_or_else(|| location.clone());
            return ValidationOutcome::fail(Some(location), format!("{name} is required"));
        }
        ValidationOutcome::pass("all required fields are filled in")
    }
}

pub fn validate_participant_count(expected: i64, actual: i64) -> ValidationOutcome {
    if actual < expected {
        return ValidationOutcome::fail(
            None,
            format!(
                "expected {expected} participants but only {actual} are registered; missing {}",
                expected - actual
            ),
        );
    }
    if actual > expected {
        return ValidationOutcome::fail(
            None,
            format!(
                "{actual} participants are registered but {expected} were expected; remove excess {}",
                actual - expected
            ),
        );
    }
    if expected == 0 {
        return ValidationOutcome::fail(
            None,
            "must register at least one participant".to_string(),
        );
    }
    ValidationOutcome::pass("participant count matches")
}
