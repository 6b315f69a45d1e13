//! Live document surface: the cells, validations and protections of one
//! visit report, persisted by the document store as JSON.

use crate::template::{column_index, column_letters, BorderKind, CellRange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protection {
    /// `None` protects the whole sheet.
    pub range: Option<CellRange>,
    pub description: String,
    pub editors: Vec<String>,
    pub warning_only: bool,
    pub domain_edit: bool,
}

impl Protection {
    pub fn covers(&self, row: u32, col: u32) -> bool {
        self.range.map(|r| r.contains(row, col)).unwrap_or(true)
    }

    pub fn allows(&self, editor: &str) -> bool {
        self.warning_only || self.editors.iter().any(|e| e == editor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sheet {
    pub name: String,
    /// Values keyed by anchor cell ("I8").
    pub cells: BTreeMap<String, Value>,
    /// Allowed values keyed by range text.
    pub validations: BTreeMap<String, Vec<String>>,
    pub merges: Vec<CellRange>,
    pub borders: Vec<(CellRange, BorderKind)>,
    pub hidden_rows: BTreeSet<u32>,
    pub column_widths: BTreeMap<String, u32>,
    pub row_heights: BTreeMap<u32, u32>,
    pub protections: Vec<Protection>,
    pub max_rows: u32,
    pub font_family: Option<String>,
    pub hide_gridlines: bool,
}

pub const DEFAULT_MAX_ROWS: u32 = 1000;

impl Sheet {
    pub fn blank(name: &str) -> Self {
        Self {
            name: name.to_string(),
            max_rows: DEFAULT_MAX_ROWS,
            ..Self::default()
        }
    }

    /// Resolves a cell to the anchor of the merge that contains it, so reads
    /// and writes on any part of a merged range hit the same value.
    pub fn anchor_of(&self, row: u32, col: u32) -> String {
        self.merges
            .iter()
            .find(|m| m.contains(row, col))
            .map(|m| m.anchor())
            .unwrap_or_else(|| format!("{}{}", column_letters(col), row))
    }

    pub fn get(&self, a1: &str) -> Option<&Value> {
        let range = CellRange::parse(a1)?;
        self.cells.get(&self.anchor_of(range.start_row, range.start_col))
    }

    pub fn get_str(&self, a1: &str) -> Option<String> {
        match self.get(a1)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_f64(&self, a1: &str) -> Option<f64> {
        match self.get(a1)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn set(&mut self, a1: &str, value: Value) {
        let Some(range) = CellRange::parse(a1) else {
            return;
        };
        let key = self.anchor_of(range.start_row, range.start_col);
        if value.is_null() {
            self.cells.remove(&key);
        } else {
            self.cells.insert(key, value);
        }
    }

    pub fn clear(&mut self, a1: &str) {
        self.set(a1, Value::Null);
    }

    pub fn merge(&mut self, range: CellRange) {
        if !self.merges.contains(&range) {
            self.merges.push(range);
        }
    }

    pub fn set_validation(&mut self, range: CellRange, allowed: Vec<String>) {
        self.validations.insert(range.to_string(), allowed);
    }

    pub fn clear_validation(&mut self, range: CellRange) {
        self.validations.remove(&range.to_string());
    }

    pub fn validation_for(&self, a1: &str) -> Option<&Vec<String>> {
        let range = CellRange::parse(a1)?;
        self.validations.iter().find_map(|(k, v)| {
            CellRange::parse(k)
                .filter(|r| r.contains(range.start_row, range.start_col))
                .map(|_| v)
        })
    }

    pub fn hide_row(&mut self, row: u32) {
        self.hidden_rows.insert(row);
    }

    pub fn show_row(&mut self, row: u32) {
        self.hidden_rows.remove(&row);
    }

    /// Drops every row past `last_row`, together with the values stored there.
    pub fn truncate_rows(&mut self, last_row: u32) {
        if self.max_rows <= last_row {
            return;
        }
        self.max_rows = last_row;
        self.cells.retain(|k, _| {
            CellRange::parse(k)
                .map(|r| r.start_row <= last_row)
                .unwrap_or(false)
        });
    }

    pub fn ensure_rows(&mut self, rows: u32) {
        if self.max_rows < rows {
            self.max_rows = rows;
        }
    }

    /// Number of non-blank values in `column` from `from_row` down.
    pub fn count_non_empty(&self, column: &str, from_row: u32) -> usize {
        let Some(col) = column_index(column) else {
            return 0;
        };
        self.cells
            .iter()
            .filter(|(k, v)| {
                CellRange::parse(k)
                    .map(|r| r.start_col == col && r.start_row >= from_row)
                    .unwrap_or(false)
                    && !is_blank(v)
            })
            .count()
    }

    /// Protections that cover the cell and do not let `editor` through.
    pub fn blocking_protection(&self, a1: &str, editor: &str) -> Option<&Protection> {
        let range = CellRange::parse(a1)?;
        self.protections
            .iter()
            .find(|p| p.covers(range.start_row, range.start_col) && !p.allows(editor))
    }
}

pub fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merged_cells_share_one_value() {
        let mut sheet = Sheet::blank("Visit");
        sheet.merge(CellRange::parse("L8:N8").expect("range"));
        sheet.set("M8", json!(3));
        assert_eq!(sheet.get_f64("L8"), Some(3.0));
        assert_eq!(sheet.get_f64("N8"), Some(3.0));
        assert_eq!(sheet.cells.len(), 1);
    }

    #[test]
    fn truncate_drops_values_below_boundary() {
        let mut sheet = Sheet::blank("Visit");
        sheet.set("A5", json!("keep"));
        sheet.set("A25", json!("drop"));
        sheet.truncate_rows(20);
        assert_eq!(sheet.max_rows, 20);
        assert_eq!(sheet.get_str("A5").as_deref(), Some("keep"));
        assert!(sheet.get("A25").is_none());
    }

    #[test]
    fn counts_names_below_start_row() {
        let mut sheet = Sheet::blank("Visit");
        sheet.set("B19", json!("FULL NAME"));
        sheet.set("B21", json!("Ana Ruiz"));
        sheet.set("B22", json!("   "));
        sheet.set("B23", json!("Luis Gil"));
        assert_eq!(sheet.count_non_empty("B", 21), 2);
    }

    #[test]
    fn protection_blocks_non_editors_only() {
        let mut sheet = Sheet::blank("Visit");
        sheet.protections.push(Protection {
            range: CellRange::parse("I8"),
            description: "sequence".into(),
            editors: vec!["owner@example.org".into()],
            warning_only: false,
            domain_edit: false,
        });
        assert!(sheet.blocking_protection("I8", "someone@example.org").is_some());
        assert!(sheet.blocking_protection("I8", "owner@example.org").is_none());
        assert!(sheet.blocking_protection("L8", "someone@example.org").is_none());
    }
}
