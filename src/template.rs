//! Declarative layout of a visit report document.
//!
//! The schema is pure data: which cells carry static labels, which ones the
//! professional fills in, which are required, how dropdowns get their
//! options. It is built once per process and shared by the renderer, the
//! validator and the edit triggers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rectangular A1-style range, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl CellRange {
    pub fn cell(row: u32, col: u32) -> Self {
        Self {
            start_row: row,
            start_col: col,
            end_row: row,
            end_col: col,
        }
    }

    /// Parses `"I8"` or `"A1:U5"`. Column letters are case-insensitive.
    pub fn parse(a1: &str) -> Option<Self> {
        let t = a1.trim();
        let (first, second) = match t.split_once(':') {
            Some((a, b)) => (a, Some(b)),
            None => (t, None),
        };
        let (r1, c1) = parse_cell(first)?;
        let (r2, c2) = match second {
            Some(s) => parse_cell(s)?,
            None => (r1, c1),
        };
        Some(Self {
            start_row: r1.min(r2),
            start_col: c1.min(c2),
            end_row: r1.max(r2),
            end_col: c1.max(c2),
        })
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.start_row && row <= self.end_row && col >= self.start_col && col <= self.end_col
    }

    /// Key of the top-left cell, where the value of a merged range lives.
    pub fn anchor(&self) -> String {
        format!("{}{}", column_letters(self.start_col), self.start_row)
    }

    pub fn is_single_cell(&self) -> bool {
        self.start_row == self.end_row && self.start_col == self.end_col
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", self.anchor())
        } else {
            write!(
                f,
                "{}:{}{}",
                self.anchor(),
                column_letters(self.end_col),
                self.end_row
            )
        }
    }
}

fn parse_cell(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    let split = s.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = s.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let row = digits.parse::<u32>().ok().filter(|r| *r > 0)?;
    Some((row, column_index(letters)?))
}

pub fn column_index(letters: &str) -> Option<u32> {
    let mut col: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let v = (ch.to_ascii_uppercase() as u8 - b'A') as u32 + 1;
        col = col.checked_mul(26)?.checked_add(v)?;
    }
    if col == 0 {
        None
    } else {
        Some(col)
    }
}

pub fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        out.push((b'A' + rem) as char);
        col = (col - 1) / 26;
    }
    out.iter().rev().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Dropdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderKind {
    Bottom,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSource {
    pub table: String,
    pub value_column: String,
    pub active_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalVisibility {
    pub field: CellRange,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub range: CellRange,
    pub label: Option<String>,
    pub editable: bool,
    pub required: bool,
    pub protected: bool,
    pub kind: FieldKind,
    pub options: Vec<String>,
    pub source: Option<DynamicSource>,
    pub visible_when: Option<ConditionalVisibility>,
    pub border: Option<BorderKind>,
    pub hidden: bool,
}

impl Field {
    fn at(range: &str) -> Self {
        Self {
            // Ranges below are compile-time literals; an unparsable one would
            // show up immediately in the schema tests.
            range: CellRange::parse(range).unwrap_or(CellRange::cell(1, 1)),
            label: None,
            editable: false,
            required: false,
            protected: false,
            kind: FieldKind::Text,
            options: Vec::new(),
            source: None,
            visible_when: None,
            border: None,
            hidden: false,
        }
    }

    /// Protected static caption.
    pub fn caption(range: &str, label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            protected: true,
            ..Self::at(range)
        }
    }

    /// Value cell the system fills in; the professional cannot edit it.
    pub fn output(range: &str, kind: FieldKind) -> Self {
        Self {
            protected: true,
            kind,
            ..Self::at(range)
        }
    }

    /// Value cell the professional fills in.
    pub fn input(range: &str, kind: FieldKind) -> Self {
        Self {
            editable: true,
            kind,
            ..Self::at(range)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn bordered(mut self, border: BorderKind) -> Self {
        self.border = Some(border);
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.kind = FieldKind::Dropdown;
        self.options = options.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_source(mut self, table: &str, value_column: &str, active_column: &str) -> Self {
        self.kind = FieldKind::Dropdown;
        self.source = Some(DynamicSource {
            table: table.to_string(),
            value_column: value_column.to_string(),
            active_column: active_column.to_string(),
        });
        self
    }

    pub fn visible_when(mut self, field: &str, value: &str) -> Self {
        if let Some(range) = CellRange::parse(field) {
            self.visible_when = Some(ConditionalVisibility {
                field: range,
                value: value.to_string(),
            });
        }
        self.hidden = true;
        self
    }

    pub fn has_label(&self) -> bool {
        self.label.as_deref().map(|l| !l.trim().is_empty()).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct TemplateSchema {
    pub fields: Vec<Field>,
    pub merges: Vec<CellRange>,
    pub column_widths: Vec<(String, u32)>,
    pub row_heights: Vec<(u32, u32)>,
    pub font_family: Option<String>,
    pub hide_gridlines: bool,
    pub delete_rows_after: Option<u32>,
}

// Well-known cells of the visit report.
pub const VISIT_DATE: &str = "I7";
pub const SEQUENCE_NUMBER: &str = "I8";
pub const DURATION_HOURS: &str = "L8";
pub const VISIT_TYPE: &str = "I9";
pub const INSTITUTION: &str = "I10";
pub const WORK_LINE: &str = "I11";
pub const WORK_LINE_AREA_ROW: u32 = 12;
pub const OBJECTIVE: &str = "I13";
pub const ACHIEVEMENTS: &str = "Q19";
pub const DIFFICULTIES: &str = "R19";
pub const AGREEMENTS: &str = "S19";
pub const EVIDENCE: &str = "T19";
pub const ROLE_COLUMN: &str = "A";
pub const NAME_COLUMN: &str = "B";
pub const NAME_END_COLUMN: &str = "J";

impl TemplateSchema {
    /// Standard layout of a visit report sheet.
    pub fn visit_report() -> Self {
        use BorderKind::{Bottom, Full};
        use FieldKind::{Date, Number, Text};

        let fields = vec![
            Field::caption(
                "A1:U5",
                "STRENGTHENING PEDAGOGICAL AND CURRICULAR INNOVATION\nFIELD VISIT REPORT",
            ),
            Field::caption("B7:H7", "VISIT DATE:"),
            Field::output("I7:N7", Date).required().bordered(Bottom),
            Field::caption("B8:H8", "VISIT No."),
            Field::output("I8", Number).required().bordered(Bottom),
            Field::caption("J8:K8", "DURATION (Hours)"),
            Field::input("L8:N8", Number).required().bordered(Bottom),
            Field::caption("B9:H9", "VISIT TYPE"),
            Field::input("I9:N9", Text)
                .with_options(&["Onboarding", "Work Line", "Management"])
                .required()
                .bordered(Bottom),
            Field::caption("B10:H10", "INSTITUTION"),
            Field::output("I10:R10", Text).required().bordered(Bottom),
            Field::caption("B11:H11", "WORK LINE:"),
            Field::input("I11:R11", Text)
                .with_source("work_lines", "name", "active")
                .required()
                .bordered(Bottom),
            Field::caption("B12:H12", "AREA:"),
            Field::input("I12:R12", Text)
                .with_source("work_line_areas", "name", "active")
                .visible_when("I11:R11", "Study Plans")
                .bordered(Bottom),
            Field::caption("B13:H13", "OBJECTIVE:"),
            Field::input("I13:R16", Text).required().bordered(Bottom),
            Field::caption("A18:K18", "PARTICIPANTS").bordered(Full),
            Field::caption("A19:A20", "ROLE").bordered(Full),
            Field::caption("B19:J20", "FULL NAME").bordered(Full),
            Field::caption("K19:K20", "TOTAL\nPARTICIPANTS").bordered(Full),
            Field::caption("L18:N20", "TEACHER\nAREA").bordered(Full),
            Field::caption("O18:O20", "GRADES").bordered(Full),
            Field::caption("P18:P20", "HOURS").bordered(Full),
            Field::caption("Q18", "ACHIEVEMENTS").bordered(Full),
            Field::caption("R18", "DIFFICULTIES").bordered(Full),
            Field::caption("S18", "AGREEMENTS AND COMMITMENTS").bordered(Full),
            Field::caption("T18", "EVIDENCE").bordered(Full),
            Field::caption("U18", "SUPERVISOR NOTES").bordered(Full),
            Field::output("Q19:Q20", Text).bordered(Full),
            Field::output("R19:R20", Text).bordered(Full),
            Field::output("S19:S20", Text).bordered(Full),
            Field::output("T19:T20", Text).bordered(Full),
            Field::output("U19:U20", Text).bordered(Full),
        ];

        let merges = [
            "A1:U5", "B7:H7", "I7:N7", "B8:H8", "J8:K8", "L8:N8", "B9:H9", "I9:N9", "B10:H10",
            "I10:R10", "B11:H11", "I11:R11", "B12:H12", "I12:R12", "B13:H13", "I13:R16",
            "A18:K18", "A19:A20", "B19:J20", "K19:K20", "L18:N20", "O18:O20", "P18:P20",
            "Q19:Q20", "R19:R20", "S19:S20", "T19:T20", "U19:U20",
        ]
        .iter()
        .filter_map(|r| CellRange::parse(r))
        .collect();

        let column_widths = [
            ("A", 120),
            ("B", 39),
            ("C", 17),
            ("D", 26),
            ("E", 24),
            ("F", 32),
            ("G", 27),
            ("H", 53),
            ("I", 73),
            ("J", 71),
            ("K", 97),
            ("L", 30),
            ("M", 30),
            ("N", 41),
            ("O", 25),
            ("P", 17),
            ("Q", 179),
            ("R", 183),
            ("S", 178),
            ("T", 245),
            ("U", 213),
        ]
        .iter()
        .map(|(c, w)| (c.to_string(), *w))
        .collect();

        let row_heights = (1..=20)
            .map(|r| match r {
                5..=8 | 11 | 12 => (r, 27),
                9 | 10 => (r, 32),
                _ => (r, 20),
            })
            .collect();

        Self {
            fields,
            merges,
            column_widths,
            row_heights,
            font_family: Some("Calibri".to_string()),
            hide_gridlines: true,
            delete_rows_after: Some(20),
        }
    }

    /// First field whose range covers the cell.
    pub fn field_at(&self, row: u32, col: u32) -> Option<&Field> {
        self.fields.iter().find(|f| f.range.contains(row, col))
    }

    /// Caption describing `target`: the nearest non-editable labelled field on
    /// the same row, strictly to its left.
    pub fn label_for(&self, target: &Field) -> Option<&Field> {
        self.fields
            .iter()
            .filter(|f| !f.editable && f.has_label())
            .filter(|f| {
                f.range.start_row == target.range.start_row
                    && f.range.start_col < target.range.start_col
            })
            .max_by_key(|f| f.range.start_col)
    }

    /// Distinct dynamic sources, in declaration order.
    pub fn dynamic_sources(&self) -> Vec<&DynamicSource> {
        let mut out: Vec<&DynamicSource> = Vec::new();
        for src in self.fields.iter().filter_map(|f| f.source.as_ref()) {
            if !out.iter().any(|s| s.table == src.table) {
                out.push(src);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_cells_and_ranges() {
        let r = CellRange::parse("I8").expect("cell");
        assert_eq!((r.start_row, r.start_col), (8, 9));
        assert!(r.is_single_cell());

        let r = CellRange::parse("a1:u5").expect("range");
        assert_eq!((r.start_row, r.start_col, r.end_row, r.end_col), (1, 1, 5, 21));
        assert_eq!(r.to_string(), "A1:U5");

        assert!(CellRange::parse("8I").is_none());
        assert!(CellRange::parse("A0").is_none());
        assert!(CellRange::parse("").is_none());
    }

    #[test]
    fn column_letters_round_trip_past_z() {
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_index("AB"), Some(28));
    }

    #[test]
    fn every_required_field_resolves_a_caption() {
        let schema = TemplateSchema::visit_report();
        for field in schema.fields.iter().filter(|f| f.required) {
            let label = schema.label_for(field);
            assert!(label.is_some(), "no caption for {}", field.range);
        }
    }

    #[test]
    fn label_lookup_picks_nearest_caption_on_row() {
        let schema = TemplateSchema::visit_report();
        let duration = schema
            .fields
            .iter()
            .find(|f| f.range.anchor() == DURATION_HOURS)
            .expect("duration field");
        let label = schema.label_for(duration).expect("caption");
        assert_eq!(label.label.as_deref(), Some("DURATION (Hours)"));
    }

    #[test]
    fn dynamic_sources_are_deduplicated() {
        let schema = TemplateSchema::visit_report();
        let tables: Vec<&str> = schema
            .dynamic_sources()
            .iter()
            .map(|s| s.table.as_str())
            .collect();
        assert_eq!(tables, vec!["work_lines", "work_line_areas"]);
    }

    #[test]
    fn all_literal_ranges_parse() {
        let schema = TemplateSchema::visit_report();
        assert_eq!(schema.merges.len(), 28);
        assert!(schema
            .fields
            .iter()
            .all(|f| !(f.range.start_row == 1 && f.range.start_col == 1 && f.range.is_single_cell())));
    }
}
