use crate::error::GatewayError;
use crate::gateway::CatalogGateway;
use crate::sheet::{Protection, Sheet};
use crate::template::TemplateSchema;
use serde_json::Value;
use std::collections::BTreeMap;

/// Dropdown options of every dynamic source, keyed by table.
pub type ListData = BTreeMap<String, Vec<String>>;

/// Queries each distinct dynamic source once. Provisioning calls this a
/// single time and reuses the result for every document it creates.
pub fn resolve_list_data(
    catalog: &dyn CatalogGateway,
    schema: &TemplateSchema,
) -> Result<ListData, GatewayError> {
    let mut out = ListData::new();
    for source in schema.dynamic_sources() {
        let values = catalog.list_active_values(source)?;
        tracing::debug!(table = %source.table, count = values.len(), "dropdown source resolved");
        out.insert(source.table.clone(), values);
    }
    Ok(out)
}

/// Lays the schema over `sheet`: captions, merges, dropdowns, visibility,
/// borders, protections and sizing. Re-rendering a sheet gives the same result.
pub fn apply_template(sheet: &mut Sheet, schema: &TemplateSchema, lists: &ListData, owner_editor: &str) {
    for range in &schema.merges {
        sheet.merge(*range);
    }

    sheet.protections.clear();
    sheet.borders.clear();
    for field in &schema.fields {
        if let Some(label) = &field.label {
            sheet.set(&field.range.anchor(), Value::String(label.clone()));
        }

        if !field.options.is_empty() {
            sheet.set_validation(field.range, field.options.clone());
        } else if let Some(source) = &field.source {
            match lists.get(&source.table) {
                Some(values) => sheet.set_validation(field.range, values.clone()),
                None => tracing::warn!(table = %source.table, "no list data for dropdown"),
            }
        }

        if field.hidden {
            for row in field.range.start_row..=field.range.end_row {
                sheet.hide_row(row);
            }
        }

        if let Some(kind) = field.border {
            sheet.borders.push((field.range, kind));
        }

        if field.protected || !field.editable {
            sheet.protections.push(Protection {
                range: Some(field.range),
                description: field
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("system field {}", field.range)),
                editors: vec![owner_editor.to_string()],
                warning_only: false,
                domain_edit: false,
            });
        }
    }

    sheet.font_family = schema.font_family.clone();
    sheet.hide_gridlines = schema.hide_gridlines;
    for (col, width) in &schema.column_widths {
        sheet.column_widths.insert(col.clone(), *width);
    }
    for (row, height) in &schema.row_heights {
        sheet.row_heights.insert(*row, *height);
    }
    if let Some(last) = schema.delete_rows_after {
        sheet.truncate_rows(last);
    }
}
