use super::{value_i64, value_str, CatalogGateway, RecordStore, Select, TeacherName};
use crate::error::GatewayError;
use crate::template::DynamicSource;
use chrono::NaiveDate;

/// Catalog lookups answered from the record store.
pub struct RecordCatalog<'a> {
    records: &'a dyn RecordStore,
}

impl<'a> RecordCatalog<'a> {
    pub fn new(records: &'a dyn RecordStore) -> Self {
        Self { records }
    }
}

fn parse_day(raw: Option<String>) -> Option<NaiveDate> {
    let raw = raw?;
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

impl CatalogGateway for RecordCatalog<'_> {
    fn resolve_id(&self, table: &str, column: &str, value: &str) -> Result<Option<i64>, GatewayError> {
        let rows = self
            .records
            .select(&Select::from(table, &["id"]).where_eq(column, value.trim()).limit(1))?;
        Ok(rows.first().and_then(|r| value_i64(r, "id")))
    }

    fn list_active_values(&self, source: &DynamicSource) -> Result<Vec<String>, GatewayError> {
        let rows = self.records.select(
            &Select::from(&source.table, &[source.value_column.as_str()])
                .where_eq(&source.active_column, 1)
                .order_by(&source.value_column),
        )?;
        Ok(rows
            .iter()
            .filter_map(|r| value_str(r, &source.value_column))
            .filter(|v| !v.trim().is_empty())
            .collect())
    }

    fn find_cutoff_week(&self, date: NaiveDate) -> Result<Option<i64>, GatewayError> {
        let rows = self.records.select(
            &Select::from("cutoff_weeks", &["id", "starts_on", "ends_on"]).order_by("starts_on"),
        )?;
        for r in &rows {
            let (Some(start), Some(end)) = (
                parse_day(value_str(r, "starts_on")),
                parse_day(value_str(r, "ends_on")),
            ) else {
                tracing::warn!(row = ?r.get("id"), "skipping cut-off week with unreadable dates");
                continue;
            };
            if start <= date && date <= end {
                return Ok(value_i64(r, "id"));
            }
        }
        Ok(None)
    }

    fn list_institution_teachers(&self, institution_id: i64) -> Result<Vec<TeacherName>, GatewayError> {
        let rows = self.records.select(
            &Select::from(
                "institution_teachers",
                &["teachers.id", "teachers.first_name", "teachers.last_name"],
            )
            .join("teachers", "id", "institution_teachers.teacher_id")
            .where_eq("institution_teachers.institution_id", institution_id)
            .where_eq("institution_teachers.active", 1)
            .where_eq("teachers.active", 1)
            .order_by("teachers.first_name")
            .order_by("teachers.last_name"),
        )?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let first = value_str(r, "first_name").unwrap_or_default();
                let last = value_str(r, "last_name").unwrap_or_default();
                Some(TeacherName {
                    teacher_id: value_i64(r, "id")?,
                    full_name: format!("{} {}", first.trim(), last.trim()).trim().to_string(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{row, SqliteRecordStore};
    use serde_json::json;

    #[test]
    fn cutoff_week_range_is_inclusive() {
        let conn = rusqlite::Connection::open_in_memory().expect("db");
        crate::db::init_schema(&conn).expect("schema");
        let store = SqliteRecordStore::new(&conn);
        let week = store
            .insert(
                "cutoff_weeks",
                &row(&[("starts_on", json!("2026-03-02")), ("ends_on", json!("2026-03-08"))]),
            )
            .expect("week");
        let catalog = RecordCatalog::new(&store);
        let day = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date");
        assert_eq!(catalog.find_cutoff_week(day("2026-03-02")).expect("q"), Some(week));
        assert_eq!(catalog.find_cutoff_week(day("2026-03-08")).expect("q"), Some(week));
        assert_eq!(catalog.find_cutoff_week(day("2026-03-09")).expect("q"), None);
    }

    #[test]
    fn active_values_skip_inactive_rows() {
        let conn = rusqlite::Connection::open_in_memory().expect("db");
        crate::db::init_schema(&conn).expect("schema");
        let store = SqliteRecordStore::new(&conn);
        for (name, active) in [("Reading", 1), ("Study Plans", 1), ("Retired", 0)] {
            store
                .insert("work_lines", &row(&[("name", json!(name)), ("active", json!(active))]))
                .expect("insert");
        }
        let catalog = RecordCatalog::new(&store);
        let source = DynamicSource {
            table: "work_lines".into(),
            value_column: "name".into(),
            active_column: "active".into(),
        };
        assert_eq!(
            catalog.list_active_values(&source).expect("values"),
            vec!["Reading".to_string(), "Study Plans".to_string()]
        );
        assert_eq!(
            catalog.resolve_id("work_lines", "name", " Reading ").expect("id"),
            Some(1)
        );
    }
}
