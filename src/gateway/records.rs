use super::{bare_column, check_identifier, RecordStore, Row, Select};
use crate::error::GatewayError;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::Value;

/// Record store over the workspace database.
pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

fn map_sqlite(e: rusqlite::Error) -> GatewayError {
    if let rusqlite::Error::SqliteFailure(failure, msg) = &e {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return GatewayError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()));
        }
    }
    GatewayError::Sqlite(e)
}

/// `WHERE a = ? AND b IS NULL` plus the bound values, in order.
fn where_clause<'r>(
    filters: impl Iterator<Item = (&'r String, &'r Value)>,
    params: &mut Vec<SqlValue>,
) -> Result<String, GatewayError> {
    let mut parts = Vec::new();
    for (col, val) in filters {
        let col = check_identifier(col)?;
        if val.is_null() {
            parts.push(format!("{col} IS NULL"));
        } else {
            parts.push(format!("{col} = ?"));
            params.push(to_sql(val));
        }
    }
    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn select(&self, query: &Select) -> Result<Vec<Row>, GatewayError> {
        let table = check_identifier(&query.table)?;
        let mut columns = Vec::with_capacity(query.columns.len());
        for col in &query.columns {
            let col = check_identifier(col)?;
            columns.push(format!("{col} AS {}", bare_column(col)));
        }
        let projection = if columns.is_empty() {
            format!("{table}.*")
        } else {
            columns.join(", ")
        };

        let mut sql = format!("SELECT {projection} FROM {table}");
        for join in &query.joins {
            let jt = check_identifier(&join.table)?;
            let on = check_identifier(&join.on)?;
            let equals = check_identifier(&join.equals)?;
            let on = if on.contains('.') {
                on.to_string()
            } else {
                format!("{jt}.{on}")
            };
            sql.push_str(&format!(" JOIN {jt} ON {on} = {equals}"));
        }

        let mut params = Vec::new();
        sql.push_str(&where_clause(
            query.filters.iter().map(|(k, v)| (k, v)),
            &mut params,
        )?);

        if !query.order_by.is_empty() {
            let mut order = Vec::new();
            for (col, asc) in &query.order_by {
                let col = check_identifier(col)?;
                order.push(format!("{col} {}", if *asc { "ASC" } else { "DESC" }));
            }
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(n) = query.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        tracing::debug!(%sql, "record select");

        let mut stmt = self.conn.prepare(&sql).map_err(map_sqlite)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |r| {
                let mut out = Row::new();
                for (i, name) in names.iter().enumerate() {
                    out.insert(name.clone(), from_sql(r.get_ref(i)?));
                }
                Ok(out)
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(map_sqlite)?;
        Ok(rows)
    }

    fn insert(&self, table: &str, row: &Row) -> Result<i64, GatewayError> {
        let table = check_identifier(table)?;
        let mut cols = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());
        for (k, v) in row {
            cols.push(check_identifier(k)?);
            params.push(to_sql(v));
        }
        let placeholders = vec!["?"; cols.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table}({}) VALUES({placeholders})",
            cols.join(", ")
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(map_sqlite)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&self, table: &str, patch: &Row, filter: &Row) -> Result<usize, GatewayError> {
        let table = check_identifier(table)?;
        if patch.is_empty() {
            return Ok(0);
        }
        let mut params = Vec::new();
        let mut sets = Vec::with_capacity(patch.len());
        for (k, v) in patch {
            sets.push(format!("{} = ?", check_identifier(k)?));
            params.push(to_sql(v));
        }
        let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
        sql.push_str(&where_clause(filter.iter(), &mut params)?);
        self.conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(map_sqlite)
    }

    fn delete(&self, table: &str, filter: &Row) -> Result<usize, GatewayError> {
        let table = check_identifier(table)?;
        if filter.is_empty() {
            return Err(GatewayError::BadIdentifier(format!(
                "refusing unfiltered delete on {table}"
            )));
        }
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        sql.push_str(&where_clause(filter.iter(), &mut params)?);
        self.conn
            .execute(&sql, rusqlite::params_from_iter(params.iter()))
            .map_err(map_sqlite)
    }

    fn atomically(
        &self,
        work: &mut dyn FnMut(&dyn RecordStore) -> Result<(), GatewayError>,
    ) -> Result<(), GatewayError> {
        // Already inside a transaction: the outer one decides.
        if !self.conn.is_autocommit() {
            return work(self);
        }
        let tx = self.conn.unchecked_transaction()?;
        // Dropping `tx` on the error path rolls it back.
        work(&SqliteRecordStore::new(&tx))?;
        tx.commit()?;
        Ok(())
    }
}
