use super::SessionPropertyStore;
use crate::error::GatewayError;
use rusqlite::{Connection, OptionalExtension};

/// Session properties kept in the workspace database, so staged work
/// survives a sidecar restart.
pub struct SqliteSessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SessionPropertyStore for SqliteSessionStore<'_> {
    fn get(&self, scope: &str, key: &str) -> Result<Option<String>, GatewayError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM session_properties WHERE scope = ? AND key = ?",
                (scope, key),
                |r| r.get(0),
            )
            .optional()?)
    }

    fn set(&self, scope: &str, key: &str, value: &str) -> Result<(), GatewayError> {
        self.conn.execute(
            "INSERT INTO session_properties(scope, key, value, updated_at) VALUES(?, ?, ?, ?)
             ON CONFLICT(scope, key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            (scope, key, value, chrono::Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }

    fn delete(&self, scope: &str, key: &str) -> Result<(), GatewayError> {
        self.conn.execute(
            "DELETE FROM session_properties WHERE scope = ? AND key = ?",
            (scope, key),
        )?;
        Ok(())
    }
}
