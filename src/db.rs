use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("visitd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS drive_entries(
            id TEXT PRIMARY KEY,
            parent_id TEXT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            rel_path TEXT NOT NULL,
            mime_type TEXT,
            sha256 TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_drive_entries_parent ON drive_entries(parent_id, name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_properties(
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(scope, key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            folder_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS professionals(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            root_folder_id TEXT,
            reports_folder_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accompaniments(
            id INTEGER PRIMARY KEY,
            professional_id INTEGER NOT NULL,
            institution_id INTEGER NOT NULL,
            FOREIGN KEY(professional_id) REFERENCES professionals(id),
            FOREIGN KEY(institution_id) REFERENCES institutions(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS professional_reports(
            id INTEGER PRIMARY KEY,
            professional_id INTEGER NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(professional_id) REFERENCES professionals(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cutoff_weeks(
            id INTEGER PRIMARY KEY,
            starts_on TEXT NOT NULL,
            ends_on TEXT NOT NULL
        )",
        [],
    )?;

    for table in [
        "work_lines",
        "work_line_areas",
        "institutional_roles",
        "teaching_areas",
    ] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}(
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    active INTEGER NOT NULL DEFAULT 1
                )"
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visit_files(
            id INTEGER PRIMARY KEY,
            accompaniment_id INTEGER NOT NULL,
            sequence_number INTEGER NOT NULL,
            document_id TEXT NOT NULL UNIQUE,
            folder_id TEXT NOT NULL,
            evidence_folder_id TEXT NOT NULL,
            visit_id INTEGER,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(accompaniment_id) REFERENCES accompaniments(id),
            FOREIGN KEY(visit_id) REFERENCES visits(id),
            UNIQUE(accompaniment_id, sequence_number)
        )",
        [],
    )?;

    // The unique key is the store-level guard against two starts racing for
    // the same sequence number.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS visits(
            id INTEGER PRIMARY KEY,
            accompaniment_id INTEGER NOT NULL,
            cutoff_week_id INTEGER NOT NULL,
            sequence_number INTEGER NOT NULL,
            visit_date TEXT NOT NULL,
            status TEXT NOT NULL,
            visit_type TEXT NOT NULL DEFAULT '',
            objective TEXT NOT NULL DEFAULT '',
            duration_hours REAL NOT NULL DEFAULT 0,
            participant_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(accompaniment_id) REFERENCES accompaniments(id),
            FOREIGN KEY(cutoff_week_id) REFERENCES cutoff_weeks(id),
            UNIQUE(accompaniment_id, sequence_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visits_accompaniment ON visits(accompaniment_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visit_work_lines(
            id INTEGER PRIMARY KEY,
            visit_id INTEGER NOT NULL,
            work_line_id INTEGER NOT NULL,
            FOREIGN KEY(visit_id) REFERENCES visits(id),
            FOREIGN KEY(work_line_id) REFERENCES work_lines(id),
            UNIQUE(visit_id, work_line_id)
        )",
        [],
    )?;

    for table in ["achievements", "difficulties", "agreements"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}(
                    id INTEGER PRIMARY KEY,
                    visit_work_line_id INTEGER NOT NULL,
                    description TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    FOREIGN KEY(visit_work_line_id) REFERENCES visit_work_lines(id)
                )"
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_visit_work_line ON {table}(visit_work_line_id)"
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evidence(
            id INTEGER PRIMARY KEY,
            visit_id INTEGER NOT NULL,
            evidence_type TEXT NOT NULL,
            original_name TEXT NOT NULL,
            storage_id TEXT NOT NULL,
            url TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            state TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(visit_id) REFERENCES visits(id)
        )",
        [],
    )?;
    ensure_evidence_sha256(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evidence_visit ON evidence(visit_id, evidence_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id INTEGER PRIMARY KEY,
            id_type INTEGER NOT NULL,
            id_number TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            main_area_id INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            UNIQUE(id_type, id_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_titles(
            id INTEGER PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            title_type TEXT NOT NULL,
            title TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_aux_areas(
            id INTEGER PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            area_id INTEGER NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_grades(
            id INTEGER PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            institution_id INTEGER NOT NULL,
            grade_id INTEGER NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(institution_id) REFERENCES institutions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS institution_teachers(
            id INTEGER PRIMARY KEY,
            teacher_id INTEGER NOT NULL,
            institution_id INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(institution_id) REFERENCES institutions(id),
            UNIQUE(teacher_id, institution_id)
        )",
        [],
    )?;

    Ok(())
}

// Older workspaces stored evidence without a content digest.
fn ensure_evidence_sha256(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "evidence", "sha256")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE evidence ADD COLUMN sha256 TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
