use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "results.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("open {}", db_path.display()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Raw marks only. Percentage, grade and pass status are derived on read.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            class_name TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            theory REAL,
            practical REAL,
            theory_max REAL NOT NULL,
            practical_max REAL NOT NULL DEFAULT 0,
            credit_hour REAL NOT NULL DEFAULT 1,
            updated_at TEXT,
            UNIQUE(class_name, exam_type, academic_year, student_id, subject)
        )",
        [],
    )?;
    ensure_marks_credit_hour(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_exam ON marks(class_name, exam_type, academic_year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    Ok(conn)
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

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_marks_credit_hour(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces stored marks before credit hours were tracked.
    if table_has_column(conn, "marks", "credit_hour")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE marks ADD COLUMN credit_hour REAL NOT NULL DEFAULT 1",
        [],
    )?;
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
