use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILENAME: &str = "concours.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Session-only store; everything is gone when the process exits.
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS candidates(
            id TEXT PRIMARY KEY,
            matricule TEXT NOT NULL UNIQUE,
            anonymous_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS correctors(
            id TEXT PRIMARY KEY,
            lastname TEXT NOT NULL,
            firstname TEXT NOT NULL,
            institution TEXT NOT NULL,
            email TEXT NOT NULL,
            subject TEXT,
            access_code TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            candidate_id TEXT NOT NULL,
            anonymous_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            kind TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            subject TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            claimed_by TEXT,
            upload_date TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(candidate_id) REFERENCES candidates(id),
            FOREIGN KEY(claimed_by) REFERENCES correctors(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_candidate ON submissions(candidate_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS corrections(
            submission_id TEXT PRIMARY KEY,
            corrector_id TEXT NOT NULL,
            score REAL NOT NULL,
            comments TEXT NOT NULL,
            criteria_json TEXT,
            finalized INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(submission_id) REFERENCES submissions(id),
            FOREIGN KEY(corrector_id) REFERENCES correctors(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_results(
            id TEXT PRIMARY KEY,
            copy_id TEXT NOT NULL UNIQUE,
            matricule TEXT NOT NULL,
            centre TEXT NOT NULL,
            professor_firstname TEXT NOT NULL,
            professor_lastname TEXT NOT NULL,
            institution TEXT NOT NULL,
            student_lastname TEXT,
            student_firstname TEXT,
            scores_json TEXT NOT NULL,
            average REAL NOT NULL,
            mention TEXT NOT NULL,
            status TEXT NOT NULL,
            passed INTEGER NOT NULL,
            policy TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_results_matricule ON exam_results(matricule)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS generated_codes(
            code TEXT PRIMARY KEY,
            code_type TEXT NOT NULL,
            type_label TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    Ok(())
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
        None => Ok(None),
        Some(text) => Ok(Some(
            serde_json::from_str(&text)
                .with_context(|| format!("setting {} is not valid JSON", key))?,
        )),
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

/// True when an insert failed only because of a UNIQUE constraint.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = open_in_memory().expect("db");
        assert!(settings_get_json(&conn, "setup.grading").expect("get").is_none());
        settings_set_json(&conn, "setup.grading", &json!({ "passPolicy": "pass10" })).expect("set");
        settings_set_json(&conn, "setup.grading", &json!({ "passPolicy": "admission12" })).expect("set");
        let v = settings_get_json(&conn, "setup.grading").expect("get").expect("value");
        assert_eq!(v["passPolicy"], "admission12");
    }

    #[test]
    fn unique_violation_is_detected() {
        let conn = open_in_memory().expect("db");
        let insert = |code: &str| {
            conn.execute(
                "INSERT INTO generated_codes(code, code_type, type_label, generated_at)
                 VALUES(?, 'exam', 'Code Examen', '2026-01-01T00:00:00Z')",
                [code],
            )
        };
        insert("EXAM-1").expect("first insert");
        let e = insert("EXAM-1").expect_err("duplicate");
        assert!(is_unique_violation(&e));
    }

    #[test]
    fn workspace_db_is_created_on_disk() {
        let dir = std::env::temp_dir().join(format!(
            "concoursd-db-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let conn = open_db(&dir).expect("open");
        drop(conn);
        assert!(dir.join(DB_FILENAME).is_file());
        let _ = std::fs::remove_dir_all(dir);
    }
}
