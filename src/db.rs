use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "efsrt.sqlite3";
pub const DOCUMENTS_DIR: &str = "documents";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn documents_dir(workspace: &Path) -> PathBuf {
    workspace.join(DOCUMENTS_DIR)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    std::fs::create_dir_all(documents_dir(workspace))?;
    let conn = Connection::open(db_path(workspace))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL,
            phone TEXT,
            address TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS modules(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            kind TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_assignments(
            module_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            assigned_on TEXT NOT NULL,
            PRIMARY KEY(module_id, teacher_id),
            FOREIGN KEY(module_id) REFERENCES modules(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_assignments_teacher ON teacher_assignments(teacher_id)",
        [],
    )?;

    // Final grade may only exist once every component grade does.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS practices(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            supervisor_id TEXT,
            state TEXT NOT NULL DEFAULT 'PENDING',
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            attendance_grade REAL,
            jury_grade REAL,
            report_grade REAL,
            final_grade REAL,
            attendance_closed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            evaluated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(module_id) REFERENCES modules(id),
            FOREIGN KEY(supervisor_id) REFERENCES users(id),
            CHECK(final_grade IS NULL OR (
                attendance_grade IS NOT NULL
                AND jury_grade IS NOT NULL
                AND report_grade IS NOT NULL
            ))
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_practices_student ON practices(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_practices_module ON practices(module_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_practices_supervisor ON practices(supervisor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            practice_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            status TEXT NOT NULL,
            punctuality TEXT NOT NULL,
            conceptual INTEGER,
            procedural INTEGER,
            attitudinal INTEGER,
            daily_score REAL NOT NULL,
            general_score REAL NOT NULL,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(practice_id) REFERENCES practices(id),
            UNIQUE(practice_id, session_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_practice ON attendance_records(practice_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS jury_assignments(
            practice_id TEXT NOT NULL,
            jury_id TEXT NOT NULL,
            assigned_on TEXT NOT NULL,
            PRIMARY KEY(practice_id, jury_id),
            FOREIGN KEY(practice_id) REFERENCES practices(id),
            FOREIGN KEY(jury_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jury_assignments_jury ON jury_assignments(jury_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS jury_evaluations(
            id TEXT PRIMARY KEY,
            practice_id TEXT NOT NULL,
            jury_id TEXT NOT NULL,
            presentation REAL NOT NULL,
            theory REAL NOT NULL,
            practical REAL NOT NULL,
            attitude REAL NOT NULL,
            grade REAL NOT NULL,
            remarks TEXT NOT NULL,
            evaluated_at TEXT NOT NULL,
            FOREIGN KEY(practice_id) REFERENCES practices(id),
            FOREIGN KEY(jury_id) REFERENCES users(id),
            UNIQUE(practice_id, jury_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_jury_evaluations_jury ON jury_evaluations(jury_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_submissions(
            id TEXT PRIMARY KEY,
            practice_id TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            document_name TEXT NOT NULL,
            document_path TEXT NOT NULL,
            document_sha256 TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            grade REAL,
            remarks TEXT,
            evaluated_at TEXT,
            FOREIGN KEY(practice_id) REFERENCES practices(id)
        )",
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
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
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
