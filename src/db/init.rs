use crate::error::{Result, SyncError};
use rusqlite::Connection;
use std::path::Path;

/// Ordered schema steps; `PRAGMA user_version` records how many have run.
const MIGRATIONS: &[&str] = &[
    // 1: recordings, participants, single-value app state
    "CREATE TABLE IF NOT EXISTS recordings (
        id TEXT PRIMARY KEY,
        participant_code TEXT,
        prompt_id TEXT,
        prompt_text TEXT,
        timestamp_ms INTEGER NOT NULL DEFAULT 0,
        local_uri TEXT,
        original_filename TEXT,
        content_type TEXT,
        uploaded INTEGER NOT NULL DEFAULT 0,
        upload_status TEXT NOT NULL DEFAULT 'pending',
        recording_duration_ms INTEGER,
        dialect TEXT,
        age_range TEXT,
        gender TEXT,
        session_id TEXT,
        version INTEGER NOT NULL DEFAULT 1
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_participant_prompt
        ON recordings(participant_code, prompt_id);
    CREATE TABLE IF NOT EXISTS participants (
        code TEXT PRIMARY KEY,
        dialect TEXT,
        age_range TEXT,
        gender TEXT,
        total_recordings INTEGER,
        total_required INTEGER,
        is_complete INTEGER,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS app_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );",
];

pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

pub fn open_db(db_path: &Path) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SyncError::io_at("create database directory", parent, e))?;
    }

    let conn = Connection::open(db_path)?;

    migrate(&conn)?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(SyncError::Schema(format!(
            "database is at version {current}, this build supports up to {SCHEMA_VERSION}"
        )));
    }

    for (index, step) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        conn.execute_batch(step)?;
        conn.pragma_update(None, "user_version", (index + 1) as i64)?;
        tracing::debug!("Applied schema migration {}", index + 1);
    }

    Ok(())
}
