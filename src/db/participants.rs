//! Participant profile persistence and the current-participant slot.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schemas::{LoadReport, RowOutcome};
use super::{int_at, text_at};
use crate::error::Result;
use crate::participant::{is_valid_code, ParticipantDetails, ParticipantProgress};

const COLUMNS: &str = "code, dialect, age_range, gender, total_recordings, total_required, is_complete";
const CURRENT_PARTICIPANT_KEY: &str = "current_participant";

pub struct ParticipantRepository;

impl ParticipantRepository {
    pub fn list(conn: &Connection) -> Result<LoadReport<ParticipantDetails>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM participants ORDER BY rowid ASC"
        ))?;
        let outcomes = stmt
            .query_map([], decode_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(LoadReport::from_outcomes(outcomes))
    }

    pub fn get(conn: &Connection, code: &str) -> Result<Option<ParticipantDetails>> {
        let outcome = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM participants WHERE code = ?1"),
                params![code],
                decode_row,
            )
            .optional()?;

        Ok(match outcome {
            Some(RowOutcome::Valid(details)) => Some(details),
            _ => None,
        })
    }

    /// Inserts or updates a profile. A profile without progress keeps the cached one.
    pub fn upsert(conn: &Connection, details: &ParticipantDetails) -> Result<()> {
        let progress = details.progress;
        conn.execute(
            "INSERT INTO participants (code, dialect, age_range, gender, total_recordings, \
             total_required, is_complete) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(code) DO UPDATE SET \
                dialect = excluded.dialect, \
                age_range = excluded.age_range, \
                gender = excluded.gender, \
                total_recordings = COALESCE(excluded.total_recordings, participants.total_recordings), \
                total_required = COALESCE(excluded.total_required, participants.total_required), \
                is_complete = COALESCE(excluded.is_complete, participants.is_complete), \
                updated_at = CURRENT_TIMESTAMP",
            params![
                details.code,
                details.dialect,
                details.age_range,
                details.gender,
                progress.map(|p| p.total_recordings),
                progress.map(|p| p.total_required),
                progress.map(|p| p.is_complete),
            ],
        )?;
        Ok(())
    }

    pub fn update_progress(
        conn: &Connection,
        code: &str,
        progress: &ParticipantProgress,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE participants SET total_recordings = ?1, total_required = ?2, \
             is_complete = ?3, updated_at = CURRENT_TIMESTAMP WHERE code = ?4",
            params![
                progress.total_recordings,
                progress.total_required,
                progress.is_complete,
                code
            ],
        )?;
        Ok(changed > 0)
    }

    /// Removes the profile; clears the current slot if it pointed at it.
    pub fn delete(conn: &mut Connection, code: &str) -> Result<bool> {
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM participants WHERE code = ?1", params![code])?;
        if removed > 0 {
            tx.execute(
                "DELETE FROM app_state WHERE key = ?1 AND value = ?2",
                params![CURRENT_PARTICIPANT_KEY, code],
            )?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn current_code(conn: &Connection) -> Result<Option<String>> {
        let code = conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![CURRENT_PARTICIPANT_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(code)
    }

    pub fn set_current(conn: &Connection, code: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CURRENT_PARTICIPANT_KEY, code],
        )?;
        Ok(())
    }

    pub fn clear_current(conn: &Connection) -> Result<()> {
        conn.execute(
            "DELETE FROM app_state WHERE key = ?1",
            params![CURRENT_PARTICIPANT_KEY],
        )?;
        Ok(())
    }
}

fn decode_row(row: &Row<'_>) -> rusqlite::Result<RowOutcome<ParticipantDetails>> {
    let code = text_at(row, 0)?.unwrap_or_default();
    if !is_valid_code(&code) {
        return Ok(RowOutcome::Invalid {
            reason: format!("invalid participant code {code:?}"),
            key: code,
        });
    }

    let progress = match (int_at(row, 4)?, int_at(row, 5)?) {
        (Some(total), Some(required)) => Some(ParticipantProgress {
            total_recordings: u32::try_from(total).unwrap_or(0),
            total_required: u32::try_from(required).unwrap_or(0),
            is_complete: int_at(row, 6)?.unwrap_or(0) != 0,
        }),
        _ => None,
    };

    Ok(RowOutcome::Valid(ParticipantDetails {
        code: code.trim().to_string(),
        dialect: text_at(row, 1)?,
        age_range: text_at(row, 2)?,
        gender: text_at(row, 3)?,
        progress,
    }))
}
