//! Recording metadata persistence.
//!
//! Raw SQL over the `recordings` table. Rows are decoded one at a time so a
//! single corrupt entry is reported and skipped instead of failing the read.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schemas::{LoadReport, RecordingMetadata, RowOutcome, RowRef, UploadStatus};
use super::{int_at, text_at};
use crate::error::Result;

const COLUMNS: &str = "id, participant_code, prompt_id, prompt_text, timestamp_ms, local_uri, \
     original_filename, content_type, uploaded, upload_status, recording_duration_ms, \
     dialect, age_range, gender, session_id, version";

const DEFAULT_CONTENT_TYPE: &str = "audio/mp4";

/// Outcome of an insert-or-replace keyed by (participant, prompt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub version: i64,
    /// The row that previously held this (participant, prompt) pair.
    pub superseded: Option<RowRef>,
}

pub struct RecordingRepository;

impl RecordingRepository {
    /// All recordings in insertion order.
    pub fn list(conn: &Connection) -> Result<LoadReport<RecordingMetadata>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM recordings ORDER BY rowid ASC"
        ))?;
        let outcomes = stmt
            .query_map([], decode_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(LoadReport::from_outcomes(outcomes))
    }

    pub fn list_for_participant(
        conn: &Connection,
        participant_code: &str,
    ) -> Result<LoadReport<RecordingMetadata>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM recordings WHERE participant_code = ?1 ORDER BY rowid ASC"
        ))?;
        let outcomes = stmt
            .query_map(params![participant_code], decode_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(LoadReport::from_outcomes(outcomes))
    }

    /// A recording by id; corrupt rows read as absent.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<RecordingMetadata>> {
        let outcome = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM recordings WHERE id = ?1"),
                params![id],
                decode_row,
            )
            .optional()?;

        Ok(match outcome {
            Some(RowOutcome::Valid(recording)) => Some(recording),
            Some(RowOutcome::Invalid { reason, .. }) => {
                tracing::warn!("Recording {} is unreadable: {}", id, reason);
                None
            }
            None => None,
        })
    }

    /// Inserts the recording, or replaces the row holding the same
    /// (participant, prompt) pair in place so its queue position is kept.
    pub fn upsert(conn: &mut Connection, recording: &RecordingMetadata) -> Result<UpsertOutcome> {
        let tx = conn.transaction()?;

        let existing: Option<(i64, Option<String>, Option<String>)> = tx
            .query_row(
                "SELECT rowid, id, local_uri FROM recordings \
                 WHERE participant_code = ?1 AND prompt_id = ?2",
                params![recording.participant_code, recording.prompt_id],
                |row| Ok((row.get(0)?, text_at(row, 1)?, text_at(row, 2)?)),
            )
            .optional()?;

        let superseded = match existing {
            Some((rowid, old_id, old_uri)) => {
                tx.execute(
                    "UPDATE recordings SET id = ?1, prompt_text = ?2, timestamp_ms = ?3, \
                     local_uri = ?4, original_filename = ?5, content_type = ?6, uploaded = ?7, \
                     upload_status = ?8, recording_duration_ms = ?9, dialect = ?10, \
                     age_range = ?11, gender = ?12, session_id = ?13, version = version + 1 \
                     WHERE rowid = ?14",
                    params![
                        recording.id,
                        recording.prompt_text,
                        recording.timestamp,
                        recording.local_uri,
                        recording.original_filename,
                        recording.content_type,
                        recording.uploaded,
                        recording.upload_status.persisted_str(),
                        recording.recording_duration.map(|d| d as i64),
                        recording.dialect,
                        recording.age_range,
                        recording.gender,
                        recording.session_id,
                        rowid,
                    ],
                )?;
                Some(RowRef {
                    id: old_id.unwrap_or_default(),
                    local_uri: old_uri,
                })
            }
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO recordings ({COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 1)"
                    ),
                    params![
                        recording.id,
                        recording.participant_code,
                        recording.prompt_id,
                        recording.prompt_text,
                        recording.timestamp,
                        recording.local_uri,
                        recording.original_filename,
                        recording.content_type,
                        recording.uploaded,
                        recording.upload_status.persisted_str(),
                        recording.recording_duration.map(|d| d as i64),
                        recording.dialect,
                        recording.age_range,
                        recording.gender,
                        recording.session_id,
                    ],
                )?;
                None
            }
        };

        let version: i64 = tx.query_row(
            "SELECT version FROM recordings WHERE id = ?1",
            params![recording.id],
            |row| row.get(0),
        )?;

        tx.commit()?;

        Ok(UpsertOutcome {
            version,
            superseded,
        })
    }

    /// Removes one row; returns what was removed.
    pub fn delete(conn: &Connection, id: &str) -> Result<Option<RowRef>> {
        let local_uri: Option<Option<String>> = conn
            .query_row(
                "SELECT local_uri FROM recordings WHERE id = ?1",
                params![id],
                |row| text_at(row, 0),
            )
            .optional()?;

        let Some(local_uri) = local_uri else {
            return Ok(None);
        };

        conn.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;

        Ok(Some(RowRef {
            id: id.to_string(),
            local_uri,
        }))
    }

    pub fn delete_for_participant(
        conn: &mut Connection,
        participant_code: &str,
    ) -> Result<Vec<RowRef>> {
        let tx = conn.transaction()?;
        let removed = {
            let mut stmt = tx.prepare(
                "SELECT id, local_uri FROM recordings WHERE participant_code = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![participant_code], row_ref)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM recordings WHERE participant_code = ?1",
            params![participant_code],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn delete_all(conn: &mut Connection) -> Result<Vec<RowRef>> {
        let tx = conn.transaction()?;
        let removed = {
            let mut stmt = tx.prepare("SELECT id, local_uri FROM recordings ORDER BY rowid")?;
            let rows = stmt
                .query_map([], row_ref)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        tx.execute("DELETE FROM recordings", [])?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn set_uploaded(conn: &Connection, id: &str, uploaded: bool) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE recordings SET uploaded = ?1, version = version + 1 WHERE id = ?2",
            params![uploaded, id],
        )?;
        Ok(changed > 0)
    }

    pub fn set_upload_status(conn: &Connection, id: &str, status: UploadStatus) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE recordings SET upload_status = ?1, version = version + 1 WHERE id = ?2",
            params![status.persisted_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Marks a recording uploaded only if nobody rewrote it since `expected_version`.
    pub fn mark_uploaded_if_version(
        conn: &Connection,
        id: &str,
        expected_version: i64,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE recordings SET uploaded = 1, upload_status = 'pending', version = version + 1 \
             WHERE id = ?1 AND version = ?2",
            params![id, expected_version],
        )?;
        Ok(changed > 0)
    }
}

fn row_ref(row: &Row<'_>) -> rusqlite::Result<RowRef> {
    Ok(RowRef {
        id: text_at(row, 0)?.unwrap_or_default(),
        local_uri: text_at(row, 1)?,
    })
}

fn decode_row(row: &Row<'_>) -> rusqlite::Result<RowOutcome<RecordingMetadata>> {
    let id = text_at(row, 0)?;
    let key = id.clone().unwrap_or_else(|| "<missing id>".to_string());

    let invalid = |reason: String| RowOutcome::Invalid {
        key: key.clone(),
        reason,
    };

    let required = [
        ("id", id),
        ("participant_code", text_at(row, 1)?),
        ("prompt_id", text_at(row, 2)?),
        ("local_uri", text_at(row, 5)?),
    ];
    let mut values = Vec::with_capacity(required.len());
    for (name, value) in required {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => values.push(v),
            None => return Ok(invalid(format!("missing {name}"))),
        }
    }
    let [id, participant_code, prompt_id, local_uri]: [String; 4] = match values.try_into() {
        Ok(values) => values,
        Err(_) => return Ok(invalid("incomplete row".to_string())),
    };

    let status_raw = text_at(row, 9)?.unwrap_or_else(|| "pending".to_string());
    let Some(upload_status) = UploadStatus::from_stored(&status_raw) else {
        return Ok(invalid(format!("unknown upload status {status_raw:?}")));
    };

    Ok(RowOutcome::Valid(RecordingMetadata {
        id,
        participant_code,
        prompt_id,
        prompt_text: text_at(row, 3)?.unwrap_or_default(),
        timestamp: int_at(row, 4)?.unwrap_or(0),
        local_uri,
        original_filename: text_at(row, 6)?.unwrap_or_default(),
        content_type: text_at(row, 7)?.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        uploaded: int_at(row, 8)?.unwrap_or(0) != 0,
        upload_status,
        recording_duration: int_at(row, 10)?.and_then(|d| u64::try_from(d).ok()),
        dialect: text_at(row, 11)?,
        age_range: text_at(row, 12)?,
        gender: text_at(row, 13)?,
        session_id: text_at(row, 14)?,
        version: int_at(row, 15)?.unwrap_or(1),
    }))
}
