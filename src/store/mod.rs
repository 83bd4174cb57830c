//! Durable metadata store.
//!
//! Async front over the SQLite repositories that keeps blob deletion in step
//! with metadata changes. Each call commits on its own; there is no atomicity
//! across the recordings and participants tables, and none between metadata
//! and blobs.

use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::blobs::BlobStore;
use crate::db::{
    self, LoadReport, ParticipantRepository, RecordingMetadata, RecordingRepository, RowRef,
    UploadStatus,
};
use crate::error::{Result, SyncError};
use crate::participant::{ensure_valid_code, ParticipantDetails, ParticipantProgress};

pub struct MetadataStore {
    conn: Mutex<Connection>,
    blobs: BlobStore,
}

impl MetadataStore {
    pub fn open(db_path: &Path, blobs: BlobStore) -> Result<Self> {
        Ok(Self::with_connection(db::open_db(db_path)?, blobs))
    }

    pub fn open_in_memory(blobs: BlobStore) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::migrate(&conn)?;
        Ok(Self::with_connection(conn, blobs))
    }

    fn with_connection(conn: Connection, blobs: BlobStore) -> Self {
        Self {
            conn: Mutex::new(conn),
            blobs,
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    // --- Recordings ---

    pub async fn list_recordings(&self) -> Result<LoadReport<RecordingMetadata>> {
        let conn = self.conn.lock().await;
        let report = RecordingRepository::list(&conn)?;
        log_dropped("recording", &report);
        Ok(report)
    }

    pub async fn recordings_for(&self, participant_code: &str) -> Result<Vec<RecordingMetadata>> {
        let conn = self.conn.lock().await;
        let report = RecordingRepository::list_for_participant(&conn, participant_code.trim())?;
        log_dropped("recording", &report);
        Ok(report.into_items())
    }

    pub async fn get_recording(&self, id: &str) -> Result<Option<RecordingMetadata>> {
        let conn = self.conn.lock().await;
        RecordingRepository::get(&conn, id)
    }

    /// Saves a recording, replacing any other recording for the same
    /// (participant, prompt). The replaced blob is deleted best-effort after
    /// the metadata write commits. Returns the stored version.
    pub async fn upsert_recording(&self, recording: &RecordingMetadata) -> Result<i64> {
        let recording = &normalized(recording);
        validate_recording(recording)?;

        let outcome = {
            let mut conn = self.conn.lock().await;
            RecordingRepository::upsert(&mut conn, recording)?
        };

        if let Some(old) = outcome.superseded {
            info!(
                "Overwrote recording for prompt {} by {} (old id {})",
                recording.prompt_id, recording.participant_code, old.id
            );
            if let Some(old_uri) = old.local_uri.filter(|uri| uri != &recording.local_uri) {
                if let Err(e) = self.blobs.remove(&old_uri).await {
                    warn!("Superseded blob {} was not deleted: {}", old_uri, e);
                }
            }
        }

        Ok(outcome.version)
    }

    /// Deletes metadata and then the blob. Unknown ids return false.
    pub async fn delete_recording(&self, id: &str) -> Result<bool> {
        let removed = {
            let conn = self.conn.lock().await;
            RecordingRepository::delete(&conn, id)
        };

        match removed {
            Ok(Some(row)) => {
                info!("Removed metadata for recording {}", id);
                self.remove_blob(&row).await;
                Ok(true)
            }
            Ok(None) => {
                warn!("Recording {} not found for deletion", id);
                Ok(false)
            }
            Err(e) => {
                // The metadata write failed; still try to free the blob.
                if let Ok(Some(recording)) = self.get_recording(id).await {
                    if let Err(blob_err) = self.blobs.remove(&recording.local_uri).await {
                        warn!("Blob cleanup after failed delete also failed: {}", blob_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Removes metadata rows only; callers own the blob cleanup.
    pub async fn take_recording(&self, id: &str) -> Result<Option<RowRef>> {
        let conn = self.conn.lock().await;
        RecordingRepository::delete(&conn, id)
    }

    pub async fn take_recordings_for(&self, participant_code: &str) -> Result<Vec<RowRef>> {
        let mut conn = self.conn.lock().await;
        RecordingRepository::delete_for_participant(&mut conn, participant_code)
    }

    pub async fn take_all_recordings(&self) -> Result<Vec<RowRef>> {
        let mut conn = self.conn.lock().await;
        RecordingRepository::delete_all(&mut conn)
    }

    /// Returns false if the id is unknown.
    pub async fn set_uploaded_status(&self, id: &str, uploaded: bool) -> Result<bool> {
        let conn = self.conn.lock().await;
        let updated = RecordingRepository::set_uploaded(&conn, id, uploaded)?;
        if !updated {
            warn!("Recording {} not found for status update", id);
        }
        Ok(updated)
    }

    pub async fn set_upload_status(&self, id: &str, status: UploadStatus) -> Result<bool> {
        let conn = self.conn.lock().await;
        RecordingRepository::set_upload_status(&conn, id, status)
    }

    /// Marks an upload as accepted unless the row changed after `expected_version`.
    pub async fn mark_uploaded(&self, id: &str, expected_version: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        RecordingRepository::mark_uploaded_if_version(&conn, id, expected_version)
    }

    // --- Participants ---

    pub async fn list_participants(&self) -> Result<LoadReport<ParticipantDetails>> {
        let conn = self.conn.lock().await;
        let report = ParticipantRepository::list(&conn)?;
        log_dropped("participant", &report);
        Ok(report)
    }

    pub async fn get_participant(&self, code: &str) -> Result<Option<ParticipantDetails>> {
        let conn = self.conn.lock().await;
        ParticipantRepository::get(&conn, code)
    }

    /// Saves a profile; with `make_current` it also becomes the active participant.
    pub async fn upsert_participant(
        &self,
        details: &ParticipantDetails,
        make_current: bool,
    ) -> Result<()> {
        details.validate()?;
        let conn = self.conn.lock().await;
        ParticipantRepository::upsert(&conn, details)?;
        if make_current {
            ParticipantRepository::set_current(&conn, &details.code)?;
        }
        info!("Saved participant {}", details.code);
        Ok(())
    }

    pub async fn update_progress(&self, code: &str, progress: &ParticipantProgress) -> Result<bool> {
        let conn = self.conn.lock().await;
        ParticipantRepository::update_progress(&conn, code, progress)
    }

    /// Removes the profile row only; recordings are handled by the lifecycle manager.
    pub async fn delete_participant(&self, code: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let removed = ParticipantRepository::delete(&mut conn, code)?;
        if !removed {
            warn!("Participant {} not found for deletion", code);
        }
        Ok(removed)
    }

    pub async fn current_participant(&self) -> Result<Option<ParticipantDetails>> {
        let conn = self.conn.lock().await;
        match ParticipantRepository::current_code(&conn)? {
            Some(code) => ParticipantRepository::get(&conn, &code),
            None => Ok(None),
        }
    }

    /// Switches the active participant; false if no such profile exists.
    pub async fn set_current_participant(&self, code: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        if ParticipantRepository::get(&conn, code)?.is_none() {
            return Ok(false);
        }
        ParticipantRepository::set_current(&conn, code)?;
        Ok(true)
    }

    pub async fn clear_current_participant(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        ParticipantRepository::clear_current(&conn)
    }

    async fn remove_blob(&self, row: &RowRef) {
        if let Some(uri) = row.local_uri.as_deref() {
            if let Err(e) = self.blobs.remove(uri).await {
                warn!("Blob for recording {} was not deleted: {}", row.id, e);
            }
        }
    }
}

/// Key columns are stored trimmed so the unique index and per-participant
/// queries see one spelling of each code and prompt.
fn normalized(recording: &RecordingMetadata) -> RecordingMetadata {
    let mut recording = recording.clone();
    recording.participant_code = recording.participant_code.trim().to_string();
    recording.prompt_id = recording.prompt_id.trim().to_string();
    recording
}

fn validate_recording(recording: &RecordingMetadata) -> Result<()> {
    let required = [
        ("id", &recording.id),
        ("prompt_id", &recording.prompt_id),
        ("prompt_text", &recording.prompt_text),
        ("local_uri", &recording.local_uri),
        ("original_filename", &recording.original_filename),
    ];
    if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(SyncError::validation(format!(
            "recording metadata is missing {name}"
        )));
    }
    ensure_valid_code(&recording.participant_code)
}

fn log_dropped<T>(kind: &str, report: &LoadReport<T>) {
    for dropped in &report.dropped {
        warn!(
            "Skipping unreadable {} entry {}: {}",
            kind, dropped.key, dropped.reason
        );
    }
}
