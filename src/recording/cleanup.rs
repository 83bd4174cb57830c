use std::sync::Arc;
use tracing::{info, warn};

use crate::db::RowRef;
use crate::error::Result;
use crate::store::MetadataStore;

/// Outcome of a best-effort delete. Counts blob removals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantDeletion {
    pub recordings: DeleteSummary,
    pub profile_removed: bool,
}

/// Deletes recordings metadata-first, then their blobs.
///
/// A crash in between leaves an orphaned file rather than a row pointing at
/// nothing. Blob failures are counted, not raised.
#[derive(Clone)]
pub struct RecordingCleanup {
    store: Arc<MetadataStore>,
}

impl RecordingCleanup {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn delete_one(&self, id: &str) -> Result<DeleteSummary> {
        let removed = self.store.take_recording(id).await?;
        if removed.is_none() {
            warn!("Recording {} not found for deletion", id);
        }
        Ok(self.remove_blobs(removed.into_iter().collect()).await)
    }

    /// Removes the participant's recordings, their blobs and then the profile.
    pub async fn delete_all_for_participant(&self, code: &str) -> Result<ParticipantDeletion> {
        let removed = self.store.take_recordings_for(code).await?;
        info!(
            "Deleting {} recordings for participant {}",
            removed.len(),
            code
        );
        let recordings = self.remove_blobs(removed).await;
        let profile_removed = self.store.delete_participant(code).await?;
        Ok(ParticipantDeletion {
            recordings,
            profile_removed,
        })
    }

    /// Removes every recording on the device. Participant profiles are kept.
    pub async fn delete_all_device(&self) -> Result<DeleteSummary> {
        let removed = self.store.take_all_recordings().await?;
        info!("Deleting all {} device recordings", removed.len());
        Ok(self.remove_blobs(removed).await)
    }

    async fn remove_blobs(&self, rows: Vec<RowRef>) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        for row in rows {
            let uri = row.local_uri.unwrap_or_default();
            match self.store.blobs().remove(&uri).await {
                Ok(()) => summary.deleted_count += 1,
                Err(e) => {
                    warn!("Failed to delete blob for {}: {}", row.id, e);
                    summary.failed_count += 1;
                }
            }
        }
        summary
    }
}
