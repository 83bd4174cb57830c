//! Sequential upload of a participant's pending recordings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::{RecordingMetadata, UploadStatus};
use crate::error::{Result, SyncError};
use crate::remote::{Connectivity, RemoteService, UploadReceipt};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub success_count: usize,
    pub fail_count: usize,
}

impl UploadSummary {
    pub fn attempted(&self) -> usize {
        self.success_count + self.fail_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    NothingToUpload,
    Completed(UploadSummary),
    /// Stopped between items; the summary covers what ran.
    Cancelled(UploadSummary),
}

impl UploadOutcome {
    pub fn summary(&self) -> UploadSummary {
        match self {
            UploadOutcome::NothingToUpload => UploadSummary::default(),
            UploadOutcome::Completed(summary) | UploadOutcome::Cancelled(summary) => *summary,
        }
    }
}

/// In-memory view of the running batch. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct UploadBoard {
    pub in_progress: bool,
    pub current: usize,
    pub total: usize,
    pub items: HashMap<String, UploadStatus>,
    pub last_summary: Option<UploadSummary>,
}

#[derive(Clone, Default)]
pub struct UploadStatusHandle {
    inner: Arc<Mutex<UploadBoard>>,
}

impl UploadStatusHandle {
    pub async fn get(&self) -> UploadBoard {
        self.inner.lock().await.clone()
    }

    /// Transient status for a recording, if the current batch touched it.
    pub async fn status_of(&self, id: &str) -> Option<UploadStatus> {
        self.inner.lock().await.items.get(id).copied()
    }

    async fn begin(&self, total: usize) {
        let mut board = self.inner.lock().await;
        board.in_progress = true;
        board.current = 0;
        board.total = total;
        board.items.clear();
    }

    async fn mark(&self, position: usize, id: &str, status: UploadStatus) {
        let mut board = self.inner.lock().await;
        board.current = position;
        board.items.insert(id.to_string(), status);
    }

    async fn clear_item(&self, id: &str) {
        self.inner.lock().await.items.remove(id);
    }

    async fn finish(&self, summary: UploadSummary) {
        let mut board = self.inner.lock().await;
        board.in_progress = false;
        board.last_summary = Some(summary);
    }
}

pub struct UploadQueue {
    store: Arc<MetadataStore>,
    remote: Arc<dyn RemoteService>,
    connectivity: Arc<dyn Connectivity>,
    request_timeout: Duration,
    status: UploadStatusHandle,
}

impl UploadQueue {
    pub fn new(
        store: Arc<MetadataStore>,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn Connectivity>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            request_timeout,
            status: UploadStatusHandle::default(),
        }
    }

    pub fn status(&self) -> UploadStatusHandle {
        self.status.clone()
    }

    /// Recordings the next batch would send, in queue order.
    pub async fn candidates(&self, participant_code: &str) -> Result<Vec<RecordingMetadata>> {
        Ok(self
            .store
            .recordings_for(participant_code)
            .await?
            .into_iter()
            .filter(RecordingMetadata::is_upload_candidate)
            .collect())
    }

    /// Uploads every pending recording of one participant, one at a time.
    ///
    /// Fails with `Offline` before any upload when there is no connection.
    /// Per-item failures are recorded and counted; they never end the batch.
    pub async fn upload_pending(
        &self,
        participant_code: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let candidates = self.candidates(participant_code).await?;
        if candidates.is_empty() {
            info!("No pending uploads for {}", participant_code);
            return Ok(UploadOutcome::NothingToUpload);
        }

        if !self.connectivity.is_online().await {
            warn!(
                "Upload of {} recordings skipped: offline",
                candidates.len()
            );
            return Err(SyncError::Offline);
        }

        let total = candidates.len();
        info!("Uploading {} recordings for {}", total, participant_code);
        self.status.begin(total).await;

        let mut summary = UploadSummary::default();
        for (index, recording) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Upload batch cancelled after {} of {} items",
                    summary.attempted(),
                    total
                );
                self.status.finish(summary).await;
                return Ok(UploadOutcome::Cancelled(summary));
            }

            self.status
                .mark(index + 1, &recording.id, UploadStatus::Uploading)
                .await;

            match self.upload_one(recording).await {
                Ok(receipt) => {
                    summary.success_count += 1;
                    self.record_success(recording, receipt).await;
                }
                Err(e) => {
                    summary.fail_count += 1;
                    warn!(
                        "Upload failed for {} ({}/{}): {}",
                        recording.id,
                        index + 1,
                        total,
                        e
                    );
                    self.record_failure(index + 1, recording).await;
                }
            }
        }

        info!(
            "Upload batch finished: {} succeeded, {} failed",
            summary.success_count, summary.fail_count
        );
        self.status.finish(summary).await;
        Ok(UploadOutcome::Completed(summary))
    }

    /// Puts failed recordings back in the queue. Returns how many were reset.
    pub async fn retry_failed(&self, participant_code: &str) -> Result<usize> {
        let mut reset = 0;
        for recording in self.store.recordings_for(participant_code).await? {
            if !recording.uploaded && recording.upload_status == UploadStatus::Failed {
                if self
                    .store
                    .set_upload_status(&recording.id, UploadStatus::Pending)
                    .await?
                {
                    reset += 1;
                }
            }
        }
        info!("Re-queued {} failed uploads for {}", reset, participant_code);
        Ok(reset)
    }

    async fn upload_one(&self, recording: &RecordingMetadata) -> Result<UploadReceipt> {
        if !self.store.blobs().exists(&recording.local_uri).await {
            return Err(SyncError::Upload(format!(
                "audio file missing at {}",
                recording.local_uri
            )));
        }

        match tokio::time::timeout(self.request_timeout, self.remote.upload_recording(recording))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.request_timeout)),
        }
    }

    async fn record_success(&self, recording: &RecordingMetadata, receipt: UploadReceipt) {
        match self.store.mark_uploaded(&recording.id, recording.version).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Recording {} changed during upload; leaving the new take pending",
                recording.id
            ),
            Err(e) => error!("Failed to mark {} uploaded: {}", recording.id, e),
        }
        self.status.clear_item(&recording.id).await;

        if let Some(progress) = receipt.progress {
            if let Err(e) = self
                .store
                .update_progress(&recording.participant_code, &progress)
                .await
            {
                error!(
                    "Failed to save progress for {}: {}",
                    recording.participant_code, e
                );
            }
        }
    }

    async fn record_failure(&self, position: usize, recording: &RecordingMetadata) {
        self.status
            .mark(position, &recording.id, UploadStatus::Failed)
            .await;
        if let Err(e) = self
            .store
            .set_upload_status(&recording.id, UploadStatus::Failed)
            .await
        {
            error!("Failed to mark {} as failed: {}", recording.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::participant::{ParticipantDetails, ParticipantProgress};
    use crate::test_support::{sample_recording, write_blob, FakeConnectivity, FakeRemote};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const CODE: &str = "TWI_Speaker_001";

    struct Fixture {
        _dir: TempDir,
        store: Arc<MetadataStore>,
        remote: Arc<FakeRemote>,
        connectivity: Arc<FakeConnectivity>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(
                MetadataStore::open_in_memory(BlobStore::new(dir.path().join("recordings")))
                    .unwrap(),
            );
            Self {
                _dir: dir,
                store,
                remote: Arc::new(FakeRemote::default()),
                connectivity: Arc::new(FakeConnectivity::new(true)),
            }
        }

        fn queue(&self) -> UploadQueue {
            self.queue_with_timeout(Duration::from_secs(5))
        }

        fn queue_with_timeout(&self, timeout: Duration) -> UploadQueue {
            UploadQueue::new(
                self.store.clone(),
                self.remote.clone(),
                self.connectivity.clone(),
                timeout,
            )
        }

        async fn add(&self, id: &str, prompt: &str) -> RecordingMetadata {
            let uri = write_blob(self.store.blobs(), &format!("{id}.m4a")).await;
            let mut recording = sample_recording(id, CODE, prompt, &uri);
            recording.version = self.store.upsert_recording(&recording).await.unwrap();
            recording
        }

        async fn get(&self, id: &str) -> RecordingMetadata {
            self.store.get_recording(id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_nothing_to_upload_even_offline() {
        let fx = Fixture::new();
        fx.connectivity.set_online(false);
        let outcome = fx
            .queue()
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome::NothingToUpload);
    }

    #[tokio::test]
    async fn test_offline_uploads_nothing() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.connectivity.set_online(false);

        let err = fx
            .queue()
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Offline));
        assert!(fx.remote.uploaded_ids().is_empty());
        assert_eq!(fx.get("rec-1").await.upload_status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_blob_is_isolated() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        let broken = fx.add("rec-2", "A_2").await;
        fx.add("rec-3", "A_3").await;
        fx.store.blobs().remove(&broken.local_uri).await.unwrap();

        let outcome = fx
            .queue()
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Completed(UploadSummary {
                success_count: 2,
                fail_count: 1
            })
        );
        assert_eq!(fx.remote.uploaded_ids(), vec!["rec-1", "rec-3"]);
        assert_eq!(fx.get("rec-2").await.upload_status, UploadStatus::Failed);
        assert!(fx.get("rec-3").await.uploaded);
    }

    #[tokio::test]
    async fn test_network_drop_mid_batch() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.add("rec-2", "A_2").await;
        fx.remote.fail_after(1);

        let outcome = fx
            .queue()
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.summary(),
            UploadSummary {
                success_count: 1,
                fail_count: 1
            }
        );
        assert!(fx.get("rec-1").await.uploaded);
        let second = fx.get("rec-2").await;
        assert!(!second.uploaded);
        assert_eq!(second.upload_status, UploadStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_items_are_not_retried_automatically() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.remote.fail_id("rec-1");
        let queue = fx.queue();

        queue
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();
        let second = queue
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second, UploadOutcome::NothingToUpload);
        assert_eq!(fx.remote.uploaded_ids().len(), 1);

        assert_eq!(queue.retry_failed(CODE).await.unwrap(), 1);
        fx.remote.clear_failures();
        let third = queue
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third.summary().success_count, 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_keep_single_record() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.remote.fail_id("rec-1");
        let queue = fx.queue();

        for _ in 0..3 {
            queue.retry_failed(CODE).await.unwrap();
            queue
                .upload_pending(CODE, &CancellationToken::new())
                .await
                .unwrap();
        }

        let all = fx.store.list_recordings().await.unwrap().into_items();
        assert_eq!(all.len(), 1);
        assert!(!all[0].uploaded);
        assert_eq!(all[0].upload_status, UploadStatus::Failed);
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.add("rec-2", "A_2").await;
        fx.remote.hang_id("rec-1");

        let outcome = fx
            .queue_with_timeout(Duration::from_millis(50))
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome.summary(),
            UploadSummary {
                success_count: 1,
                fail_count: 1
            }
        );
        assert_eq!(fx.get("rec-1").await.upload_status, UploadStatus::Failed);
        assert!(fx.get("rec-2").await.uploaded);
    }

    #[tokio::test]
    async fn test_cancel_stops_between_items() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.add("rec-2", "A_2").await;
        let cancel = CancellationToken::new();
        fx.remote.cancel_on_upload(cancel.clone());

        let outcome = fx.queue().upload_pending(CODE, &cancel).await.unwrap();

        assert_eq!(
            outcome,
            UploadOutcome::Cancelled(UploadSummary {
                success_count: 1,
                fail_count: 0
            })
        );
        assert_eq!(fx.remote.uploaded_ids(), vec!["rec-1"]);
        assert!(!fx.get("rec-2").await.uploaded);
        assert_eq!(fx.get("rec-2").await.upload_status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn test_server_progress_is_applied() {
        let fx = Fixture::new();
        fx.store
            .upsert_participant(&ParticipantDetails::new(CODE), true)
            .await
            .unwrap();
        fx.add("rec-1", "A_1").await;
        fx.remote
            .set_upload_progress(ParticipantProgress::new(12, 163, false));

        fx.queue()
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        let participant = fx.store.get_participant(CODE).await.unwrap().unwrap();
        assert_eq!(
            participant.progress,
            Some(ParticipantProgress::new(12, 163, false))
        );
    }

    #[tokio::test]
    async fn test_only_active_participant_is_uploaded() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        let uri = write_blob(fx.store.blobs(), "other.m4a").await;
        fx.store
            .upsert_recording(&sample_recording("rec-x", "TWI_Speaker_002", "A_1", &uri))
            .await
            .unwrap();

        fx.queue()
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fx.remote.uploaded_ids(), vec!["rec-1"]);
        assert!(!fx.get("rec-x").await.uploaded);
    }

    #[tokio::test]
    async fn test_board_reports_failures() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        fx.add("rec-2", "A_2").await;
        fx.remote.fail_id("rec-2");
        let queue = fx.queue();

        queue
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        let board = queue.status().get().await;
        assert!(!board.in_progress);
        assert_eq!((board.current, board.total), (2, 2));
        assert_eq!(
            queue.status().status_of("rec-2").await,
            Some(UploadStatus::Failed)
        );
        assert_eq!(queue.status().status_of("rec-1").await, None);
    }

    /// Re-records the prompt while the first take is in flight.
    struct RerecordingRemote {
        store: Arc<MetadataStore>,
        replacement_uri: String,
    }

    #[async_trait]
    impl RemoteService for RerecordingRemote {
        async fn upload_recording(&self, recording: &RecordingMetadata) -> Result<UploadReceipt> {
            let mut newer = recording.clone();
            newer.local_uri = self.replacement_uri.clone();
            self.store.upsert_recording(&newer).await?;
            Ok(UploadReceipt::default())
        }

        async fn fetch_participant(
            &self,
            _code: &str,
        ) -> Result<Option<crate::remote::RemoteParticipant>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_rerecord_during_upload_stays_pending() {
        let fx = Fixture::new();
        fx.add("rec-1", "A_1").await;
        let replacement_uri = write_blob(fx.store.blobs(), "newer.m4a").await;
        let queue = UploadQueue::new(
            fx.store.clone(),
            Arc::new(RerecordingRemote {
                store: fx.store.clone(),
                replacement_uri: replacement_uri.clone(),
            }),
            fx.connectivity.clone(),
            Duration::from_secs(5),
        );

        let outcome = queue
            .upload_pending(CODE, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary().success_count, 1);
        let stored = fx.get("rec-1").await;
        assert!(!stored.uploaded);
        assert_eq!(stored.local_uri, replacement_uri);
    }
}
