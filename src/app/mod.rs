//! Facade the CLI (and any other front end) talks to.
//!
//! Storage failures are logged and turned into empty lists, `false` or
//! `None` so callers stay usable. Validation failures still propagate.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blobs::BlobStore;
use crate::config::Config;
use crate::db::{RecordingMetadata, UploadStatus};
use crate::error::SyncError;
use crate::global;
use crate::participant::{
    next_prompt_position, CompletionRule, ParticipantDetails, ParticipantProgress, PromptPosition,
};
use crate::recording::{
    AudioRecorder, DeleteSummary, ParticipantDeletion, RecorderStatusHandle, RecordingCleanup,
    RecordingMachine,
};
use crate::remote::{
    Connectivity, ConnectivityMonitor, HttpConnectivity, HttpRemote, RemoteService,
};
use crate::store::MetadataStore;
use crate::sync::{
    ImportReport, ReconcilePlan, Reconciler, RefreshOutcome, UploadOutcome, UploadQueue,
    UploadStatusHandle,
};

/// Snapshot for the home screen.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub current: Option<ParticipantDetails>,
    pub online: bool,
    pub pending: usize,
    pub failed: usize,
    pub uploaded: usize,
    /// Progress computed from recordings on this device.
    pub local_progress: Option<ParticipantProgress>,
}

pub struct SyncApp {
    config: Config,
    data_dir: PathBuf,
    store: Arc<MetadataStore>,
    connectivity: Arc<dyn Connectivity>,
    uploads: UploadQueue,
    reconciler: Reconciler,
    cleanup: RecordingCleanup,
    rule: CompletionRule,
}

impl SyncApp {
    /// Wires the HTTP backend from configuration.
    pub async fn open(config: Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let remote = Arc::new(
            HttpRemote::new(&config.server).context("Failed to build recordings client")?,
        );
        let connectivity = Arc::new(
            HttpConnectivity::new(&config.server, &config.network)
                .context("Failed to build connectivity probe")?,
        );
        Self::with_services(config, &data_dir, remote, connectivity).await
    }

    pub async fn with_services(
        config: Config,
        data_dir: &Path,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self> {
        let blobs = BlobStore::new(global::recordings_dir_in(data_dir));
        blobs
            .ensure_directory()
            .await
            .context("Failed to prepare recordings directory")?;
        let db_path = global::db_file_in(data_dir);
        let store = Arc::new(
            MetadataStore::open(&db_path, blobs)
                .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
        );
        debug!("Opened metadata store at {:?}", db_path);

        let rule = CompletionRule::from(&config.study);
        let uploads = UploadQueue::new(
            store.clone(),
            remote.clone(),
            connectivity.clone(),
            config.server.request_timeout(),
        );
        let reconciler = Reconciler::new(
            store.clone(),
            remote,
            connectivity.clone(),
            rule.clone(),
        );

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            cleanup: RecordingCleanup::new(store.clone()),
            config,
            store,
            connectivity,
            uploads,
            reconciler,
            rule,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store(&self) -> Arc<MetadataStore> {
        self.store.clone()
    }

    pub fn upload_status(&self) -> UploadStatusHandle {
        self.uploads.status()
    }

    /// A lifecycle manager bound to this app's store.
    pub fn recording_machine(&self, recorder: Arc<dyn AudioRecorder>) -> RecordingMachine {
        RecordingMachine::new(recorder, self.store.clone(), RecorderStatusHandle::default())
    }

    pub fn spawn_connectivity_monitor(&self) -> ConnectivityMonitor {
        ConnectivityMonitor::spawn(
            self.connectivity.clone(),
            self.config.network.check_interval(),
        )
    }

    pub async fn is_online(&self) -> bool {
        self.connectivity.is_online().await
    }

    // --- Participants ---

    /// Returns false if the write failed; invalid codes are an error.
    pub async fn save_participant(
        &self,
        details: &ParticipantDetails,
        make_current: bool,
    ) -> Result<bool> {
        match self.store.upsert_participant(details, make_current).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_validation() => Err(e.into()),
            Err(e) => {
                error!("Failed to save participant {}: {}", details.code, e);
                Ok(false)
            }
        }
    }

    pub async fn participants(&self) -> Vec<ParticipantDetails> {
        match self.store.list_participants().await {
            Ok(report) => report.into_items(),
            Err(e) => {
                error!("Failed to load participants: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn participant(&self, code: &str) -> Option<ParticipantDetails> {
        self.store
            .get_participant(code)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to load participant {}: {}", code, e);
                None
            })
    }

    pub async fn current_participant(&self) -> Option<ParticipantDetails> {
        self.store.current_participant().await.unwrap_or_else(|e| {
            error!("Failed to load current participant: {}", e);
            None
        })
    }

    pub async fn switch_participant(&self, code: &str) -> bool {
        self.store
            .set_current_participant(code)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to switch participant to {}: {}", code, e);
                false
            })
    }

    /// Deletes a participant together with all of their recordings.
    pub async fn remove_participant(&self, code: &str) -> Option<ParticipantDeletion> {
        match self.cleanup.delete_all_for_participant(code).await {
            Ok(result) => {
                if !result.profile_removed {
                    warn!("Could not remove participant {} from list", code);
                }
                Some(result)
            }
            Err(e) => {
                error!("Failed to delete participant {}: {}", code, e);
                None
            }
        }
    }

    // --- Recordings ---

    pub async fn recordings(&self, participant_code: Option<&str>) -> Vec<RecordingMetadata> {
        let result = match participant_code {
            Some(code) => self.store.recordings_for(code).await,
            None => self
                .store
                .list_recordings()
                .await
                .map(|report| report.into_items()),
        };
        result.unwrap_or_else(|e| {
            error!("Failed to load recordings: {}", e);
            Vec::new()
        })
    }

    pub async fn delete_recording(&self, id: &str) -> bool {
        self.store.delete_recording(id).await.unwrap_or_else(|e| {
            error!("Failed to delete recording {}: {}", id, e);
            false
        })
    }

    pub async fn delete_all_device(&self) -> DeleteSummary {
        self.cleanup
            .delete_all_device()
            .await
            .unwrap_or_else(|e| {
                error!("Failed to delete device recordings: {}", e);
                DeleteSummary::default()
            })
    }

    /// Where a participant resumes in the prompt catalog.
    pub async fn resume_position<S: AsRef<str>>(
        &self,
        participant_code: &str,
        catalog: &[S],
    ) -> PromptPosition {
        let recorded: std::collections::HashSet<String> = self
            .recordings(Some(participant_code))
            .await
            .into_iter()
            .map(|r| r.prompt_id)
            .collect();
        next_prompt_position(catalog, |prompt_id| recorded.contains(prompt_id))
    }

    pub async fn status(&self) -> StatusReport {
        let current = self.current_participant().await;
        let mut report = StatusReport {
            online: self.is_online().await,
            ..Default::default()
        };

        if let Some(participant) = &current {
            let recordings = self.recordings(Some(&participant.code)).await;
            for recording in &recordings {
                if recording.uploaded {
                    report.uploaded += 1;
                } else if recording.upload_status == UploadStatus::Failed {
                    report.failed += 1;
                } else {
                    report.pending += 1;
                }
            }
            report.local_progress = Some(
                self.rule
                    .evaluate(recordings.iter().map(|r| r.prompt_id.as_str())),
            );
        }
        report.current = current;
        report
    }

    // --- Sync ---

    /// Runs one upload batch. Only one batch may run at a time per data directory.
    pub async fn upload(
        &self,
        participant_code: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let _lock = acquire_upload_lock(&global::upload_lock_file_in(&self.data_dir)).await?;
        match self.uploads.upload_pending(participant_code, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(SyncError::Offline) => Err(SyncError::Offline.into()),
            Err(e) => Err(anyhow!(e).context("Upload batch could not start")),
        }
    }

    pub async fn retry_failed(&self, participant_code: &str) -> usize {
        self.uploads
            .retry_failed(participant_code)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to re-queue uploads for {}: {}", participant_code, e);
                0
            })
    }

    /// Pulls the server view. Failures are logged and yield `None`.
    pub async fn refresh(&self, participant_code: &str) -> Option<RefreshOutcome> {
        match self.reconciler.refresh(participant_code).await {
            Ok(outcome) => Some(outcome),
            Err(SyncError::Offline) => {
                info!("Skipping refresh for {}: offline", participant_code);
                None
            }
            Err(e) => {
                warn!("Refresh for {} failed: {}", participant_code, e);
                None
            }
        }
    }

    pub async fn import(&self, plan: &ReconcilePlan) -> Option<ImportReport> {
        match self.reconciler.import(plan).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(
                    "Import for {} failed: {}",
                    plan.participant_code, e
                );
                None
            }
        }
    }
}

/// Held for the duration of an upload batch.
struct UploadLock {
    file: File,
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("Failed to release upload lock: {err:?}");
        }
    }
}

async fn acquire_upload_lock(path: &Path) -> Result<UploadLock> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<UploadLock> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| anyhow!("Another upload is already in progress"))?;
        Ok(UploadLock { file })
    })
    .await?
}
