//! Fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::blobs::BlobStore;
use crate::db::{RecordingMetadata, UploadStatus};
use crate::error::{Result, SyncError};
use crate::participant::ParticipantProgress;
use crate::recording::{ActiveCapture, AudioRecorder, CaptureFormat};
use crate::remote::{Connectivity, RemoteParticipant, RemoteService, UploadReceipt};

pub fn sample_recording(id: &str, code: &str, prompt_id: &str, uri: &str) -> RecordingMetadata {
    RecordingMetadata {
        id: id.to_string(),
        participant_code: code.to_string(),
        prompt_id: prompt_id.to_string(),
        prompt_text: format!("Prompt {prompt_id}"),
        timestamp: 1_700_000_000_000,
        local_uri: uri.to_string(),
        original_filename: format!("{id}.m4a"),
        content_type: "audio/mp4".to_string(),
        uploaded: false,
        upload_status: UploadStatus::Pending,
        recording_duration: Some(1200),
        dialect: None,
        age_range: None,
        gender: None,
        session_id: None,
        version: 0,
    }
}

/// Writes a small file into the blob directory and returns its URI.
pub async fn write_blob(blobs: &BlobStore, name: &str) -> String {
    blobs.ensure_directory().await.unwrap();
    let path = blobs.root().join(name);
    tokio::fs::write(&path, b"fake audio").await.unwrap();
    path.to_string_lossy().into_owned()
}

pub struct FakeConnectivity {
    online: AtomicBool,
}

impl FakeConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connectivity for FakeConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeRemote {
    attempts: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    succeed_limit: Mutex<Option<usize>>,
    successes: AtomicUsize,
    progress: Mutex<Option<ParticipantProgress>>,
    cancel_on_upload: Mutex<Option<CancellationToken>>,
    participants: Mutex<HashMap<String, RemoteParticipant>>,
}

impl FakeRemote {
    /// Ids of every upload attempt, in order.
    pub fn uploaded_ids(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn fail_id(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn hang_id(&self, id: &str) {
        self.hanging.lock().unwrap().insert(id.to_string());
    }

    /// Every upload after the first `n` successes fails.
    pub fn fail_after(&self, n: usize) {
        *self.succeed_limit.lock().unwrap() = Some(n);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
        *self.succeed_limit.lock().unwrap() = None;
    }

    pub fn set_upload_progress(&self, progress: ParticipantProgress) {
        *self.progress.lock().unwrap() = Some(progress);
    }

    pub fn cancel_on_upload(&self, token: CancellationToken) {
        *self.cancel_on_upload.lock().unwrap() = Some(token);
    }

    pub fn add_participant(&self, code: &str, participant: RemoteParticipant) {
        self.participants
            .lock()
            .unwrap()
            .insert(code.to_string(), participant);
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn upload_recording(&self, recording: &RecordingMetadata) -> Result<UploadReceipt> {
        self.attempts.lock().unwrap().push(recording.id.clone());
        let cancel = self.cancel_on_upload.lock().unwrap().clone();
        if let Some(token) = cancel {
            token.cancel();
        }

        let hang = self.hanging.lock().unwrap().contains(&recording.id);
        if hang {
            std::future::pending::<()>().await;
        }
        let fail = self.failing.lock().unwrap().contains(&recording.id);
        if fail {
            return Err(SyncError::Upload("server returned 500".to_string()));
        }
        let limit = *self.succeed_limit.lock().unwrap();
        if let Some(limit) = limit {
            if self.successes.load(Ordering::SeqCst) >= limit {
                return Err(SyncError::Upload("connection reset".to_string()));
            }
        }

        self.successes.fetch_add(1, Ordering::SeqCst);
        let progress = *self.progress.lock().unwrap();
        Ok(UploadReceipt {
            message: Some("Upload successful".to_string()),
            file_url: Some(format!("https://cdn.example.com/{}", recording.original_filename)),
            recording_db_id: Some(format!("srv-{}", recording.id)),
            progress,
        })
    }

    async fn fetch_participant(&self, code: &str) -> Result<Option<RemoteParticipant>> {
        Ok(self.participants.lock().unwrap().get(code).cloned())
    }
}

/// Writes a placeholder capture file on start; reports 1.5 s of audio.
pub struct FakeRecorder {
    dir: PathBuf,
    permitted: AtomicBool,
    fail_finish: Arc<AtomicBool>,
    discarded: Arc<AtomicUsize>,
}

impl FakeRecorder {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            permitted: AtomicBool::new(true),
            fail_finish: Arc::new(AtomicBool::new(false)),
            discarded: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn deny_permission(&self) {
        self.permitted.store(false, Ordering::SeqCst);
    }

    pub fn fail_finish(&self) {
        self.fail_finish.store(true, Ordering::SeqCst);
    }

    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioRecorder for FakeRecorder {
    async fn request_permission(&self) -> Result<bool> {
        Ok(self.permitted.load(Ordering::SeqCst))
    }

    async fn start(&self) -> Result<Box<dyn ActiveCapture>> {
        if !self.permitted.load(Ordering::SeqCst) {
            return Err(SyncError::Recorder("microphone unavailable".to_string()));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SyncError::io("create capture dir", e))?;
        let path = self
            .dir
            .join(format!("capture-{}.m4a", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, b"captured audio")
            .await
            .map_err(|e| SyncError::io("write capture", e))?;

        Ok(Box::new(FakeCapture {
            path,
            fail_finish: self.fail_finish.clone(),
            discarded: self.discarded.clone(),
        }))
    }

    fn format(&self) -> CaptureFormat {
        CaptureFormat::from_extension("m4a")
    }
}

struct FakeCapture {
    path: PathBuf,
    fail_finish: Arc<AtomicBool>,
    discarded: Arc<AtomicUsize>,
}

#[async_trait]
impl ActiveCapture for FakeCapture {
    fn elapsed_ms(&self) -> Option<u64> {
        Some(1500)
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf> {
        if self.fail_finish.load(Ordering::SeqCst) {
            let _ = tokio::fs::remove_file(&self.path).await;
            return Err(SyncError::Recorder("encoder stopped unexpectedly".to_string()));
        }
        Ok(self.path)
    }

    async fn discard(self: Box<Self>) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}
