use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::recorder::{ActiveCapture, AudioRecorder};
use super::recording_filename;
use crate::db::{RecordingMetadata, UploadStatus};
use crate::error::{Result, SyncError};
use crate::participant::{ensure_valid_code, ParticipantDetails};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    RequestingPermission,
    Ready,
    Recording,
    Stopped,
    Error,
}

impl RecorderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderPhase::Idle => "idle",
            RecorderPhase::RequestingPermission => "requesting_permission",
            RecorderPhase::Ready => "ready",
            RecorderPhase::Recording => "recording",
            RecorderPhase::Stopped => "stopped",
            RecorderPhase::Error => "error",
        }
    }

    /// `Ready` and `Stopped` both allow a new take.
    pub fn can_start(&self) -> bool {
        matches!(self, RecorderPhase::Ready | RecorderPhase::Stopped)
    }
}

#[derive(Debug, Clone)]
pub struct RecorderStatus {
    pub phase: RecorderPhase,
    pub last_error: Option<String>,
}

impl Default for RecorderStatus {
    fn default() -> Self {
        Self {
            phase: RecorderPhase::Idle,
            last_error: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct RecorderStatusHandle {
    inner: Arc<Mutex<RecorderStatus>>,
}

impl RecorderStatusHandle {
    pub async fn get(&self) -> RecorderStatus {
        self.inner.lock().await.clone()
    }

    pub async fn set(&self, phase: RecorderPhase, last_error: Option<String>) {
        let mut status = self.inner.lock().await;
        status.phase = phase;
        status.last_error = last_error;
    }
}

/// What a finished take is recorded against.
#[derive(Debug, Clone, Default)]
pub struct RecordingRequest {
    pub participant_code: String,
    pub prompt_id: String,
    pub prompt_text: String,
    /// Demographics copied onto the recording at capture time.
    pub participant: Option<ParticipantDetails>,
    pub session_id: Option<String>,
}

impl RecordingRequest {
    pub fn new(
        participant_code: impl Into<String>,
        prompt_id: impl Into<String>,
        prompt_text: impl Into<String>,
    ) -> Self {
        Self {
            participant_code: participant_code.into().trim().to_string(),
            prompt_id: prompt_id.into().trim().to_string(),
            prompt_text: prompt_text.into(),
            ..Default::default()
        }
    }

    pub fn with_participant(mut self, participant: ParticipantDetails) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = crate::participant::non_blank(session_id);
        self
    }

    fn validate(&self) -> Result<()> {
        ensure_valid_code(&self.participant_code)?;
        if self.prompt_id.is_empty() {
            return Err(SyncError::validation("prompt id is required"));
        }
        if self.prompt_text.trim().is_empty() {
            return Err(SyncError::validation("prompt text is required"));
        }
        Ok(())
    }
}

pub struct RecordingMachine {
    recorder: Arc<dyn AudioRecorder>,
    store: Arc<MetadataStore>,
    capture: Mutex<Option<Box<dyn ActiveCapture>>>,
    status: RecorderStatusHandle,
}

impl RecordingMachine {
    pub fn new(
        recorder: Arc<dyn AudioRecorder>,
        store: Arc<MetadataStore>,
        status: RecorderStatusHandle,
    ) -> Self {
        Self {
            recorder,
            store,
            capture: Mutex::new(None),
            status,
        }
    }

    pub fn status(&self) -> RecorderStatusHandle {
        self.status.clone()
    }

    /// Asks for device access and prepares the recordings directory.
    pub async fn initialize(&self) -> Result<RecorderPhase> {
        self.status
            .set(RecorderPhase::RequestingPermission, None)
            .await;

        let granted = match self.recorder.request_permission().await {
            Ok(granted) => granted,
            Err(e) => return Err(self.fail(e).await),
        };
        if !granted {
            warn!("RecordingMachine: recording permission denied");
            self.status
                .set(
                    RecorderPhase::Error,
                    Some("recording permission denied".to_string()),
                )
                .await;
            return Ok(RecorderPhase::Error);
        }

        if let Err(e) = self.store.blobs().ensure_directory().await {
            return Err(self.fail(e).await);
        }

        self.status.set(RecorderPhase::Ready, None).await;
        Ok(RecorderPhase::Ready)
    }

    pub async fn start(&self) -> Result<()> {
        let phase = self.status.get().await.phase;
        if !phase.can_start() {
            return Err(SyncError::InvalidState {
                action: "start recording",
                phase: phase.as_str(),
            });
        }

        let mut slot = self.capture.lock().await;
        if let Some(previous) = slot.take() {
            debug!("RecordingMachine: discarding leftover capture before starting");
            previous.discard().await;
        }

        match self.recorder.start().await {
            Ok(capture) => {
                *slot = Some(capture);
                info!("RecordingMachine: recording started");
                self.status.set(RecorderPhase::Recording, None).await;
                Ok(())
            }
            Err(e) => {
                drop(slot);
                let e = match e {
                    SyncError::Recorder(_) => e,
                    other => SyncError::Recorder(other.to_string()),
                };
                Err(self.fail(e).await)
            }
        }
    }

    /// Finalizes the take, moves it into storage and saves its metadata.
    ///
    /// Nothing is persisted unless both the blob commit and the metadata
    /// write succeed. A validation failure leaves the capture running.
    pub async fn stop_and_persist(&self, request: &RecordingRequest) -> Result<RecordingMetadata> {
        request.validate()?;

        let capture = {
            let phase = self.status.get().await.phase;
            let mut slot = self.capture.lock().await;
            match slot.take() {
                Some(capture) if phase == RecorderPhase::Recording => capture,
                other => {
                    *slot = other;
                    return Err(SyncError::InvalidState {
                        action: "stop recording",
                        phase: phase.as_str(),
                    });
                }
            }
        };

        let duration_ms = capture.elapsed_ms();
        let temp_path = match capture.finish().await {
            Ok(path) => path,
            Err(e) => return Err(self.fail(e).await),
        };

        let format = self.recorder.format();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let filename = recording_filename(
            &request.participant_code,
            &request.prompt_id,
            timestamp,
            &format.extension,
        );

        let local_uri = match self.store.blobs().commit(&temp_path, &filename).await {
            Ok(uri) => uri,
            Err(e) => return Err(self.fail(e).await),
        };

        let participant = request.participant.as_ref();
        let mut recording = RecordingMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            participant_code: request.participant_code.clone(),
            prompt_id: request.prompt_id.clone(),
            prompt_text: request.prompt_text.clone(),
            timestamp,
            local_uri,
            original_filename: filename,
            content_type: format.content_type,
            uploaded: false,
            upload_status: UploadStatus::Pending,
            recording_duration: duration_ms,
            dialect: participant.and_then(|p| p.dialect.clone()),
            age_range: participant.and_then(|p| p.age_range.clone()),
            gender: participant.and_then(|p| p.gender.clone()),
            session_id: request.session_id.clone(),
            version: 0,
        };

        match self.store.upsert_recording(&recording).await {
            Ok(version) => recording.version = version,
            Err(e) => {
                if let Err(cleanup) = self.store.blobs().remove(&recording.local_uri).await {
                    error!(
                        "Failed to remove blob {} after metadata error: {}",
                        recording.local_uri, cleanup
                    );
                }
                return Err(self.fail(e).await);
            }
        }

        info!(
            "RecordingMachine: saved {} for prompt {} ({:?} ms)",
            recording.id, recording.prompt_id, duration_ms
        );
        self.status.set(RecorderPhase::Stopped, None).await;
        Ok(recording)
    }

    /// Drops the current take without saving it.
    pub async fn cancel(&self) {
        if let Some(capture) = self.capture.lock().await.take() {
            capture.discard().await;
        }
        let phase = self.status.get().await.phase;
        if phase == RecorderPhase::Recording {
            self.status.set(RecorderPhase::Ready, None).await;
        }
    }

    async fn fail(&self, e: SyncError) -> SyncError {
        error!("RecordingMachine: {}", e);
        self.status
            .set(RecorderPhase::Error, Some(e.to_string()))
            .await;
        e
    }
}
