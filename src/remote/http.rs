//! HTTP client for the recordings backend.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{RemoteParticipant, RemoteProfile, RemoteRecording, RemoteService, UploadReceipt};
use crate::blobs::local_path;
use crate::config::ServerConfig;
use crate::db::RecordingMetadata;
use crate::error::{Result, SyncError};
use crate::recording::DEFAULT_CONTENT_TYPE;

const UPLOAD_PATH: &str = "/upload/audio";
const RECORDINGS_LIMIT: &str = "1000";

pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn build_form(recording: &RecordingMetadata) -> Result<Form> {
        let path = local_path(&recording.local_uri).ok_or_else(|| {
            SyncError::Upload(format!("{} has no local file", recording.id))
        })?;
        let file_data = fs::read(&path)
            .await
            .map_err(|e| SyncError::io_at("read recording", &path, e))?;

        let content_type = if recording.content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            recording.content_type.as_str()
        };
        let file = Part::bytes(file_data)
            .file_name(recording.original_filename.clone())
            .mime_str(content_type)
            .map_err(|e| SyncError::Upload(format!("invalid content type {content_type}: {e}")))?;

        let mut form = Form::new()
            .text("participant_code", recording.participant_code.clone())
            .text("prompt_id", recording.prompt_id.clone())
            .text("prompt_text", recording.prompt_text.clone());

        for (name, value) in [
            ("dialect", &recording.dialect),
            ("age_range", &recording.age_range),
            ("gender", &recording.gender),
            ("session_id", &recording.session_id),
        ] {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                form = form.text(name, value.to_string());
            }
        }

        Ok(form.part("file", file))
    }

    async fn fetch_recordings(&self, code: &str) -> Vec<RemoteRecording> {
        let url = format!("{}/recordings", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[("participant_code", code), ("limit", RECORDINGS_LIMIT)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to fetch recordings for {}: {}", code, e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                "Error fetching recordings for {}: {}",
                code,
                response.status()
            );
            return Vec::new();
        }

        match response.json::<Vec<serde_json::Value>>().await {
            Ok(entries) => decode_recordings(code, entries),
            Err(e) => {
                warn!("Recordings list for {} was not readable: {}", code, e);
                Vec::new()
            }
        }
    }
}

/// Decodes each server entry on its own; malformed entries are logged and skipped.
fn decode_recordings(code: &str, entries: Vec<serde_json::Value>) -> Vec<RemoteRecording> {
    let total = entries.len();
    let recordings: Vec<RemoteRecording> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            match serde_json::from_value::<RemoteRecording>(entry) {
                Ok(recording) => Some(recording),
                Err(e) => {
                    warn!(
                        "Skipping unreadable server recording #{} for {}: {}",
                        index, code, e
                    );
                    None
                }
            }
        })
        .collect();
    if recordings.len() < total {
        warn!(
            "Dropped {} of {} server recordings for {}",
            total - recordings.len(),
            total,
            code
        );
    }
    recordings
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn upload_recording(&self, recording: &RecordingMetadata) -> Result<UploadReceipt> {
        let form = Self::build_form(recording).await?;
        info!(
            "Uploading {} for prompt {}",
            recording.original_filename, recording.prompt_id
        );

        let response = self
            .client
            .post(format!("{}{}", self.base_url, UPLOAD_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Upload(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Upload(e.to_string()))?;
        debug!("Upload response status for {}: {}", recording.id, status);

        if !status.is_success() {
            return Err(SyncError::Upload(format!("server returned {status}: {body}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| SyncError::Upload(format!("unreadable upload response: {e}")))
    }

    async fn fetch_participant(&self, code: &str) -> Result<Option<RemoteParticipant>> {
        let url = format!("{}/speakers/{}", self.base_url, code);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("Participant {} not found on server", code);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Remote(format!(
                "participant lookup returned {}",
                response.status()
            )));
        }

        let profile: RemoteProfile = response.json().await?;
        let recordings = self.fetch_recordings(code).await;
        info!(
            "Found {} server recordings for {}",
            recordings.len(),
            code
        );

        Ok(Some(RemoteParticipant {
            profile,
            recordings,
        }))
    }
}
