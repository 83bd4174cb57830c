//! Recordings backend contract.
//!
//! The sync engine only consumes these traits; `HttpRemote` and
//! `HttpConnectivity` are the reqwest-backed implementations.

mod connectivity;
mod http;

pub use connectivity::{Connectivity, ConnectivityMonitor, HttpConnectivity};
pub use http::HttpRemote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::RecordingMetadata;
use crate::error::Result;
use crate::participant::ParticipantProgress;

#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Sends one recording. Any non-2xx response is an `Upload` error.
    async fn upload_recording(&self, recording: &RecordingMetadata) -> Result<UploadReceipt>;

    /// Server view of a participant; `None` when the server does not know the code.
    async fn fetch_participant(&self, code: &str) -> Result<Option<RemoteParticipant>>;
}

/// Body of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub recording_db_id: Option<String>,
    #[serde(default)]
    pub progress: Option<ParticipantProgress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProfile {
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default)]
    pub age_range: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub progress: Option<ParticipantProgress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecording {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    pub prompt_id: String,
    #[serde(default)]
    pub prompt_text: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
    pub file_url: String,
    #[serde(default)]
    pub filename_original: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub recording_duration: Option<u64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub profile: RemoteProfile,
    pub recordings: Vec<RemoteRecording>,
}
