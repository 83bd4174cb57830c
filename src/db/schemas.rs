use serde::{Deserialize, Serialize};

/// Upload state of a recording as seen by the queue.
///
/// `Uploading` only ever lives in memory; it is written as `pending` and a
/// stored `uploading` value decodes back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Pending,
    Uploading,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Failed => "failed",
        }
    }

    /// Value written to the database.
    pub fn persisted_str(&self) -> &'static str {
        match self {
            Self::Pending | Self::Uploading => "pending",
            Self::Failed => "failed",
        }
    }

    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "pending" | "uploading" => Some(Self::Pending),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One audio capture bound to a (participant, prompt) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub participant_code: String,
    pub prompt_id: String,
    /// Prompt content at recording time.
    pub prompt_text: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Local file path, or the server's file URL for imported recordings.
    pub local_uri: String,
    pub original_filename: String,
    pub content_type: String,
    pub uploaded: bool,
    pub upload_status: UploadStatus,
    /// Milliseconds.
    pub recording_duration: Option<u64>,
    pub dialect: Option<String>,
    pub age_range: Option<String>,
    pub gender: Option<String>,
    pub session_id: Option<String>,
    /// Bumped on every write; used for optimistic checks.
    #[serde(default)]
    pub version: i64,
}

impl RecordingMetadata {
    pub fn is_remote(&self) -> bool {
        is_remote_uri(&self.local_uri)
    }

    /// Waiting for the automatic upload batch (failed ones need an explicit retry).
    pub fn is_upload_candidate(&self) -> bool {
        !self.uploaded && self.upload_status != UploadStatus::Failed
    }
}

pub fn is_remote_uri(uri: &str) -> bool {
    let lower = uri.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Identity and blob location of a row touched by a destructive write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRef {
    pub id: String,
    pub local_uri: Option<String>,
}

/// Result of decoding one stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome<T> {
    Valid(T),
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    pub key: String,
    pub reason: String,
}

/// Rows that decoded cleanly plus the ones that were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport<T> {
    pub items: Vec<T>,
    pub dropped: Vec<DroppedRow>,
}

impl<T> Default for LoadReport<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

impl<T> LoadReport<T> {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = RowOutcome<T>>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                RowOutcome::Valid(item) => report.items.push(item),
                RowOutcome::Invalid { key, reason } => {
                    report.dropped.push(DroppedRow { key, reason })
                }
            }
        }
        report
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
