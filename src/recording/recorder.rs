//! Capture device abstraction.
//!
//! The lifecycle manager only needs a permission check, a way to start a
//! capture, and a finished temp file. `FileRecorder` satisfies that contract
//! by "capturing" an existing audio file, which is what the CLI uses.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

pub const DEFAULT_CONTENT_TYPE: &str = "audio/mp4";

/// Container format a recorder produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFormat {
    pub extension: String,
    pub content_type: String,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self::from_extension("m4a")
    }
}

impl CaptureFormat {
    pub fn from_extension(extension: &str) -> Self {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        Self {
            content_type: content_type_for_extension(&extension).to_string(),
            extension,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or_default()
    }
}

/// MIME type for an audio file extension; unknown extensions map to `audio/mp4`.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "webm" => "audio/webm",
        "3gp" => "audio/3gpp",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// A capture device.
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    /// Asks for access to the device. `false` means the user declined.
    async fn request_permission(&self) -> Result<bool>;

    /// Begins a new capture.
    async fn start(&self) -> Result<Box<dyn ActiveCapture>>;

    fn format(&self) -> CaptureFormat;
}

/// An in-progress capture. Exactly one of `finish` or `discard` consumes it.
#[async_trait]
pub trait ActiveCapture: Send {
    /// Captured length so far in milliseconds, if the device reports it.
    fn elapsed_ms(&self) -> Option<u64>;

    /// Stops capturing and returns the temp file holding the audio.
    async fn finish(self: Box<Self>) -> Result<PathBuf>;

    /// Stops capturing and throws the audio away.
    async fn discard(self: Box<Self>);
}

/// Records by copying an existing audio file into a temp capture.
pub struct FileRecorder {
    source: PathBuf,
    format: CaptureFormat,
}

impl FileRecorder {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let format = CaptureFormat::from_path(&source);
        Self { source, format }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[async_trait]
impl AudioRecorder for FileRecorder {
    async fn request_permission(&self) -> Result<bool> {
        match fs::metadata(&self.source).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) => {
                warn!("Audio source {:?} is not readable: {}", self.source, e);
                Ok(false)
            }
        }
    }

    async fn start(&self) -> Result<Box<dyn ActiveCapture>> {
        let temp = tempfile::Builder::new()
            .prefix("twi-capture-")
            .suffix(&format!(".{}", self.format.extension))
            .tempfile()
            .map_err(|e| SyncError::io("Failed to create temp capture", e))?;
        let (_, temp_path) = temp
            .keep()
            .map_err(|e| SyncError::io("Failed to keep temp capture", e.error))?;

        if let Err(e) = fs::copy(&self.source, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(SyncError::Recorder(format!(
                "could not read audio source {}: {e}",
                self.source.display()
            )));
        }
        debug!("Started file capture {:?} from {:?}", temp_path, self.source);

        let header_path = temp_path.clone();
        let duration_ms = tokio::task::spawn_blocking(move || wav_duration_ms(&header_path))
            .await
            .unwrap_or_else(|e| {
                warn!("Reading the duration of {:?} did not complete: {}", temp_path, e);
                None
            });

        Ok(Box::new(FileCapture {
            temp_path,
            duration_ms,
        }))
    }

    fn format(&self) -> CaptureFormat {
        self.format.clone()
    }
}

/// Duration is whatever the source file's header says; unknown for formats
/// without a readable header.
struct FileCapture {
    temp_path: PathBuf,
    duration_ms: Option<u64>,
}

#[async_trait]
impl ActiveCapture for FileCapture {
    fn elapsed_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf> {
        Ok(self.temp_path)
    }

    async fn discard(self: Box<Self>) {
        if let Err(e) = fs::remove_file(&self.temp_path).await {
            warn!("Failed to discard capture {:?}: {}", self.temp_path, e);
        }
    }
}

/// Length of a WAV file in milliseconds; `None` for other formats.
pub fn wav_duration_ms(path: &Path) -> Option<u64> {
    let reader = hound::WavReader::open(path).ok()?;
    let sample_rate = u64::from(reader.spec().sample_rate);
    if sample_rate == 0 {
        return None;
    }
    Some(u64::from(reader.duration()) * 1000 / sample_rate)
}
