//! Recording lifecycle: capture, persist, delete and play back.

mod cleanup;
mod machine;
mod playback;
mod recorder;

pub use cleanup::{DeleteSummary, ParticipantDeletion, RecordingCleanup};
pub use machine::{
    RecorderPhase, RecorderStatus, RecorderStatusHandle, RecordingMachine, RecordingRequest,
};
pub use playback::{PlaybackSlot, Player, Sound};
pub use recorder::{
    content_type_for_extension, wav_duration_ms, ActiveCapture, AudioRecorder, CaptureFormat,
    FileRecorder, DEFAULT_CONTENT_TYPE,
};

/// `{participant}_{prompt}_{timestampMs}_{8 hex}.{ext}`
pub fn recording_filename(
    participant_code: &str,
    prompt_id: &str,
    timestamp_ms: i64,
    extension: &str,
) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}.{}",
        sanitize(participant_code),
        sanitize(prompt_id),
        timestamp_ms,
        &suffix[..8],
        extension.trim_start_matches('.')
    )
}

fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
