use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

use super::args::{DeleteCliArgs, RecordCliArgs, RecordingsCliArgs};
use super::{open_app, resolve_participant};
use crate::recording::{FileRecorder, RecorderPhase, RecordingRequest};

/// Stores an existing audio file as the take for one prompt.
pub async fn handle_record_command(args: RecordCliArgs) -> Result<()> {
    if !args.file.is_file() {
        return Err(anyhow!("Audio file not found: {}", args.file.display()));
    }

    let app = open_app().await?;
    let code = resolve_participant(&app, args.participant).await?;
    let participant = app.participant(&code).await;

    let machine = app.recording_machine(Arc::new(FileRecorder::new(&args.file)));
    if machine.initialize().await? != RecorderPhase::Ready {
        return Err(anyhow!("Recorder is not ready"));
    }
    machine.start().await.context("Failed to start capture")?;

    let mut request =
        RecordingRequest::new(&code, &args.prompt, &args.text).with_session(args.session);
    if let Some(participant) = participant {
        request = request.with_participant(participant);
    }

    let saved = match machine.stop_and_persist(&request).await {
        Ok(saved) => saved,
        Err(e) => {
            machine.cancel().await;
            return Err(anyhow!(e).context("Failed to save recording"));
        }
    };

    println!("Saved recording {} for {}", saved.id, saved.prompt_id);
    println!("File: {}", saved.local_uri);
    if let Some(ms) = saved.recording_duration {
        println!("Duration: {:.1}s", ms as f64 / 1000.0);
    }
    Ok(())
}

pub async fn handle_recordings_command(args: RecordingsCliArgs) -> Result<()> {
    let app = open_app().await?;
    let code = if args.all {
        None
    } else {
        Some(resolve_participant(&app, args.participant).await?)
    };
    let recordings = app.recordings(code.as_deref()).await;

    if recordings.is_empty() {
        println!("No recordings found.");
        return Ok(());
    }

    println!("Found {} recording(s):\n", recordings.len());
    for r in recordings {
        let state = if r.uploaded {
            "uploaded"
        } else {
            r.upload_status.as_str()
        };
        let when = chrono::DateTime::from_timestamp_millis(r.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        println!("ID: {}", r.id);
        println!("Participant: {}  Prompt: {}", r.participant_code, r.prompt_id);
        println!("Date: {}  Status: {}", when, state);
        println!("---");
    }
    Ok(())
}

pub async fn handle_delete_command(args: DeleteCliArgs) -> Result<()> {
    let app = open_app().await?;

    if let Some(id) = args.id {
        if app.delete_recording(&id).await {
            println!("Deleted recording {}", id);
        } else {
            println!("Recording {} not found", id);
        }
    } else if let Some(code) = args.participant {
        let result = app
            .remove_participant(code.trim())
            .await
            .ok_or_else(|| anyhow!("Failed to delete participant {}", code.trim()))?;
        println!(
            "Deleted {} recording(s) for {} ({} failed)",
            result.recordings.deleted_count,
            code.trim(),
            result.recordings.failed_count
        );
    } else if args.all_device {
        let summary = app.delete_all_device().await;
        println!(
            "Deleted {} recording(s) from this device ({} failed)",
            summary.deleted_count, summary.failed_count
        );
    }
    Ok(())
}
