use anyhow::{anyhow, Result};

use super::args::{ParticipantCliArgs, ParticipantCommand};
use super::open_app;
use crate::participant::ParticipantDetails;

pub async fn handle_participant_command(args: ParticipantCliArgs) -> Result<()> {
    let app = open_app().await?;

    match args.command {
        ParticipantCommand::Add {
            code,
            dialect,
            age_range,
            gender,
            keep_current,
        } => {
            let mut details = ParticipantDetails::new(code);
            if let Some(existing) = app.participant(&details.code).await {
                details.progress = existing.progress;
            }
            let details = details.with_demographics(dialect, age_range, gender);
            if !app.save_participant(&details, !keep_current).await? {
                return Err(anyhow!("Failed to save participant {}", details.code));
            }
            println!("Saved participant {}", details.code);
            if !keep_current {
                println!("{} is now the current participant", details.code);
            }
        }
        ParticipantCommand::List => {
            let participants = app.participants().await;
            if participants.is_empty() {
                println!("No participants registered on this device.");
                return Ok(());
            }
            let current = app.current_participant().await.map(|p| p.code);
            for p in participants {
                let marker = if current.as_deref() == Some(p.code.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}  {}", marker, p.code, progress_line(&p));
            }
        }
        ParticipantCommand::Show { code } => {
            let details = match code {
                Some(code) => app.participant(code.trim()).await,
                None => app.current_participant().await,
            };
            let Some(details) = details else {
                return Err(anyhow!("Participant not found"));
            };
            println!("Code:      {}", details.code);
            println!("Dialect:   {}", details.dialect.as_deref().unwrap_or("-"));
            println!("Age range: {}", details.age_range.as_deref().unwrap_or("-"));
            println!("Gender:    {}", details.gender.as_deref().unwrap_or("-"));
            println!("Progress:  {}", progress_line(&details));
        }
        ParticipantCommand::Use { code } => {
            if !app.switch_participant(code.trim()).await {
                return Err(anyhow!(
                    "Participant {} is not registered on this device",
                    code.trim()
                ));
            }
            println!("{} is now the current participant", code.trim());
        }
        ParticipantCommand::Remove { code } => {
            let Some(result) = app.remove_participant(code.trim()).await else {
                return Err(anyhow!("Failed to delete participant {}", code.trim()));
            };
            println!(
                "Deleted {} recording(s) for {} ({} failed)",
                result.recordings.deleted_count,
                code.trim(),
                result.recordings.failed_count
            );
        }
    }

    Ok(())
}

fn progress_line(details: &ParticipantDetails) -> String {
    match &details.progress {
        Some(p) if p.is_complete => format!("{}/{} complete", p.total_recordings, p.total_required),
        Some(p) => format!(
            "{}/{} ({} remaining)",
            p.total_recordings,
            p.total_required,
            p.remaining()
        ),
        None => "no progress yet".to_string(),
    }
}
