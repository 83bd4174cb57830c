pub mod args;
mod participant;
mod recordings;
mod sync;

pub use args::*;
pub use participant::handle_participant_command;
pub use recordings::{handle_delete_command, handle_record_command, handle_recordings_command};
pub use sync::{handle_refresh_command, handle_status_command, handle_upload_command};

use anyhow::{anyhow, Result};

use crate::app::SyncApp;
use crate::config::Config;
use crate::participant::ensure_valid_code;

async fn open_app() -> Result<SyncApp> {
    let config = Config::load()?;
    SyncApp::open(config).await
}

/// The explicit code if given, otherwise the current participant.
async fn resolve_participant(app: &SyncApp, code: Option<String>) -> Result<String> {
    match code {
        Some(code) => {
            let code = code.trim().to_string();
            ensure_valid_code(&code)?;
            Ok(code)
        }
        None => app
            .current_participant()
            .await
            .map(|p| p.code)
            .ok_or_else(|| {
                anyhow!("No current participant. Use --participant or `twi-recorder participant add <CODE>`")
            }),
    }
}
