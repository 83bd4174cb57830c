use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use twi_recorder::cli::{
    handle_delete_command, handle_participant_command, handle_record_command,
    handle_recordings_command, handle_refresh_command, handle_status_command,
    handle_upload_command, Cli, CliCommand, StatusCliArgs,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("twi-recorder {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Participant(args)) => handle_participant_command(args).await,
        Some(CliCommand::Record(args)) => handle_record_command(args).await,
        Some(CliCommand::Recordings(args)) => handle_recordings_command(args).await,
        Some(CliCommand::Delete(args)) => handle_delete_command(args).await,
        Some(CliCommand::Upload(args)) => handle_upload_command(args).await,
        Some(CliCommand::Refresh(args)) => handle_refresh_command(args).await,
        Some(CliCommand::Status(args)) => handle_status_command(args).await,
        None => handle_status_command(StatusCliArgs { watch: false }).await,
    }
}
