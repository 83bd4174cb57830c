use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "twi-recorder")]
#[command(about = "Offline-first prompt recording and upload for speech data collection", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Register, list and switch participants
    Participant(ParticipantCliArgs),
    /// Save an audio file as the recording for a prompt
    Record(RecordCliArgs),
    /// List recordings stored on this device
    Recordings(RecordingsCliArgs),
    /// Delete recordings from this device
    Delete(DeleteCliArgs),
    /// Upload pending recordings for a participant
    Upload(UploadCliArgs),
    /// Compare local recordings against the server
    Refresh(RefreshCliArgs),
    /// Show the current participant and sync state
    Status(StatusCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ParticipantCliArgs {
    #[command(subcommand)]
    pub command: ParticipantCommand,
}

#[derive(Subcommand, Debug)]
pub enum ParticipantCommand {
    /// Register a participant (or update their demographics)
    Add {
        /// Participant code, e.g. TWI_Speaker_001
        code: String,
        #[arg(long)]
        dialect: Option<String>,
        #[arg(long)]
        age_range: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        /// Do not make this the current participant
        #[arg(long)]
        keep_current: bool,
    },
    /// List registered participants
    List,
    /// Show one participant (defaults to the current one)
    Show { code: Option<String> },
    /// Make an existing participant current
    Use { code: String },
    /// Delete a participant and all of their recordings
    Remove { code: String },
}

#[derive(ClapArgs, Debug)]
pub struct RecordCliArgs {
    /// Participant code (defaults to the current participant)
    #[arg(short, long)]
    pub participant: Option<String>,
    /// Prompt identifier, e.g. A_12
    #[arg(long)]
    pub prompt: String,
    /// Prompt text shown to the speaker
    #[arg(long)]
    pub text: String,
    /// Audio file to store as the take
    #[arg(short, long)]
    pub file: PathBuf,
    /// Optional recording session identifier
    #[arg(long)]
    pub session: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct RecordingsCliArgs {
    /// Participant code (defaults to the current participant)
    #[arg(short, long)]
    pub participant: Option<String>,
    /// List recordings for every participant
    #[arg(long, conflicts_with = "participant")]
    pub all: bool,
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
pub struct DeleteCliArgs {
    /// Delete a single recording by id
    #[arg(long)]
    pub id: Option<String>,
    /// Delete a participant and all of their recordings
    #[arg(long)]
    pub participant: Option<String>,
    /// Delete every recording on this device (participants are kept)
    #[arg(long)]
    pub all_device: bool,
}

#[derive(ClapArgs, Debug)]
pub struct UploadCliArgs {
    /// Participant code (defaults to the current participant)
    #[arg(short, long)]
    pub participant: Option<String>,
    /// Re-queue failed uploads before starting
    #[arg(long)]
    pub retry_failed: bool,
    /// Suppress the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct RefreshCliArgs {
    /// Participant code (defaults to the current participant)
    #[arg(short, long)]
    pub participant: Option<String>,
    /// Import server recordings missing on this device
    #[arg(long)]
    pub import: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StatusCliArgs {
    /// Keep printing connectivity changes until interrupted
    #[arg(long)]
    pub watch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_args_parse() {
        let cli = Cli::parse_from([
            "twi-recorder",
            "record",
            "--prompt",
            "A_1",
            "--text",
            "Ete sen?",
            "--file",
            "take.wav",
        ]);
        match cli.command {
            Some(CliCommand::Record(args)) => {
                assert_eq!(args.prompt, "A_1");
                assert_eq!(args.file, PathBuf::from("take.wav"));
                assert!(args.participant.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_delete_requires_exactly_one_target() {
        assert!(Cli::try_parse_from(["twi-recorder", "delete"]).is_err());
        assert!(
            Cli::try_parse_from(["twi-recorder", "delete", "--id", "x", "--all-device"]).is_err()
        );
        assert!(Cli::try_parse_from(["twi-recorder", "delete", "--all-device"]).is_ok());
    }
}
