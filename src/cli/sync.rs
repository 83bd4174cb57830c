use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::args::{RefreshCliArgs, StatusCliArgs, UploadCliArgs};
use super::{open_app, resolve_participant};
use crate::sync::{RefreshOutcome, UploadOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn handle_upload_command(args: UploadCliArgs) -> Result<()> {
    let app = open_app().await?;
    let code = resolve_participant(&app, args.participant).await?;

    if args.retry_failed {
        let reset = app.retry_failed(&code).await;
        if reset > 0 {
            println!("Re-queued {} failed upload(s)", reset);
        }
    }

    let progress_bar = if args.no_progress {
        None
    } else {
        let pb = create_progress_bar();
        pb.set_message(format!("Uploading recordings for {}", code));
        Some(pb)
    };

    let status = app.upload_status();
    let cancel = CancellationToken::new();
    let (pb, status, stopping) = (&progress_bar, &status, &cancel);
    let result = drive_until_interrupted(
        app.upload(&code, &cancel),
        tokio::signal::ctrl_c(),
        &cancel,
        move || {
            async move {
                let Some(pb) = pb else {
                    return;
                };
                if stopping.is_cancelled() {
                    pb.set_message("Stopping after the current recording...");
                }
                let board = status.get().await;
                if board.total > 0 {
                    pb.set_length(board.total as u64);
                    pb.set_position(board.current as u64);
                }
            }
        },
    )
    .await;

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    match result? {
        UploadOutcome::NothingToUpload => println!("Nothing to upload for {}", code),
        UploadOutcome::Completed(summary) => println!(
            "Upload finished: {} succeeded, {} failed",
            summary.success_count, summary.fail_count
        ),
        UploadOutcome::Cancelled(summary) => println!(
            "Upload cancelled: {} succeeded, {} failed before stopping",
            summary.success_count, summary.fail_count
        ),
    }

    if let Some(participant) = app.participant(&code).await {
        if let Some(progress) = participant.progress {
            println!(
                "Progress: {}/{} recordings",
                progress.total_recordings, progress.total_required
            );
        }
    }
    Ok(())
}

pub async fn handle_refresh_command(args: RefreshCliArgs) -> Result<()> {
    let app = open_app().await?;
    let code = resolve_participant(&app, args.participant).await?;

    let Some(outcome) = app.refresh(&code).await else {
        println!("Could not reach the server; showing local data only.");
        return Ok(());
    };

    let (plan, progress) = match outcome {
        RefreshOutcome::UnknownToServer => {
            println!("The server has no recordings for {} yet.", code);
            return Ok(());
        }
        RefreshOutcome::Refreshed {
            plan,
            profile_updated,
            progress,
        } => {
            if profile_updated {
                println!("Updated profile details for {} from the server", code);
            }
            (plan, progress)
        }
    };

    println!(
        "Progress: {}/{}{}",
        progress.total_recordings,
        progress.total_required,
        if progress.is_complete { " (complete)" } else { "" }
    );

    if plan.missing_count() == 0 {
        println!("This device has every recording the server knows about.");
        return Ok(());
    }

    println!(
        "{} recording(s) on the server are not on this device:",
        plan.missing_count()
    );
    for r in &plan.missing {
        println!("  {}  {}", r.prompt_id, r.file_url);
    }

    if !args.import {
        println!("\nTo import them, run: twi-recorder refresh --import");
        return Ok(());
    }

    match app.import(&plan).await {
        Some(report) => println!(
            "Imported {} recording(s) ({} already present, {} failed)",
            report.imported, report.skipped, report.failed
        ),
        None => println!("Import failed; see logs for details."),
    }
    Ok(())
}

pub async fn handle_status_command(args: StatusCliArgs) -> Result<()> {
    let app = open_app().await?;
    let report = app.status().await;

    match &report.current {
        Some(p) => println!("Participant: {}", p.code),
        None => println!("Participant: none selected"),
    }
    println!("Server:      {}", if report.online { "online" } else { "offline" });
    if report.current.is_some() {
        println!(
            "Recordings:  {} uploaded, {} pending, {} failed",
            report.uploaded, report.pending, report.failed
        );
    }
    if let Some(progress) = report.local_progress {
        println!(
            "On device:   {}/{}{}",
            progress.total_recordings,
            progress.total_required,
            if progress.is_complete { " (complete)" } else { "" }
        );
    }

    if !args.watch {
        return Ok(());
    }

    println!("\nWatching connectivity (Ctrl+C to stop)...");
    let monitor = app.spawn_connectivity_monitor();
    let mut changes = monitor.subscribe();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *changes.borrow_and_update();
                println!("Server is now {}", if online { "online" } else { "offline" });
            }
        }
    }
    monitor.shutdown().await;
    Ok(())
}

/// Polls `work` to completion, running `tick` between polls. The first time
/// `interrupt` resolves, `cancel` is triggered and `work` is left to wind down.
async fn drive_until_interrupted<W, I, T, F, Fut>(
    work: W,
    interrupt: I,
    cancel: &CancellationToken,
    mut tick: F,
) -> T
where
    W: Future<Output = T>,
    I: Future,
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::pin!(work, interrupt);
    loop {
        tokio::select! {
            result = &mut work => return result,
            _ = &mut interrupt, if !cancel.is_cancelled() => cancel.cancel(),
            _ = tokio::time::sleep(POLL_INTERVAL) => tick().await,
        }
    }
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("━╸━"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
