//! Sync command implementation
//!
//! Builds the run context from the settings file, executes the selected
//! action and turns the outcome into a process exit code.

use crate::cli::Cli;
use crate::config::Settings;
use crate::core::sync::{SyncAction, SyncContext, SyncCoordinator, SyncSummary};
use crate::domain::{DatasetName, SyncError};
use crate::log_error_with_context;

/// Execute the selected action for `dataset`
pub async fn execute(cli: &Cli, settings: &Settings, dataset: DatasetName) -> anyhow::Result<i32> {
    let action = cli.action();
    tracing::info!(dataset = %dataset, action = %action, "Starting sync");

    let ctx = match SyncContext::from_settings(settings, dataset) {
        Ok(ctx) => ctx,
        Err(e) => return Ok(report_failure(&e, "Failed to set up the sync run")),
    };
    let coordinator = SyncCoordinator::new(ctx);

    let purge = cli.purge && !matches!(action, SyncAction::Initialize { .. });
    let mut summary = match coordinator.execute(action).await {
        Ok(summary) => summary,
        Err(e) => return Ok(report_failure(&e, "Sync failed")),
    };

    if purge {
        match coordinator.purge().await {
            Ok(report) => summary.purge = Some(report),
            Err(e) => return Ok(report_failure(&e, "Purge failed")),
        }
    }

    summary.log();
    print_summary(&summary);
    Ok(0)
}

fn report_failure(error: &SyncError, context: &str) -> i32 {
    log_error_with_context!(error, context);
    eprintln!("Error: {error}");
    error.exit_code()
}

fn print_summary(summary: &SyncSummary) {
    println!("{} finished in {:.1}s", summary.action, summary.duration.as_secs_f64());
    if let Some(artifact) = &summary.artifact {
        println!("  artifact:  {} ({} bytes)", artifact.path.display(), artifact.bytes);
    }
    if summary.features_loaded > 0 {
        println!("  loaded:    {} features", summary.features_loaded);
    }
    if let Some(report) = &summary.mirror {
        println!(
            "  applied:   {} inserted, {} updated, {} deleted",
            report.inserted, report.updated, report.deleted
        );
    }
    if summary.has_anomaly() {
        println!("  warning:   row count after reconciliation differs from expected; see log");
    }
    if let Some(watermark) = &summary.watermark {
        println!("  watermark: {watermark}");
    }
    if let Some(purge) = &summary.purge {
        println!("  purged:    {} artifacts", purge.total_removed());
    }
}
