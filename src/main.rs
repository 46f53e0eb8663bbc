//! xlsx-utility - batch spreadsheet conversion and protection removal
//!
//! Main entry point for the command line application.
//!
//! # Overview
//!
//! This binary crate provides the shell frontend. It initializes:
//! - Settings ([`SettingsStore`], `settings.yaml` beside the executable)
//! - Logging infrastructure (daily log file + optional console output)
//! - Tokio async runtime (4 worker threads for the batch future and Ctrl-C)
//! - State management ([`StateManager`]) and [`Metrics`]
//! - Shell controller ([`ShellController`] - runs the parsed command)
//!
//! # Execution Flow
//!
//! 1. Parse the command line
//! 2. Load settings (warnings go to stderr until logging is configured)
//! 3. Initialize logging → logs/xlsx-utility.YYYY-MM-DD.log
//! 4. Create tokio runtime with 4 worker threads
//! 5. Run the command through the ShellController
//! 6. Log the metrics summary and shut the runtime down with a 5s timeout

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use xlsx_utility::config::executable_dir;
use xlsx_utility::logging::{self, LOG_DIR_NAME, LOG_FILE_PREFIX};
use xlsx_utility::shell::{Cli, ShellController};
use xlsx_utility::{
    APP_NAME, BatchProcessor, Metrics, NativeLauncher, SettingsStore, StateManager, VERSION,
};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let store = SettingsStore::beside_executable();
    let settings = logging::with_bootstrap_logging(|| store.load());

    let _log_guard = logging::setup_logging(
        &executable_dir().join(LOG_DIR_NAME),
        LOG_FILE_PREFIX,
        settings.show_detailed_logs || cli.verbose,
        settings.log_to_console && !cli.quiet,
    );

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::debug!("Settings loaded from {}", store.path());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("xlsx-utility-worker")
        .build()?;

    tracing::debug!("Tokio runtime initialized with {} worker threads", 4);

    let metrics = Arc::new(Metrics::new());
    let processor = BatchProcessor::new(NativeLauncher::new(), StateManager::new(), metrics.clone());
    let mut controller = ShellController::new(processor, store, settings, runtime.handle().clone());

    let result = controller.execute(cli.command);

    metrics.log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    match result {
        Ok(code) => {
            tracing::info!("Shutdown complete");
            Ok(code)
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            Err(e)
        }
    }
}
