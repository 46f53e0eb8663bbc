// Shell Controller - Bridges the command line with the batch workflow
//
// This module contains the ShellController which coordinates between:
// - clap commands (Cli / Command)
// - SettingsStore (remembered folders, defaults)
// - BatchProcessor (business logic)
// - StateManager (progress events, cancellation)
//
// It handles:
// - Resolving files, output folder and password (arguments, settings, pickers, prompt)
// - Subscribing to state changes → progress lines
// - Ctrl-C → cooperative cancellation
// - The end-of-run summary, bell and remembered folders

use crate::config::SettingsStore;
use crate::engine::EngineLauncher;
use crate::models::{Operation, Settings};
use crate::services::{BatchError, BatchOptions, BatchProcessor, BatchReport, ErrorCategory};
use crate::shell::args::{Command, RunArgs, SettingsAction};
use crate::shell::dialogs;
use crate::state::StateChange;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::process::ExitCode;
use std::thread::JoinHandle;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

/// Exit status when at least one file failed
pub const EXIT_FILES_FAILED: u8 = 1;

/// Exit status when the engine could not be started
pub const EXIT_ENGINE_UNAVAILABLE: u8 = 2;

/// Exit status of a run stopped with Ctrl-C
pub const EXIT_CANCELLED: u8 = 130;

/// Shell controller that runs one command against the batch workflow
///
/// Owns the loaded settings for the lifetime of the command. The batch
/// future is driven with `block_on` on the tokio runtime, while progress is
/// printed from a std thread subscribed to
/// [`StateManager`](crate::state::StateManager) events.
///
/// # Example
/// ```ignore
/// let processor = BatchProcessor::new(NativeLauncher::new(), state, metrics);
/// let mut controller = ShellController::new(processor, store, settings, runtime.handle().clone());
/// let code = controller.execute(cli.command)?;
/// ```
pub struct ShellController<L: EngineLauncher> {
    processor: BatchProcessor<L>,
    store: SettingsStore,
    settings: Settings,
    runtime: Handle,
}

impl<L: EngineLauncher> ShellController<L> {
    pub fn new(
        processor: BatchProcessor<L>,
        store: SettingsStore,
        settings: Settings,
        runtime: Handle,
    ) -> Self {
        Self {
            processor,
            store,
            settings,
            runtime,
        }
    }

    /// Settings as currently held (including remembered folders of a finished run)
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one parsed command
    pub fn execute(&mut self, command: Command) -> Result<ExitCode> {
        match command {
            Command::Convert(args) => self.run_batch(&args, None),
            Command::Unlock(args) => {
                let password = match args.password {
                    Some(password) if password.is_empty() => {
                        bail!("A password is required to unlock files")
                    }
                    Some(password) => password,
                    None => dialogs::prompt_password()?,
                };
                self.run_batch(&args.run, Some(password))
            }
            Command::Settings { action } => self.settings_command(action),
        }
    }

    /// Convert, or unlock when a password is given
    fn run_batch(&mut self, args: &RunArgs, password: Option<String>) -> Result<ExitCode> {
        let Some(files) = self.resolve_files(args)? else {
            println!("No files selected, nothing to do.");
            return Ok(ExitCode::SUCCESS);
        };
        if files.is_empty() {
            println!("No files selected, nothing to do.");
            return Ok(ExitCode::SUCCESS);
        }

        check_file_count(self.settings.expected_file_count, files.len(), args.force)?;

        let output_dir = self.resolve_output_dir(args.output.as_deref())?;

        let mut options = BatchOptions::from_settings(&self.settings, args.retry);
        if args.delete_originals {
            options.auto_delete_originals = true;
        }
        tracing::debug!("Batch options: {:?}", options);

        let state = self.processor.state().clone();
        let printer = spawn_progress_printer(state.subscribe());
        let ctrl_c = {
            let state = state.clone();
            self.runtime.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() && state.request_cancel() {
                    tracing::warn!("Ctrl-C received, stopping after the current file");
                }
            })
        };

        let processor = &self.processor;
        let outcome = self.runtime.block_on(async {
            match password.as_deref() {
                Some(password) => {
                    processor
                        .run_unlock(&files, &output_dir, password, &options)
                        .await
                }
                None => {
                    processor
                        .run_conversion(&files, &output_dir, &options)
                        .await
                }
            }
        });
        ctrl_c.abort();

        let report = match outcome {
            Ok(report) => {
                join_printer(printer);
                report
            }
            Err(BatchError::EngineUnavailable(reason)) => {
                join_printer(printer);
                eprintln!("The spreadsheet engine is unavailable: {reason}");
                eprintln!("{}", ErrorCategory::Environment.guidance());
                return Ok(ExitCode::from(EXIT_ENGINE_UNAVAILABLE));
            }
            // No run started, so no RunFinished will reach the printer
            Err(e @ BatchError::AlreadyRunning(_)) => {
                return Err(e).context("Could not start the run");
            }
        };

        print!("{}", render_summary(&report, args.details));
        if self.settings.sound_notifications {
            ring_bell();
        }
        if self.settings.remember_paths {
            self.remember_folders(&files, &output_dir);
        }

        Ok(exit_code(&report))
    }

    /// Files from the command line, or from the picker when `--pick` is set or none are given
    fn resolve_files(&self, args: &RunArgs) -> Result<Option<Vec<Utf8PathBuf>>> {
        let files = if args.pick || args.files.is_empty() {
            let start = non_empty_path(&self.settings.default_input_path);
            match dialogs::pick_input_files("Select files to process", start) {
                Some(files) => files,
                None => return Ok(None),
            }
        } else {
            args.files.clone()
        };

        files
            .iter()
            .map(|file| dialogs::absolutize(file))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// `-o`, then the saved output folder, then the folder picker
    fn resolve_output_dir(&self, explicit: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
        if let Some(dir) = configured_output_dir(explicit, &self.settings) {
            return dialogs::absolutize(&dir);
        }

        match dialogs::pick_output_folder("Select the output folder", None) {
            Some(dir) => Ok(dir),
            None => bail!("No output folder selected; pass -o DIR or set default_output_path"),
        }
    }

    fn remember_folders(&mut self, files: &[Utf8PathBuf], output_dir: &Utf8Path) {
        let mut updated = self.settings.clone();
        if let Some(parent) = files.first().and_then(|file| file.parent()) {
            updated.default_input_path = parent.to_string();
        }
        updated.default_output_path = output_dir.to_string();

        if updated != self.settings {
            if self.store.save(&updated) {
                tracing::debug!("Remembered folders {} and {}", updated.default_input_path, output_dir);
            }
            self.settings = updated;
        }
    }

    fn settings_command(&mut self, action: SettingsAction) -> Result<ExitCode> {
        match action {
            SettingsAction::Show => {
                let yaml = serde_yaml_ng::to_string(&self.settings)
                    .context("Failed to serialize settings to YAML")?;
                print!("{yaml}");
            }
            SettingsAction::Path => println!("{}", self.store.path()),
            SettingsAction::Reset => {
                if !self.store.reset() {
                    bail!("Could not remove {}", self.store.path());
                }
                self.settings = Settings::default();
                println!("Settings reset to defaults");
            }
            SettingsAction::Set { key, value } => {
                let mut updated = self.settings.clone();
                updated
                    .set_field(&key, &value)
                    .with_context(|| format!("Valid keys: {}", Settings::KEYS.join(", ")))?;
                for field in updated.validate() {
                    tracing::warn!("Setting {} was out of range and has been reset", field);
                }
                if !self.store.save(&updated) {
                    bail!("Could not save settings to {}", self.store.path());
                }
                self.settings = updated;
                println!("{key} updated");
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Reject a run whose file count differs from the expected one, unless forced
pub fn check_file_count(expected: Option<u32>, actual: usize, force: bool) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    if expected as usize == actual {
        return Ok(());
    }
    if force {
        tracing::warn!(
            "Expected {} file(s) but {} were selected; continuing because of --force",
            expected,
            actual
        );
        return Ok(());
    }
    bail!(
        "Expected {} file(s) but {} were selected; pass --force to run anyway",
        expected,
        actual
    )
}

/// Output folder from the command line or the saved default, if either is set
pub fn configured_output_dir(explicit: Option<&Utf8Path>, settings: &Settings) -> Option<Utf8PathBuf> {
    explicit
        .map(Utf8Path::to_path_buf)
        .or_else(|| non_empty_path(&settings.default_output_path).map(Utf8Path::to_path_buf))
}

fn non_empty_path(path: &str) -> Option<&Utf8Path> {
    let trimmed = path.trim();
    (!trimmed.is_empty()).then(|| Utf8Path::new(trimmed))
}

/// Text printed after a run
pub fn render_summary(report: &BatchReport, details: bool) -> String {
    let mut out = String::new();
    let title = match report.operation {
        Operation::Convert => "Conversion",
        Operation::Unlock => "Unlock",
    };

    let _ = writeln!(
        out,
        "{} finished: {} succeeded, {} failed ({:.1}s)",
        title,
        report.succeeded(),
        report.failed(),
        report.elapsed.as_secs_f64()
    );
    if report.cancelled {
        let _ = writeln!(out, "Cancelled: {} file(s) not attempted", report.skipped());
    }

    if report.failed() > 0 {
        if details {
            let _ = writeln!(out, "Failed files:");
            for result in report.results.iter().filter(|r| !r.success) {
                let _ = writeln!(out, "  {}: {}", result.file_name(), result.error);
            }
        } else {
            let _ = writeln!(out, "Run with --details to list the errors, or see the log file.");
        }
    }

    if report.has_authentication_failures() {
        let _ = writeln!(out, "{}", ErrorCategory::Authentication.guidance());
    }

    out
}

/// Process exit status for a finished run
pub fn exit_code(report: &BatchReport) -> ExitCode {
    if report.failed() > 0 {
        ExitCode::from(EXIT_FILES_FAILED)
    } else if report.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    }
}

fn ring_bell() {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}

/// Print progress lines until the run finishes or the channel closes
fn spawn_progress_printer(mut rx: broadcast::Receiver<StateChange>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        tracing::debug!("Progress printer started");
        let mut operation = Operation::Convert;

        loop {
            match rx.blocking_recv() {
                Ok(change) => {
                    if let Some(line) = progress_line(&mut operation, &change) {
                        println!("{line}");
                    }
                    if matches!(change, StateChange::RunFinished { .. }) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("State channel closed - stopping progress printer");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Progress printer lagged - {} events were skipped", skipped);
                }
            }
        }
    })
}

fn join_printer(printer: JoinHandle<()>) {
    if printer.join().is_err() {
        tracing::error!("Progress printer panicked");
    }
}

/// Console line for one state event, if it has one
fn progress_line(operation: &mut Operation, change: &StateChange) -> Option<String> {
    match change {
        StateChange::RunStarted {
            operation: started,
            total,
        } => {
            *operation = *started;
            Some(format!("Starting {} of {} file(s)", started, total))
        }
        StateChange::FileStarted {
            position,
            total,
            file,
        } => Some(format!(
            "[{}/{}] {} {}",
            position,
            total,
            operation.verb(),
            file.file_name().unwrap_or(file.as_str())
        )),
        StateChange::FileProcessed {
            success: true,
            message,
            ..
        } => Some(format!("  saved {}", message)),
        StateChange::FileProcessed {
            success: false,
            message,
            ..
        } => Some(format!("  failed: {}", message)),
        StateChange::CancellationRequested => {
            Some("Cancelling after the current file...".to_string())
        }
        StateChange::Checkpoint {
            completed,
            total,
            percent,
        } => Some(format!(
            "{} of {} file(s) done ({}%)",
            completed, total, percent
        )),
        StateChange::ProgressUpdated { .. } | StateChange::RunFinished { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingResult;
    use crate::state::StateManager;
    use std::time::Duration;

    fn report(results: Vec<ProcessingResult>, total: usize, cancelled: bool) -> BatchReport {
        BatchReport {
            operation: Operation::Unlock,
            results,
            total,
            cancelled,
            elapsed: Duration::from_millis(1500),
        }
    }

    fn auth_failure(file: &str) -> ProcessingResult {
        ProcessingResult::failed(
            file,
            format!("the password is not correct for {file}"),
            ErrorCategory::Authentication,
            Duration::ZERO,
            1,
        )
    }

    #[test]
    fn test_check_file_count() {
        assert!(check_file_count(None, 3, false).is_ok());
        assert!(check_file_count(Some(3), 3, false).is_ok());
        assert!(check_file_count(Some(9), 3, false).is_err());
        assert!(check_file_count(Some(9), 3, true).is_ok());
    }

    #[test]
    fn test_configured_output_dir_prefers_argument() {
        let settings = Settings {
            default_output_path: "/saved".to_string(),
            ..Settings::default()
        };

        assert_eq!(
            configured_output_dir(Some(Utf8Path::new("/explicit")), &settings),
            Some(Utf8PathBuf::from("/explicit"))
        );
        assert_eq!(
            configured_output_dir(None, &settings),
            Some(Utf8PathBuf::from("/saved"))
        );
        assert_eq!(configured_output_dir(None, &Settings::default()), None);
    }

    #[test]
    fn test_summary_counts_and_guidance() {
        let report = report(
            vec![
                ProcessingResult::succeeded("/in/A.xlsx", "/out/A.xlsx", Duration::ZERO, 1),
                auth_failure("/in/B.xlsx"),
            ],
            2,
            false,
        );

        let summary = render_summary(&report, false);

        assert!(summary.starts_with("Unlock finished: 1 succeeded, 1 failed (1.5s)"));
        assert!(summary.contains("--details"));
        assert!(!summary.contains("B.xlsx:"));
        assert!(summary.contains("Re-enter the password"));
    }

    #[test]
    fn test_summary_details_list_errors() {
        let report = report(vec![auth_failure("/in/B.xlsx")], 3, true);

        let summary = render_summary(&report, true);

        assert!(summary.contains("Cancelled: 2 file(s) not attempted"));
        assert!(summary.contains("  B.xlsx: the password is not correct for /in/B.xlsx"));
    }

    #[test]
    fn test_summary_without_failures_has_no_hints() {
        let report = report(
            vec![ProcessingResult::succeeded("/in/A.csv", "/out/A.xlsx", Duration::ZERO, 1)],
            1,
            false,
        );

        let summary = render_summary(&report, true);

        assert_eq!(summary.lines().count(), 1);
        assert_eq!(exit_code(&report), ExitCode::SUCCESS);
    }

    #[test]
    fn test_exit_codes() {
        let failed = report(vec![auth_failure("/in/B.xlsx")], 1, false);
        assert_eq!(exit_code(&failed), ExitCode::from(EXIT_FILES_FAILED));

        let cancelled = report(Vec::new(), 2, true);
        assert_eq!(exit_code(&cancelled), ExitCode::from(EXIT_CANCELLED));
    }

    #[test]
    fn test_progress_lines() {
        let mut operation = Operation::Convert;

        let started = progress_line(
            &mut operation,
            &StateChange::RunStarted {
                operation: Operation::Unlock,
                total: 2,
            },
        );
        assert_eq!(started.as_deref(), Some("Starting unlock of 2 file(s)"));
        assert_eq!(operation, Operation::Unlock);

        let file = progress_line(
            &mut operation,
            &StateChange::FileStarted {
                position: 1,
                total: 2,
                file: Utf8PathBuf::from("/in/Budget.xlsx"),
            },
        );
        assert_eq!(file.as_deref(), Some("[1/2] Unlocking Budget.xlsx"));

        let checkpoint = progress_line(
            &mut operation,
            &StateChange::Checkpoint {
                completed: 2,
                total: 5,
                percent: 40,
            },
        );
        assert_eq!(checkpoint.as_deref(), Some("2 of 5 file(s) done (40%)"));

        assert!(
            progress_line(
                &mut operation,
                &StateChange::ProgressUpdated {
                    completed: 1,
                    total: 2,
                    current_file: None,
                },
            )
            .is_none()
        );
    }

    #[test]
    fn test_printer_stops_on_run_finished() {
        let state = StateManager::new();
        let printer = spawn_progress_printer(state.subscribe());

        state.try_begin_run(Operation::Convert, 1).unwrap();
        state.finish_run(false);

        join_printer(printer);
    }
}
