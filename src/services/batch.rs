//! Batch Processor: runs one operation over an ordered list of files through
//! a single [`SpreadsheetSession`].

use crate::engine::{EngineLauncher, SaveMode};
use crate::metrics::Metrics;
use crate::models::settings::DEFAULT_BATCH_SIZE;
use crate::models::{Operation, ProcessingResult, Settings};
use crate::services::session::{SessionError, SpreadsheetSession};
use crate::state::{RunRejected, StateChange, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Per-run knobs, usually derived from [`Settings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Extra attempts for a file that failed with a file error
    pub retry_attempts: u32,

    /// Delete each source file after its output was saved
    pub auto_delete_originals: bool,

    /// Broadcast a checkpoint every this many files (0 disables)
    pub checkpoint_interval: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            auto_delete_originals: false,
            checkpoint_interval: DEFAULT_BATCH_SIZE as usize,
        }
    }
}

impl BatchOptions {
    /// Options from settings; the retry count only applies when `use_retries` is set
    pub fn from_settings(settings: &Settings, use_retries: bool) -> Self {
        Self {
            retry_attempts: if use_retries {
                settings.retry_attempts
            } else {
                0
            },
            auto_delete_originals: settings.auto_delete_originals,
            checkpoint_interval: settings.batch_size as usize,
        }
    }
}

/// Everything a finished (or cancelled) run produced
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub operation: Operation,
    /// One result per attempted file, in input order
    pub results: Vec<ProcessingResult>,
    /// Files requested
    pub total: usize,
    /// Whether the run stopped early on request
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// Files never attempted because the run was cancelled
    pub fn skipped(&self) -> usize {
        self.total.saturating_sub(self.results.len())
    }

    pub fn has_authentication_failures(&self) -> bool {
        self.results.iter().any(|r| r.is_authentication_failure())
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.failed() == 0
    }
}

/// Errors that stop a run before any file is attempted
#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    AlreadyRunning(#[from] RunRejected),

    #[error("spreadsheet engine is unavailable: {0}")]
    EngineUnavailable(String),
}

/// Runs convert and unlock batches
pub struct BatchProcessor<L: EngineLauncher> {
    launcher: L,
    state: StateManager,
    metrics: Arc<Metrics>,
}

impl<L: EngineLauncher> BatchProcessor<L> {
    pub fn new(launcher: L, state: StateManager, metrics: Arc<Metrics>) -> Self {
        Self {
            launcher,
            state,
            metrics,
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Convert every file to `<output_dir>/<stem>.xlsx`
    pub async fn run_conversion(
        &self,
        paths: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        self.run(Operation::Convert, paths, output_dir, None, options)
            .await
    }

    /// Open every file with `password`, remove its protection and save an
    /// unprotected copy to `<output_dir>/<stem>.xlsx`
    pub async fn run_unlock(
        &self,
        paths: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        password: &str,
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        self.run(Operation::Unlock, paths, output_dir, Some(password), options)
            .await
    }

    async fn run(
        &self,
        operation: Operation,
        paths: &[Utf8PathBuf],
        output_dir: &Utf8Path,
        password: Option<&str>,
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        let changes = self.state.try_begin_run(operation, paths.len()).map_err(|e| {
            tracing::warn!("Rejected {} request: {}", operation, e);
            e
        })?;
        self.record_broadcasts(&changes);
        let mut guard = RunGuard::new(&self.state, &self.metrics);

        let started = Instant::now();
        tracing::info!(
            "Starting {} of {} file(s) into {}",
            operation,
            paths.len(),
            output_dir
        );

        let mut session = SpreadsheetSession::new();
        if !session.initialize(&self.launcher) {
            let reason = session
                .unavailable_reason()
                .unwrap_or("unknown reason")
                .to_string();
            tracing::error!("Aborting {}: spreadsheet engine is unavailable", operation);
            return Err(BatchError::EngineUnavailable(reason));
        }

        let outputs: Vec<Utf8PathBuf> = paths.iter().map(|p| output_path(p, output_dir)).collect();
        warn_on_collisions(paths, &outputs);

        let mut results = Vec::with_capacity(paths.len());
        let mut cancelled = false;

        for (source, output) in paths.iter().zip(&outputs) {
            if self.state.is_cancel_requested() {
                tracing::warn!(
                    "{} cancelled after {} of {} file(s)",
                    operation,
                    results.len(),
                    paths.len()
                );
                cancelled = true;
                break;
            }

            let changes = self.state.begin_file(source);
            self.record_broadcasts(&changes);
            tracing::info!("{} {}", operation.verb(), source);

            let result = self.process_with_retries(&mut session, operation, source, output, password, options);

            if result.success {
                self.metrics.record_file_succeeded(operation);
                if options.auto_delete_originals {
                    delete_original(source, output);
                }
            } else {
                self.metrics.record_file_failed();
            }
            self.metrics.record_processing_time(result.elapsed);

            let changes = self.state.record_file(&result);
            self.record_broadcasts(&changes);
            results.push(result);

            if options.checkpoint_interval > 0
                && results.len() % options.checkpoint_interval == 0
                && results.len() < paths.len()
            {
                let checkpoint = self.state.checkpoint();
                self.record_broadcasts(std::slice::from_ref(&checkpoint));
                self.metrics.log_periodic();
            }

            // Let the progress printer and Ctrl-C handler run between files
            tokio::task::yield_now().await;
        }

        session.dispose();

        let report = BatchReport {
            operation,
            total: paths.len(),
            cancelled,
            elapsed: started.elapsed(),
            results,
        };
        guard.finish(cancelled);

        log_outcome(&report);
        Ok(report)
    }

    fn process_with_retries(
        &self,
        session: &mut SpreadsheetSession,
        operation: Operation,
        source: &Utf8Path,
        output: &Utf8Path,
        password: Option<&str>,
        options: &BatchOptions,
    ) -> ProcessingResult {
        let started = Instant::now();
        let max_attempts = options.retry_attempts.saturating_add(1);
        let mut attempt = 1;

        loop {
            match process_file(session, operation, source, output, password) {
                Ok(()) => {
                    crate::success!("{} -> {}", source, output);
                    return ProcessingResult::succeeded(source, output, started.elapsed(), attempt);
                }
                Err(e) => {
                    let category = e.category();
                    if category.is_retryable() && attempt < max_attempts {
                        tracing::warn!(
                            file = %source,
                            attempt = attempt,
                            "Attempt failed, retrying: {}",
                            e
                        );
                        self.metrics.record_retry();
                        attempt += 1;
                        continue;
                    }

                    tracing::error!("Failed to process {} ({} error): {}", source, category, e);
                    return ProcessingResult::failed(
                        source,
                        e.to_string(),
                        category,
                        started.elapsed(),
                        attempt,
                    );
                }
            }
        }
    }

    fn record_broadcasts(&self, changes: &[StateChange]) {
        self.metrics.record_state_broadcasts(changes.len());
    }
}

/// One file: open, (unlock), save, and always close
fn process_file(
    session: &mut SpreadsheetSession,
    operation: Operation,
    source: &Utf8Path,
    output: &Utf8Path,
    password: Option<&str>,
) -> Result<(), SessionError> {
    let outcome = open_and_save(session, operation, source, output, password);
    session.close_document();
    outcome
}

fn open_and_save(
    session: &mut SpreadsheetSession,
    operation: Operation,
    source: &Utf8Path,
    output: &Utf8Path,
    password: Option<&str>,
) -> Result<(), SessionError> {
    match operation {
        Operation::Convert => {
            session.open_document(source, None)?;
            session.save_as(output, SaveMode::PlainConversion)
        }
        Operation::Unlock => {
            let password = password.unwrap_or_default();
            let info = session.open_document(source, Some(password))?;
            if !info.is_protected() {
                tracing::debug!("{} has no structure, window or sheet protection", source);
            }

            let report = session.remove_protection(password)?;
            if !report.is_complete() {
                tracing::warn!(
                    "{} still has {} protection(s) that could not be removed",
                    source,
                    report.rejected.len()
                );
            }
            session.save_as(output, SaveMode::Unprotected)
        }
    }
}

/// `<output_dir>/<stem>.xlsx`
pub fn output_path(source: &Utf8Path, output_dir: &Utf8Path) -> Utf8PathBuf {
    let stem = source
        .file_stem()
        .or_else(|| source.file_name())
        .unwrap_or("output");
    output_dir.join(format!("{stem}.xlsx"))
}

fn warn_on_collisions(sources: &[Utf8PathBuf], outputs: &[Utf8PathBuf]) {
    let mut seen: HashMap<String, &Utf8PathBuf> = HashMap::new();
    for (index, (source, output)) in sources.iter().zip(outputs).enumerate() {
        let key = output_key(output);
        if let Some(first) = seen.get(&key) {
            tracing::warn!(
                "{} and {} both write {}; the later file overwrites the earlier one",
                first,
                source,
                output
            );
        } else {
            seen.insert(key, source);
        }

        for later in &sources[index + 1..] {
            if is_same_file(output, later) {
                tracing::warn!(
                    "Saving {} replaces {} before it is processed",
                    output,
                    later
                );
            }
        }
    }
}

/// Collision key of an output path: its folder resolved on disk, its name case-folded
fn output_key(output: &Utf8Path) -> String {
    let folder = output
        .parent()
        .and_then(|parent| parent.canonicalize().ok())
        .map(|parent| parent.to_string_lossy().into_owned())
        .unwrap_or_else(|| output.parent().map(|p| p.to_string()).unwrap_or_default());
    format!(
        "{}/{}",
        folder.to_lowercase(),
        output.file_name().unwrap_or_default().to_lowercase()
    )
}

/// Whether two paths name the same file on disk (`..`, symlinks, case-insensitive names)
fn is_same_file(a: &Utf8Path, b: &Utf8Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn delete_original(source: &Utf8Path, output: &Utf8Path) {
    if is_same_file(source, output) {
        tracing::debug!("Keeping {}: it is also the output file", source);
        return;
    }
    if !output.is_file() {
        tracing::warn!("Keeping {}: output {} was not found", source, output);
        return;
    }
    match fs::remove_file(source) {
        Ok(()) => tracing::info!("Deleted original {}", source),
        Err(e) => tracing::warn!("Could not delete original {}: {}", source, e),
    }
}

fn log_outcome(report: &BatchReport) {
    let summary = format!(
        "{} finished: {} succeeded, {} failed{} in {:.1}s",
        report.operation,
        report.succeeded(),
        report.failed(),
        if report.cancelled {
            format!(", {} skipped (cancelled)", report.skipped())
        } else {
            String::new()
        },
        report.elapsed.as_secs_f64()
    );
    if report.failed() == 0 && !report.cancelled {
        crate::success!("{}", summary);
    } else {
        tracing::warn!("{}", summary);
    }
}

/// Returns the run state to idle on every exit path of a run
struct RunGuard<'a> {
    state: &'a StateManager,
    metrics: &'a Metrics,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    fn new(state: &'a StateManager, metrics: &'a Metrics) -> Self {
        Self {
            state,
            metrics,
            finished: false,
        }
    }

    fn finish(&mut self, cancelled: bool) {
        if !self.finished {
            self.finished = true;
            let changes = self.state.finish_run(cancelled);
            self.metrics.record_state_broadcasts(changes.len());
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.finish(false);
    }
}
