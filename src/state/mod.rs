// State management module
//
// This module provides the StateManager which wraps RunState with thread-safe access
// using Arc<RwLock<T>> and emits change events for progress display.

use crate::models::{Operation, ProcessingResult, RunState};
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Buffer size of the change event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Change events emitted when run state is modified
///
/// These events are emitted to notify interested parties (primarily the
/// shell's progress printer) about state changes without requiring them to
/// poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A batch run has started
    RunStarted { operation: Operation, total: usize },

    /// A file is about to be processed
    FileStarted {
        /// One-based position in the batch
        position: usize,
        total: usize,
        file: Utf8PathBuf,
    },

    /// A file has been processed
    FileProcessed {
        file: Utf8PathBuf,
        success: bool,
        message: String,
    },

    /// Progress counters have changed
    ProgressUpdated {
        completed: usize,
        total: usize,
        current_file: Option<Utf8PathBuf>,
    },

    /// Cancellation was requested; the run stops before the next file
    CancellationRequested,

    /// `completed` files are done; emitted every checkpoint interval
    Checkpoint {
        completed: usize,
        total: usize,
        /// Completion in the 0-100 range
        percent: u8,
    },

    /// The run has ended and the state is back to idle
    RunFinished {
        operation: Option<Operation>,
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// A run was requested while another one is active
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("a {active} run is already in progress")]
pub struct RunRejected {
    pub active: Operation,
}

/// Thread-safe run state manager with event emission
///
/// This is the single place that knows whether a run is active:
/// - Provides thread-safe access to [`RunState`] via `Arc<RwLock<T>>`
/// - Rejects a second run atomically in [`try_begin_run()`](Self::try_begin_run)
/// - Detects state changes and emits [`StateChange`] events
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Related Types
///
/// - [`crate::models::RunState`]: The underlying state structure
/// - [`crate::services::batch::BatchProcessor`]: Drives a run through this manager
/// - [`crate::shell`]: Prints progress from the events
pub struct StateManager {
    /// The run state protected by RwLock for thread-safe access
    state: Arc<RwLock<RunState>>,

    /// Broadcast channel for emitting state change events
    /// Multiple subscribers can listen for state changes
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with an idle state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(RunState::default())),
            state_tx,
        }
    }

    /// Get a read-only snapshot of the current state
    pub fn snapshot(&self) -> RunState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let percent = state_manager.read(|state| state.percent());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RunState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub fn is_running(&self) -> bool {
        self.read(|state| state.is_running)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.read(|state| state.cancel_requested)
    }

    /// Update the state and emit change events
    ///
    /// It:
    /// 1. Captures the old state
    /// 2. Applies the update function
    /// 3. Detects what changed
    /// 4. Emits appropriate events
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut RunState),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = detect_changes(&old_state, &state);
        for change in &changes {
            self.emit(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn emit(&self, change: StateChange) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.state_tx.send(change);
    }

    /// Start a run unless one is already active.
    ///
    /// The check and the transition happen under one write lock. A rejected
    /// call leaves the active run's state untouched and emits nothing.
    pub fn try_begin_run(
        &self,
        operation: Operation,
        total: usize,
    ) -> Result<Vec<StateChange>, RunRejected> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.is_running {
            return Err(RunRejected {
                active: state.operation.unwrap_or(operation),
            });
        }

        let old_state = state.clone();
        *state = RunState::started(operation, total);
        let changes = detect_changes(&old_state, &state);
        drop(state);

        for change in &changes {
            self.emit(change.clone());
        }
        Ok(changes)
    }

    /// Mark `file` as the one being processed
    pub fn begin_file(&self, file: &Utf8Path) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.current_file = Some(file.to_path_buf());
        });

        let (completed, total) = self.read(|state| (state.completed, state.total));
        let event = StateChange::FileStarted {
            position: completed + 1,
            total,
            file: file.to_path_buf(),
        };
        self.emit(event.clone());
        changes.push(event);
        changes
    }

    /// Record the result of one file and advance the counters
    pub fn record_file(&self, result: &ProcessingResult) -> Vec<StateChange> {
        let mut changes = self.update(|state| {
            state.completed += 1;
            if result.success {
                state.succeeded += 1;
            } else {
                state.failed += 1;
            }
            state.current_file = None;
        });

        let message = if result.success {
            result
                .output_path()
                .map(|output| output.to_string())
                .unwrap_or_default()
        } else {
            result.error.clone()
        };
        let event = StateChange::FileProcessed {
            file: result.source.clone(),
            success: result.success,
            message,
        };
        self.emit(event.clone());
        changes.push(event);
        changes
    }

    /// Broadcast a progress checkpoint
    pub fn checkpoint(&self) -> StateChange {
        let event = self.read(|state| StateChange::Checkpoint {
            completed: state.completed,
            total: state.total,
            percent: state.percent(),
        });
        self.emit(event.clone());
        event
    }

    /// Ask the active run to stop before its next file.
    ///
    /// # Returns
    /// `false` when no run is active
    pub fn request_cancel(&self) -> bool {
        let mut accepted = false;
        self.update(|state| {
            if state.is_running {
                state.cancel_requested = true;
                accepted = true;
            }
        });
        accepted
    }

    /// End the active run and return the state to idle
    pub fn finish_run(&self, cancelled: bool) -> Vec<StateChange> {
        let mut finished = RunState::default();
        let mut changes = self.update(|state| {
            finished = std::mem::take(state);
        });

        if finished.is_running {
            let event = StateChange::RunFinished {
                operation: finished.operation,
                succeeded: finished.succeeded,
                failed: finished.failed,
                cancelled,
            };
            self.emit(event.clone());
            changes.push(event);
        }
        changes
    }
}

/// Detect what changed between two states and generate events
fn detect_changes(old: &RunState, new: &RunState) -> Vec<StateChange> {
    let mut changes = Vec::new();

    if !old.is_running && new.is_running {
        if let Some(operation) = new.operation {
            changes.push(StateChange::RunStarted {
                operation,
                total: new.total,
            });
        }
    }

    // Progress only matters while a run is active
    if new.is_running
        && (old.completed != new.completed
            || old.total != new.total
            || old.current_file != new.current_file)
    {
        changes.push(StateChange::ProgressUpdated {
            completed: new.completed,
            total: new.total,
            current_file: new.current_file.clone(),
        });
    }

    if !old.cancel_requested && new.cancel_requested {
        changes.push(StateChange::CancellationRequested);
    }

    changes
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across threads
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
