use camino::Utf8PathBuf;
use std::fmt;

/// The two batch operations a run can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Convert,
    Unlock,
}

impl Operation {
    /// Verb used in progress and summary lines
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Convert => "Converting",
            Operation::Unlock => "Unlocking",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Convert => f.write_str("conversion"),
            Operation::Unlock => f.write_str("unlock"),
        }
    }
}

/// Transient state of the batch run in progress.
///
/// Wrapped in `Arc<RwLock<RunState>>` by [`crate::state::StateManager`]. The
/// struct is reset when a run starts and returned to its default when the run
/// finishes, so a default `RunState` means "no run active".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunState {
    pub is_running: bool,
    pub operation: Option<Operation>,

    // Progress
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub current_file: Option<Utf8PathBuf>,

    pub cancel_requested: bool,
}

impl RunState {
    /// Fresh state for a run that is about to start
    pub fn started(operation: Operation, total: usize) -> Self {
        Self {
            is_running: true,
            operation: Some(operation),
            total,
            ..Self::default()
        }
    }

    /// Completion percentage in the 0-100 range
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }
}
