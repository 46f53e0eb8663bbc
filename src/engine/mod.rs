//! Spreadsheet engine seam.
//!
//! The batch workflow never touches file formats directly. It drives an
//! engine through three traits that mirror the lifecycle of an office
//! automation application:
//!
//! - [`EngineLauncher`]: starts an application instance (the step that fails
//!   when the engine is unavailable)
//! - [`SpreadsheetApplication`]: the running instance, which opens workbooks
//!   and is quit exactly once
//! - [`Workbook`]: one open document, which can report and clear structure,
//!   window and sheet protection, save itself as xlsx and close
//!
//! The crate ships [`native::NativeLauncher`], a pure Rust engine. Other
//! engines (or test fakes) implement the same traits.

pub mod native;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

pub use native::NativeLauncher;

/// How a workbook is written by [`Workbook::save_as`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Save in the xlsx container without adding any protection
    PlainConversion,

    /// Save in the xlsx container with every protection flag stripped
    Unprotected,
}

/// Errors reported by a spreadsheet engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("spreadsheet engine could not be started: {0}")]
    LaunchFailed(String),

    #[error("the password is not correct for {0}")]
    InvalidPassword(Utf8PathBuf),

    #[error("{0} is password protected and needs a password to open")]
    PasswordRequired(Utf8PathBuf),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(Utf8PathBuf),

    #[error("unsupported protection in {path}: {scheme}")]
    UnsupportedProtection { path: Utf8PathBuf, scheme: String },

    #[error("{path} is not a readable spreadsheet: {reason}")]
    Malformed { path: Utf8PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Application(String),
}

impl EngineError {
    pub(crate) fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(path: &Utf8Path, reason: impl Into<String>) -> Self {
        EngineError::Malformed {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Starts spreadsheet application instances.
///
/// Shared by reference across a run, so implementations hold only
/// configuration, never a live instance.
pub trait EngineLauncher: Send + Sync {
    /// Start one application instance
    fn launch(&self) -> Result<Box<dyn SpreadsheetApplication>, EngineError>;
}

/// A running spreadsheet application instance
pub trait SpreadsheetApplication: Send {
    /// Engine name for log lines
    fn name(&self) -> String;

    /// Open a workbook, passing the password through when one is given
    fn open_workbook(
        &mut self,
        path: &Utf8Path,
        password: Option<&str>,
    ) -> Result<Box<dyn Workbook>, EngineError>;

    /// Terminate the instance
    fn quit(&mut self) -> Result<(), EngineError>;
}

/// One open document
#[cfg_attr(test, mockall::automock)]
pub trait Workbook: Send {
    /// Whether the workbook structure (sheet order, insert, delete) is locked
    fn structure_protected(&self) -> bool;

    fn unprotect_structure(&mut self, password: &str) -> Result<(), EngineError>;

    /// Whether the workbook window layout is locked
    fn windows_protected(&self) -> bool;

    fn unprotect_windows(&mut self, password: &str) -> Result<(), EngineError>;

    /// Sheet names in workbook order
    fn sheet_names(&self) -> Vec<String>;

    fn sheet_protected(&self, index: usize) -> bool;

    fn unprotect_sheet(&mut self, index: usize, password: &str) -> Result<(), EngineError>;

    /// Write the workbook to `path` in the xlsx container, replacing any existing file
    fn save_as(&mut self, path: &Utf8Path, mode: SaveMode) -> Result<(), EngineError>;

    /// Close without saving
    fn close(&mut self) -> Result<(), EngineError>;
}
