//! Spreadsheet Session: exclusive owner of one engine instance and at most
//! one open document for the duration of a batch run.
//!
//! ```text
//! Uninitialized --initialize ok--> Ready <--close--> Open
//!       |                            |                 |
//!       +--initialize failed--> Unavailable            |
//!                                    +----dispose------+--> Disposed
//! ```
//!
//! [`SpreadsheetSession::dispose`] releases the document and the application
//! in reverse acquisition order and is also run by `Drop`, so the engine is
//! released on every exit path of the owning run.

use crate::engine::{EngineError, EngineLauncher, SaveMode, SpreadsheetApplication, Workbook};
use crate::services::errors::{ErrorCategory, categorize};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// The engine could not be started; every operation fails fast
    Unavailable,
    Ready,
    Open,
    Disposed,
}

/// Errors reported by session operations
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("spreadsheet engine is unavailable: {0}")]
    Unavailable(String),

    #[error("session is not initialized")]
    NotInitialized,

    #[error("session has been disposed")]
    Disposed,

    #[error("no document is open")]
    NoDocument,

    #[error("could not create output folder {path}: {source}")]
    OutputFolder {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Unavailable(_) => ErrorCategory::Environment,
            SessionError::Engine(e) => categorize(e),
            _ => ErrorCategory::File,
        }
    }
}

/// What an opened document looks like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub path: Utf8PathBuf,
    pub sheet_names: Vec<String>,
    pub structure_protected: bool,
    pub windows_protected: bool,
    /// Indexes into `sheet_names`
    pub protected_sheets: Vec<usize>,
}

impl DocumentInfo {
    pub fn is_protected(&self) -> bool {
        self.structure_protected || self.windows_protected || !self.protected_sheets.is_empty()
    }
}

/// Outcome of [`SpreadsheetSession::remove_protection`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionReport {
    pub structure_removed: bool,
    pub windows_removed: bool,
    pub sheets_unprotected: Vec<String>,
    /// `(step, error)` for every unprotect call the engine rejected
    pub rejected: Vec<(String, String)>,
}

impl ProtectionReport {
    /// Whether every protection found was removed
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

struct OpenDocument {
    path: Utf8PathBuf,
    workbook: Box<dyn Workbook>,
}

/// Owns the engine application and the single open document
pub struct SpreadsheetSession {
    state: SessionState,
    application: Option<Box<dyn SpreadsheetApplication>>,
    document: Option<OpenDocument>,
    unavailable_reason: Option<String>,
}

impl SpreadsheetSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            application: None,
            document: None,
            unavailable_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the engine could not be started, once `initialize` failed
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    /// Start the engine application.
    ///
    /// # Returns
    /// `false` when the engine could not be started; the session is then
    /// `Unavailable` and the reason is kept for every later error.
    pub fn initialize(&mut self, launcher: &dyn EngineLauncher) -> bool {
        match self.state {
            SessionState::Ready | SessionState::Open => return true,
            SessionState::Unavailable | SessionState::Disposed => return false,
            SessionState::Uninitialized => {}
        }

        match launcher.launch() {
            Ok(application) => {
                tracing::debug!("Spreadsheet engine started: {}", application.name());
                self.application = Some(application);
                self.state = SessionState::Ready;
                true
            }
            Err(e) => {
                tracing::error!("Spreadsheet engine unavailable: {}", e);
                self.unavailable_reason = Some(e.to_string());
                self.state = SessionState::Unavailable;
                false
            }
        }
    }

    fn ensure_usable(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready | SessionState::Open => Ok(()),
            SessionState::Uninitialized => Err(SessionError::NotInitialized),
            SessionState::Disposed => Err(SessionError::Disposed),
            SessionState::Unavailable => Err(SessionError::Unavailable(
                self.unavailable_reason
                    .clone()
                    .unwrap_or_else(|| "unknown reason".to_string()),
            )),
        }
    }

    /// Open a document, passing the password to the engine only when one is given
    pub fn open_document(
        &mut self,
        path: &Utf8Path,
        password: Option<&str>,
    ) -> Result<DocumentInfo, SessionError> {
        self.ensure_usable()?;

        if let Some(previous) = &self.document {
            tracing::warn!(
                "Document {} was still open when opening {}; closing it first",
                previous.path,
                path
            );
            self.close_document();
        }

        let application = self.application.as_mut().ok_or(SessionError::NotInitialized)?;
        let workbook = application.open_workbook(path, password)?;

        let sheet_names = workbook.sheet_names();
        let info = DocumentInfo {
            path: path.to_path_buf(),
            structure_protected: workbook.structure_protected(),
            windows_protected: workbook.windows_protected(),
            protected_sheets: (0..sheet_names.len())
                .filter(|index| workbook.sheet_protected(*index))
                .collect(),
            sheet_names,
        };
        tracing::debug!(
            "Opened {} ({} sheets, protected: {})",
            path,
            info.sheet_names.len(),
            info.is_protected()
        );

        self.document = Some(OpenDocument {
            path: path.to_path_buf(),
            workbook,
        });
        self.state = SessionState::Open;
        Ok(info)
    }

    /// Save the open document as xlsx, creating the destination folder and
    /// replacing any existing file
    pub fn save_as(&mut self, output: &Utf8Path, mode: SaveMode) -> Result<(), SessionError> {
        self.ensure_usable()?;
        let document = self.document.as_mut().ok_or(SessionError::NoDocument)?;

        if let Some(parent) = output.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SessionError::OutputFolder {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        document.workbook.save_as(output, mode)?;
        tracing::debug!("Saved {} as {} ({:?})", document.path, output, mode);
        Ok(())
    }

    /// Remove structure, window and sheet protection from the open document.
    ///
    /// Each step runs independently; a rejected step is logged and listed in
    /// the report without stopping the remaining steps.
    pub fn remove_protection(&mut self, password: &str) -> Result<ProtectionReport, SessionError> {
        self.ensure_usable()?;
        let document = self.document.as_mut().ok_or(SessionError::NoDocument)?;
        let workbook = &mut document.workbook;
        let mut report = ProtectionReport::default();

        if workbook.structure_protected() {
            match workbook.unprotect_structure(password) {
                Ok(()) => report.structure_removed = true,
                Err(e) => reject(&mut report, &document.path, "workbook structure", e),
            }
        }

        if workbook.windows_protected() {
            match workbook.unprotect_windows(password) {
                Ok(()) => report.windows_removed = true,
                Err(e) => reject(&mut report, &document.path, "workbook windows", e),
            }
        }

        for (index, name) in workbook.sheet_names().into_iter().enumerate() {
            if !workbook.sheet_protected(index) {
                continue;
            }
            match workbook.unprotect_sheet(index, password) {
                Ok(()) => report.sheets_unprotected.push(name),
                Err(e) => reject(&mut report, &document.path, &format!("sheet '{name}'"), e),
            }
        }

        Ok(report)
    }

    /// Close the open document without saving; does nothing when none is open
    pub fn close_document(&mut self) {
        if let Some(mut document) = self.document.take() {
            if let Err(e) = document.workbook.close() {
                tracing::warn!("Failed to close {}: {}", document.path, e);
            }
            tracing::debug!("Closed {}", document.path);
        }
        if self.state == SessionState::Open {
            self.state = SessionState::Ready;
        }
    }

    /// Release the document and quit the engine; safe to call repeatedly
    pub fn dispose(&mut self) {
        if self.state == SessionState::Disposed {
            return;
        }

        self.close_document();

        if let Some(mut application) = self.application.take() {
            let name = application.name();
            if let Err(e) = application.quit() {
                tracing::warn!("Failed to quit {}: {}", name, e);
            }
            drop(application);
            tracing::debug!("Spreadsheet engine released: {}", name);
        }

        self.state = SessionState::Disposed;
    }
}

fn reject(report: &mut ProtectionReport, path: &Utf8Path, step: &str, error: EngineError) {
    tracing::warn!("Could not remove {} protection from {}: {}", step, path, error);
    report.rejected.push((step.to_string(), error.to_string()));
}

impl Default for SpreadsheetSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpreadsheetSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
