use crate::services::errors::ErrorCategory;
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;

/// Outcome of processing one input file.
///
/// Created once per attempted file by the batch processor and never mutated
/// afterwards. `output` is only set on success and `error` is only non-empty
/// on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub source: Utf8PathBuf,
    pub success: bool,
    pub output: Option<Utf8PathBuf>,
    pub error: String,
    pub category: Option<ErrorCategory>,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl ProcessingResult {
    /// Result for a file that was saved to `output`
    pub fn succeeded(
        source: impl Into<Utf8PathBuf>,
        output: impl Into<Utf8PathBuf>,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            source: source.into(),
            success: true,
            output: Some(output.into()),
            error: String::new(),
            category: None,
            elapsed,
            attempts,
        }
    }

    /// Result for a file that could not be processed
    pub fn failed(
        source: impl Into<Utf8PathBuf>,
        error: impl Into<String>,
        category: ErrorCategory,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            source: source.into(),
            success: false,
            output: None,
            error: error.into(),
            category: Some(category),
            elapsed,
            attempts,
        }
    }

    /// File name of the source, for display
    pub fn file_name(&self) -> &str {
        self.source.file_name().unwrap_or(self.source.as_str())
    }

    pub fn output_path(&self) -> Option<&Utf8Path> {
        self.output.as_deref()
    }

    pub fn is_authentication_failure(&self) -> bool {
        self.category == Some(ErrorCategory::Authentication)
    }
}
