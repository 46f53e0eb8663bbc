use crate::engine::EngineError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Error text that points at a rejected or missing password.
///
/// Matches whole phrases so a file name such as `passwords.xlsx` inside the
/// message does not count.
static AUTHENTICATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)password\s+(is|you\s+supplied\s+is)\s+(not\s+correct|incorrect|invalid)|\b(incorrect|wrong|invalid)\s+password|password\s+(is\s+)?required|could\s+not\s+decrypt|decryption\s+failed|authentication\s+failed",
    )
    .expect("Invalid authentication regex")
});

/// How a failure affects the run and what the user is told
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The spreadsheet engine is unusable; the whole run aborts
    Environment,

    /// The password was rejected or is required
    Authentication,

    /// The file could not be read, converted or saved; the batch continues
    File,
}

impl ErrorCategory {
    /// Classify free-form error text
    pub fn from_message(message: &str) -> Self {
        if AUTHENTICATION_PATTERN.is_match(message) {
            ErrorCategory::Authentication
        } else {
            ErrorCategory::File
        }
    }

    /// Hint printed under the summary for this kind of failure
    pub fn guidance(&self) -> &'static str {
        match self {
            ErrorCategory::Environment => {
                "The spreadsheet engine could not be started. Check the installation and try again."
            }
            ErrorCategory::Authentication => {
                "Authentication failed. Re-enter the password and run the unlock again."
            }
            ErrorCategory::File => "Check that the files exist, are not open elsewhere, and are valid spreadsheets.",
        }
    }

    /// Whether another attempt at the same file can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::File)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Environment => f.write_str("environment"),
            ErrorCategory::Authentication => f.write_str("authentication"),
            ErrorCategory::File => f.write_str("file"),
        }
    }
}

/// Category of an engine error
pub fn categorize(error: &EngineError) -> ErrorCategory {
    match error {
        EngineError::LaunchFailed(_) => ErrorCategory::Environment,
        EngineError::InvalidPassword(_) | EngineError::PasswordRequired(_) => {
            ErrorCategory::Authentication
        }
        EngineError::UnsupportedFormat(_)
        | EngineError::UnsupportedProtection { .. }
        | EngineError::Malformed { .. }
        | EngineError::Io { .. } => ErrorCategory::File,
        EngineError::Application(message) => ErrorCategory::from_message(message),
    }
}
