//! Services module - the batch workflow on top of the engine seam.
//!
//! # Components
//!
//! - [`SpreadsheetSession`]: exclusive owner of one engine application and at
//!   most one open document. Handles:
//!   - Opening with or without a password
//!   - Removing structure, window and sheet protection step by step
//!   - Saving as xlsx (plain or unprotected) into a created destination folder
//!   - Deterministic release through `dispose` and `Drop`
//!
//! - [`BatchProcessor`]: runs convert or unlock over an ordered file list,
//!   recording one [`ProcessingResult`](crate::models::ProcessingResult) per
//!   attempted file and checking for cancellation between files.
//!
//! - [`ErrorCategory`]: environment, authentication or file failure, with the
//!   guidance shown to the user.
//!
//! # Usage Example
//!
//! ```ignore
//! use xlsx_utility::engine::NativeLauncher;
//! use xlsx_utility::services::{BatchOptions, BatchProcessor};
//!
//! let processor = BatchProcessor::new(NativeLauncher::new(), state, metrics);
//! let report = processor
//!     .run_conversion(&files, Utf8Path::new("/out"), &BatchOptions::default())
//!     .await?;
//! println!("{} converted, {} failed", report.succeeded(), report.failed());
//! ```

pub mod batch;
pub mod errors;
pub mod session;

pub use batch::{BatchError, BatchOptions, BatchProcessor, BatchReport, output_path};
pub use errors::{ErrorCategory, categorize};
pub use session::{
    DocumentInfo, ProtectionReport, SessionError, SessionState, SpreadsheetSession,
};
