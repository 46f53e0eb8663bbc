// xlsx-utility - Batch conversion of CSV/TXT/XLS files to XLSX and protection removal
//
// This is the library crate containing the core business logic and data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod shell;
pub mod state;

// Re-export commonly used types for convenience
pub use config::SettingsStore;
pub use engine::{EngineError, EngineLauncher, NativeLauncher, SaveMode};
pub use metrics::Metrics;
pub use models::{Operation, ProcessingResult, RunState, Settings};
pub use services::{BatchOptions, BatchProcessor, BatchReport, ErrorCategory, SpreadsheetSession};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
