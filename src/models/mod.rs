//! Data models for the xlsx utility.
//!
//! - [`Settings`]: fixed-shape user settings persisted in `settings.yaml`
//! - [`RunState`]: transient progress of the batch run in progress
//! - [`ProcessingResult`]: per-file outcome collected into the run summary
//! - [`Operation`]: convert or unlock
//!
//! Settings are serializable for YAML persistence. `RunState` lives behind
//! [`StateManager`](crate::state::StateManager) and is only mutated through it.

pub mod result;
pub mod run_state;
pub mod settings;

pub use result::ProcessingResult;
pub use run_state::{Operation, RunState};
pub use settings::{Settings, SettingsError};
