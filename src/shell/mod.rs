// Shell module - command line front end
//
// This module contains:
// - Cli / Command: clap definitions of the `convert`, `unlock` and `settings` commands
// - ShellController: runs a command against the batch workflow and prints progress
// - dialogs: native file/folder pickers and the password prompt

pub mod args;
pub mod controller;
pub mod dialogs;

pub use args::{Cli, Command, RunArgs, SettingsAction, UnlockArgs};
pub use controller::{ShellController, render_summary};
