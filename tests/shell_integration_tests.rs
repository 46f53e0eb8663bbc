//! Integration tests for ShellController
//!
//! These tests drive whole commands with explicit files and output folder,
//! so no picker or prompt is shown.

mod common;

use camino::Utf8PathBuf;
use common::{ScriptedLauncher, create_inputs, utf8_dir};
use std::process::ExitCode;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use xlsx_utility::shell::controller::{EXIT_ENGINE_UNAVAILABLE, EXIT_FILES_FAILED};
use xlsx_utility::shell::{Command, RunArgs, SettingsAction, ShellController, UnlockArgs};
use xlsx_utility::{BatchProcessor, Metrics, Settings, SettingsStore, StateManager};

struct Fixture {
    _temp_dir: TempDir,
    dir: Utf8PathBuf,
    store: SettingsStore,
    runtime: Runtime,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let dir = utf8_dir(&temp_dir);
        Self {
            store: SettingsStore::new(dir.join("settings")),
            dir,
            _temp_dir: temp_dir,
            runtime: Runtime::new().unwrap(),
        }
    }

    fn controller(
        &self,
        launcher: ScriptedLauncher,
        settings: Settings,
    ) -> ShellController<ScriptedLauncher> {
        let processor = BatchProcessor::new(launcher, StateManager::new(), Arc::new(Metrics::new()));
        ShellController::new(processor, self.store.clone(), settings, self.runtime.handle().clone())
    }
}

fn quiet_settings() -> Settings {
    Settings {
        sound_notifications: false,
        ..Settings::default()
    }
}

fn run_args(files: Vec<Utf8PathBuf>, output: Utf8PathBuf) -> RunArgs {
    RunArgs {
        files,
        output: Some(output),
        ..RunArgs::default()
    }
}

#[test]
fn test_convert_command_remembers_folders() {
    let fixture = Fixture::new();
    let inputs = create_inputs(&fixture.dir, &["A.csv", "B.txt"]);
    let out = fixture.dir.join("out");

    let mut controller = fixture.controller(ScriptedLauncher::new(), quiet_settings());
    let code = controller
        .execute(Command::Convert(run_args(inputs, out.clone())))
        .unwrap();

    assert_eq!(code, ExitCode::SUCCESS);
    assert!(out.join("A.xlsx").exists());
    assert!(out.join("B.xlsx").exists());

    let saved = fixture.store.load();
    assert_eq!(saved.default_output_path, out.as_str());
    assert_eq!(saved.default_input_path, fixture.dir.as_str());
    assert_eq!(controller.settings(), &saved);
}

#[test]
fn test_folders_not_saved_without_remember_paths() {
    let fixture = Fixture::new();
    let inputs = create_inputs(&fixture.dir, &["A.csv"]);
    let settings = Settings {
        remember_paths: false,
        ..quiet_settings()
    };

    let mut controller = fixture.controller(ScriptedLauncher::new(), settings);
    controller
        .execute(Command::Convert(run_args(inputs, fixture.dir.join("out"))))
        .unwrap();

    assert!(!fixture.store.path().exists());
}

#[test]
fn test_expected_file_count_requires_force() {
    let fixture = Fixture::new();
    let inputs = create_inputs(&fixture.dir, &["A.csv"]);
    let out = fixture.dir.join("out");
    let settings = Settings {
        expected_file_count: Some(4),
        ..quiet_settings()
    };

    let launcher = ScriptedLauncher::new();
    let mut controller = fixture.controller(launcher.clone(), settings);

    let rejected = controller.execute(Command::Convert(run_args(inputs.clone(), out.clone())));
    assert!(rejected.is_err());
    assert!(launcher.opened().is_empty());

    let forced = RunArgs {
        force: true,
        ..run_args(inputs, out.clone())
    };
    let code = controller.execute(Command::Convert(forced)).unwrap();
    assert_eq!(code, ExitCode::SUCCESS);
    assert!(out.join("A.xlsx").exists());
}

#[test]
fn test_unlock_with_wrong_password_exits_with_failure() {
    let fixture = Fixture::new();
    let inputs = create_inputs(&fixture.dir, &["Budget.xlsx"]);
    let out = fixture.dir.join("out");

    let mut controller = fixture.controller(ScriptedLauncher::protected_with("right"), quiet_settings());
    let code = controller
        .execute(Command::Unlock(UnlockArgs {
            run: run_args(inputs, out.clone()),
            password: Some("wrong".to_string()),
        }))
        .unwrap();

    assert_eq!(code, ExitCode::from(EXIT_FILES_FAILED));
    assert!(!out.exists());
}

#[test]
fn test_empty_password_is_rejected() {
    let fixture = Fixture::new();
    let inputs = create_inputs(&fixture.dir, &["Budget.xlsx"]);

    let launcher = ScriptedLauncher::protected_with("right");
    let mut controller = fixture.controller(launcher.clone(), quiet_settings());
    let result = controller.execute(Command::Unlock(UnlockArgs {
        run: run_args(inputs, fixture.dir.join("out")),
        password: Some(String::new()),
    }));

    assert!(result.is_err());
    assert_eq!(launcher.launches(), 0);
}

#[test]
fn test_unavailable_engine_exit_code() {
    let fixture = Fixture::new();
    let inputs = create_inputs(&fixture.dir, &["A.csv"]);

    let mut controller = fixture.controller(ScriptedLauncher::unavailable(), quiet_settings());
    let code = controller
        .execute(Command::Convert(run_args(inputs, fixture.dir.join("out"))))
        .unwrap();

    assert_eq!(code, ExitCode::from(EXIT_ENGINE_UNAVAILABLE));
    assert!(!fixture.store.path().exists());
}

#[test]
fn test_settings_set_and_reset() {
    let fixture = Fixture::new();
    let mut controller = fixture.controller(ScriptedLauncher::new(), Settings::default());

    controller
        .execute(Command::Settings {
            action: SettingsAction::Set {
                key: "batch_size".to_string(),
                value: "10".to_string(),
            },
        })
        .unwrap();
    assert_eq!(fixture.store.load().batch_size, 10);

    let unknown = controller.execute(Command::Settings {
        action: SettingsAction::Set {
            key: "colour".to_string(),
            value: "red".to_string(),
        },
    });
    assert!(unknown.is_err());

    controller
        .execute(Command::Settings {
            action: SettingsAction::Reset,
        })
        .unwrap();
    assert!(!fixture.store.path().exists());
    assert_eq!(controller.settings(), &Settings::default());
}
