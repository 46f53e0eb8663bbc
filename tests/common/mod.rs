//! Scripted spreadsheet engine shared by the integration suites
#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use xlsx_utility::StateManager;
use xlsx_utility::engine::{
    EngineError, EngineLauncher, SaveMode, SpreadsheetApplication, Workbook,
};

/// Bytes written by a scripted save
pub const SAVED_CONTENT: &[u8] = b"scripted xlsx";

/// Engine whose behaviour per file is set up front
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    script: Arc<Script>,
}

#[derive(Default)]
struct Script {
    unavailable: bool,
    password: Option<String>,
    /// Remaining open failures per file name
    failures: Mutex<HashMap<String, usize>>,
    cancel_after: Option<(usize, StateManager)>,
    opened: Mutex<Vec<Utf8PathBuf>>,
    launches: AtomicUsize,
    quits: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every launch fails
    pub fn unavailable() -> Self {
        Self::build(|script| script.unavailable = true)
    }

    /// Files open only with `password`
    pub fn protected_with(password: &str) -> Self {
        Self::build(|script| script.password = Some(password.to_string()))
    }

    /// Request cancellation while the `k`th file (one-based) is open
    pub fn cancelling_after(k: usize, state: StateManager) -> Self {
        Self::build(|script| script.cancel_after = Some((k, state)))
    }

    fn build(configure: impl FnOnce(&mut Script)) -> Self {
        let mut script = Script::default();
        configure(&mut script);
        Self {
            script: Arc::new(script),
        }
    }

    /// Make the next `times` opens of `file_name` fail with a file error
    pub fn fail_open(self, file_name: &str, times: usize) -> Self {
        self.script
            .failures
            .lock()
            .unwrap()
            .insert(file_name.to_string(), times);
        self
    }

    /// Paths passed to `open_workbook`, in call order
    pub fn opened(&self) -> Vec<Utf8PathBuf> {
        self.script.opened.lock().unwrap().clone()
    }

    pub fn launches(&self) -> usize {
        self.script.launches.load(Ordering::SeqCst)
    }

    pub fn quits(&self) -> usize {
        self.script.quits.load(Ordering::SeqCst)
    }
}

impl EngineLauncher for ScriptedLauncher {
    fn launch(&self) -> Result<Box<dyn SpreadsheetApplication>, EngineError> {
        self.script.launches.fetch_add(1, Ordering::SeqCst);
        if self.script.unavailable {
            return Err(EngineError::LaunchFailed("scripted engine is not installed".to_string()));
        }
        Ok(Box::new(ScriptedApplication {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedApplication {
    script: Arc<Script>,
}

impl SpreadsheetApplication for ScriptedApplication {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn open_workbook(
        &mut self,
        path: &Utf8Path,
        password: Option<&str>,
    ) -> Result<Box<dyn Workbook>, EngineError> {
        let position = {
            let mut opened = self.script.opened.lock().unwrap();
            opened.push(path.to_path_buf());
            opened.len()
        };

        if let Some((k, state)) = &self.script.cancel_after {
            if position == *k {
                state.request_cancel();
            }
        }

        let file_name = path.file_name().unwrap_or_default().to_string();
        {
            let mut failures = self.script.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&file_name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::Malformed {
                        path: path.to_path_buf(),
                        reason: "scripted corruption".to_string(),
                    });
                }
            }
        }

        if let Some(expected) = &self.script.password {
            match password {
                None => return Err(EngineError::PasswordRequired(path.to_path_buf())),
                Some(given) if given != expected => {
                    return Err(EngineError::InvalidPassword(path.to_path_buf()));
                }
                Some(_) => {}
            }
        }

        Ok(Box::new(ScriptedWorkbook {
            protected: self.script.password.is_some(),
        }))
    }

    fn quit(&mut self) -> Result<(), EngineError> {
        self.script.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedWorkbook {
    protected: bool,
}

impl Workbook for ScriptedWorkbook {
    fn structure_protected(&self) -> bool {
        self.protected
    }

    fn unprotect_structure(&mut self, _password: &str) -> Result<(), EngineError> {
        self.protected = false;
        Ok(())
    }

    fn windows_protected(&self) -> bool {
        false
    }

    fn unprotect_windows(&mut self, _password: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn sheet_names(&self) -> Vec<String> {
        vec!["Sheet1".to_string()]
    }

    fn sheet_protected(&self, _index: usize) -> bool {
        false
    }

    fn unprotect_sheet(&mut self, _index: usize, _password: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn save_as(&mut self, path: &Utf8Path, _mode: SaveMode) -> Result<(), EngineError> {
        fs::write(path, SAVED_CONTENT).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn close(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Create `names` inside `dir` and return their paths in order
pub fn create_inputs(dir: &Utf8Path, names: &[&str]) -> Vec<Utf8PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, b"a,b\n1,2\n").unwrap();
            path
        })
        .collect()
}

/// UTF-8 path of a temporary directory
pub fn utf8_dir(temp_dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap()
}
