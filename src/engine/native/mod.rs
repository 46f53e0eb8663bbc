//! Pure Rust spreadsheet engine.
//!
//! Delimited text and legacy `.xls` workbooks are imported as cell grids and
//! exported to a new xlsx file. xlsx packages are edited in place: protection
//! markup is removed from the XML parts and every other part is written back
//! unchanged. Agile-encrypted packages are decrypted when opened with the
//! right password.

pub mod crypto;
pub mod grid;
pub mod package;
pub mod password;
pub mod xml;

use super::{EngineError, EngineLauncher, SaveMode, SpreadsheetApplication, Workbook};
use camino::Utf8Path;
use crypto::DecryptError;
use grid::{Grid, GridError};
use package::{PackageError, XlsxPackage};
use std::fs;
use std::io::Write;

/// Engine name reported in log lines
pub const ENGINE_NAME: &str = "native xlsx engine";

/// File kinds the engine can open, by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Csv,
    Text,
    LegacyXls,
    Xlsx,
}

impl InputKind {
    /// Classify a path by its extension (case-insensitive)
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        let extension = path.extension()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(InputKind::Csv),
            "txt" => Some(InputKind::Text),
            "xls" => Some(InputKind::LegacyXls),
            "xlsx" => Some(InputKind::Xlsx),
            _ => None,
        }
    }
}

/// Launcher for the built-in engine; always available
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLauncher;

impl NativeLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl EngineLauncher for NativeLauncher {
    fn launch(&self) -> Result<Box<dyn SpreadsheetApplication>, EngineError> {
        tracing::debug!("Starting {}", ENGINE_NAME);
        Ok(Box::new(NativeApplication { running: true }))
    }
}

/// A running native engine instance
#[derive(Debug)]
pub struct NativeApplication {
    running: bool,
}

impl SpreadsheetApplication for NativeApplication {
    fn name(&self) -> String {
        ENGINE_NAME.to_string()
    }

    fn open_workbook(
        &mut self,
        path: &Utf8Path,
        password: Option<&str>,
    ) -> Result<Box<dyn Workbook>, EngineError> {
        if !self.running {
            return Err(EngineError::Application(format!("{} has quit", ENGINE_NAME)));
        }

        let kind = InputKind::from_path(path)
            .ok_or_else(|| EngineError::UnsupportedFormat(path.to_path_buf()))?;

        let content = match kind {
            InputKind::Csv | InputKind::Text => {
                let bytes = fs::read(path).map_err(|e| EngineError::io(path, e))?;
                let sheet_name = path.file_stem().unwrap_or("Sheet1");
                let grid = grid::read_delimited(&bytes, sheet_name, kind == InputKind::Csv)
                    .map_err(|e| grid_error(path, e, password))?;
                Content::Grid(grid)
            }
            InputKind::LegacyXls => {
                if !path.exists() {
                    return Err(EngineError::io(
                        path,
                        std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                    ));
                }
                let grid =
                    grid::read_legacy_xls(path).map_err(|e| grid_error(path, e, password))?;
                Content::Grid(grid)
            }
            InputKind::Xlsx => {
                let bytes = fs::read(path).map_err(|e| EngineError::io(path, e))?;
                Content::Package(open_package(path, &bytes, password)?)
            }
        };

        tracing::debug!("Opened {} as {:?}", path, kind);
        Ok(Box::new(NativeWorkbook {
            content,
            closed: false,
        }))
    }

    fn quit(&mut self) -> Result<(), EngineError> {
        self.running = false;
        Ok(())
    }
}

fn open_package(path: &Utf8Path, bytes: &[u8], password: Option<&str>) -> Result<XlsxPackage, EngineError> {
    if crypto::is_compound_file(bytes) {
        let Some(password) = password else {
            return Err(EngineError::PasswordRequired(path.to_path_buf()));
        };
        let decrypted = crypto::decrypt_package(bytes, password).map_err(|e| match e {
            DecryptError::InvalidPassword => EngineError::InvalidPassword(path.to_path_buf()),
            DecryptError::Unsupported(scheme) => EngineError::UnsupportedProtection {
                path: path.to_path_buf(),
                scheme,
            },
            other => EngineError::malformed(path, other.to_string()),
        })?;
        tracing::debug!("Decrypted {} ({} bytes)", path, decrypted.len());
        return XlsxPackage::from_bytes(&decrypted).map_err(|e| package_error(path, e));
    }

    let package = XlsxPackage::from_bytes(bytes).map_err(|e| package_error(path, e))?;
    if let Some(password) = password {
        package.check_password(password).map_err(|e| package_error(path, e))?;
    }
    Ok(package)
}

fn package_error(path: &Utf8Path, error: PackageError) -> EngineError {
    match error {
        PackageError::InvalidPassword => EngineError::InvalidPassword(path.to_path_buf()),
        PackageError::UnsupportedAlgorithm(algorithm) => EngineError::UnsupportedProtection {
            path: path.to_path_buf(),
            scheme: format!("password hash {algorithm}"),
        },
        other => EngineError::malformed(path, other.to_string()),
    }
}

fn grid_error(path: &Utf8Path, error: GridError, password: Option<&str>) -> EngineError {
    match error {
        GridError::Encrypted if password.is_none() => EngineError::PasswordRequired(path.to_path_buf()),
        GridError::Encrypted => EngineError::UnsupportedProtection {
            path: path.to_path_buf(),
            scheme: "encrypted legacy workbook".to_string(),
        },
        other => EngineError::malformed(path, other.to_string()),
    }
}

#[derive(Debug)]
enum Content {
    Package(XlsxPackage),
    Grid(Grid),
}

/// A document opened by the native engine
#[derive(Debug)]
pub struct NativeWorkbook {
    content: Content,
    closed: bool,
}

impl NativeWorkbook {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Application("workbook is closed".to_string()));
        }
        Ok(())
    }

    fn package_mut(&mut self) -> Option<&mut XlsxPackage> {
        match &mut self.content {
            Content::Package(package) => Some(package),
            Content::Grid(_) => None,
        }
    }

    fn edit(
        &mut self,
        what: &str,
        edit: impl FnOnce(&mut XlsxPackage) -> Result<(), PackageError>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        match self.package_mut() {
            Some(package) => edit(package).map_err(|e| match e {
                PackageError::InvalidPassword => {
                    EngineError::Application(format!("the password is not correct for {what}"))
                }
                PackageError::UnsupportedAlgorithm(algorithm) => EngineError::Application(format!(
                    "{what} uses unsupported password hash {algorithm}"
                )),
                other => EngineError::Application(other.to_string()),
            }),
            None => Ok(()),
        }
    }
}

impl Workbook for NativeWorkbook {
    fn structure_protected(&self) -> bool {
        match &self.content {
            Content::Package(package) => package.structure_protected(),
            Content::Grid(_) => false,
        }
    }

    fn unprotect_structure(&mut self, password: &str) -> Result<(), EngineError> {
        self.edit("workbook structure", |p| p.unprotect_structure(password))
    }

    fn windows_protected(&self) -> bool {
        match &self.content {
            Content::Package(package) => package.windows_protected(),
            Content::Grid(_) => false,
        }
    }

    fn unprotect_windows(&mut self, password: &str) -> Result<(), EngineError> {
        self.edit("workbook windows", |p| p.unprotect_windows(password))
    }

    fn sheet_names(&self) -> Vec<String> {
        match &self.content {
            Content::Package(package) => package.sheet_names(),
            Content::Grid(grid) => grid.sheets.iter().map(|s| s.name.clone()).collect(),
        }
    }

    fn sheet_protected(&self, index: usize) -> bool {
        match &self.content {
            Content::Package(package) => package.sheet_protected(index),
            Content::Grid(_) => false,
        }
    }

    fn unprotect_sheet(&mut self, index: usize, password: &str) -> Result<(), EngineError> {
        let what = format!("sheet {}", index + 1);
        self.edit(&what, |p| p.unprotect_sheet(index, password))
    }

    fn save_as(&mut self, path: &Utf8Path, mode: SaveMode) -> Result<(), EngineError> {
        self.ensure_open()?;
        let bytes = match &self.content {
            Content::Package(package) => package
                .to_bytes(mode)
                .map_err(|e| EngineError::Application(format!("could not write package: {e}")))?,
            Content::Grid(grid) => grid::write_xlsx(grid)
                .map_err(|e| EngineError::Application(e.to_string()))?,
        };
        write_atomically(path, &bytes)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        Ok(())
    }
}

/// Write `bytes` to a temporary file beside `path`, then rename it into place
pub fn write_atomically(path: &Utf8Path, bytes: &[u8]) -> Result<(), EngineError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| EngineError::Application(format!("{path} has no file name")))?;
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = result.and_then(|()| fs::rename(&temp_path, path)) {
        // Best effort: the temporary file may not exist
        let _ = fs::remove_file(&temp_path);
        return Err(EngineError::io(path, e));
    }
    Ok(())
}
