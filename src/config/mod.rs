use crate::models::Settings;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// File name of the settings document
pub const SETTINGS_FILE_NAME: &str = "settings.yaml";

/// Prefix of environment variables that override settings (e.g. `XLSX_UTILITY_BATCH_SIZE`)
pub const ENV_PREFIX: &str = "XLSX_UTILITY";

/// Loads and saves the YAML settings document.
///
/// Neither operation raises: a missing, empty or corrupt document yields
/// defaults and a failed save is reported as `false`. Settings problems are
/// never allowed to stop a run.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    settings_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl SettingsStore {
    /// Create a store for `settings.yaml` inside `settings_dir`.
    ///
    /// The directory is not created until the first save.
    pub fn new<P: AsRef<Utf8Path>>(settings_dir: P) -> Self {
        let settings_dir = settings_dir.as_ref().to_path_buf();
        Self {
            settings_path: settings_dir.join(SETTINGS_FILE_NAME),
            settings_dir,
        }
    }

    /// Store rooted at the folder containing the running executable.
    ///
    /// Falls back to the working directory when the executable path is not
    /// available or not UTF-8.
    pub fn beside_executable() -> Self {
        Self::new(executable_dir())
    }

    /// Load settings, falling back to defaults on any problem.
    ///
    /// Layers `settings.yaml` (when present and non-empty) under environment
    /// variables prefixed with [`ENV_PREFIX`], then validates the result.
    pub fn load(&self) -> Settings {
        let mut settings = match self.try_load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(
                    "Failed to load settings from {}, using defaults: {:#}",
                    self.settings_path,
                    e
                );
                Settings::default()
            }
        };

        for field in settings.validate() {
            tracing::warn!("Setting {} was out of range and has been reset", field);
        }

        settings
    }

    fn try_load(&self) -> Result<Settings> {
        let mut builder = Config::builder();

        if self.has_document() {
            builder = builder.add_source(
                File::from(self.settings_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            );
        } else {
            tracing::info!(
                "Settings file not found or empty at {}, using defaults",
                self.settings_path
            );
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let settings: Settings = config
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::debug!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    fn has_document(&self) -> bool {
        fs::read_to_string(&self.settings_path)
            .map(|contents| !contents.trim().is_empty())
            .unwrap_or(false)
    }

    /// Save the whole settings snapshot.
    ///
    /// # Returns
    /// `true` when the document was written, `false` (with a logged error) otherwise
    pub fn save(&self, settings: &Settings) -> bool {
        match self.try_save(settings) {
            Ok(()) => {
                tracing::info!("Saved settings to {}", self.settings_path);
                true
            }
            Err(e) => {
                tracing::error!("Failed to save settings: {:#}", e);
                false
            }
        }
    }

    fn try_save(&self, settings: &Settings) -> Result<()> {
        if !self.settings_dir.exists() {
            fs::create_dir_all(&self.settings_dir).with_context(|| {
                format!("Failed to create settings directory: {}", self.settings_dir)
            })?;
        }

        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        Ok(())
    }

    /// Remove the settings document so the next load returns defaults
    pub fn reset(&self) -> bool {
        match fs::remove_file(&self.settings_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::error!("Failed to remove settings {}: {}", self.settings_path, e);
                false
            }
        }
    }

    /// Location of the settings document
    pub fn path(&self) -> &Utf8Path {
        &self.settings_path
    }

    /// Directory holding the settings document
    pub fn settings_dir(&self) -> &Utf8Path {
        &self.settings_dir
    }
}

/// Folder containing the running executable, or `.` when unknown
pub fn executable_dir() -> Utf8PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .and_then(|dir| Utf8PathBuf::try_from(dir).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}
