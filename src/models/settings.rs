use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of files between progress checkpoints
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Default retry count applied when the caller opts into retries
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Upper bound for `retry_attempts`
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// User settings persisted in `settings.yaml`.
///
/// Every field has a default, so a document missing keys still loads and
/// unknown keys are ignored. The whole struct is saved at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder the input picker starts in
    pub default_input_path: String,

    /// Destination folder used when none is given on the command line
    pub default_output_path: String,

    /// Store the folders of the last run as the new defaults
    pub remember_paths: bool,

    /// Delete each source file after it was saved successfully
    pub auto_delete_originals: bool,

    /// Log at debug level
    pub show_detailed_logs: bool,

    /// Ring the terminal bell when a run finishes
    pub sound_notifications: bool,

    /// Files between progress checkpoints
    pub batch_size: u32,

    /// Extra attempts for a failed file when retries are requested
    pub retry_attempts: u32,

    /// Mirror log lines to the console
    pub log_to_console: bool,

    /// Number of files a run is expected to contain, if the workflow has one
    pub expected_file_count: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_input_path: String::new(),
            default_output_path: String::new(),
            remember_paths: true,
            auto_delete_originals: false,
            show_detailed_logs: false,
            sound_notifications: true,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            log_to_console: true,
            expected_file_count: None,
        }
    }
}

/// Errors from editing a single setting by name
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown setting: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {value:?} ({expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

impl Settings {
    /// Names accepted by [`set_field`](Self::set_field), in document order
    pub const KEYS: [&'static str; 10] = [
        "default_input_path",
        "default_output_path",
        "remember_paths",
        "auto_delete_originals",
        "show_detailed_logs",
        "sound_notifications",
        "batch_size",
        "retry_attempts",
        "log_to_console",
        "expected_file_count",
    ];

    /// Normalize out-of-range values.
    ///
    /// Returns the names of the fields that were changed so the caller can log them.
    pub fn validate(&mut self) -> Vec<&'static str> {
        let mut adjusted = Vec::new();

        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
            adjusted.push("batch_size");
        }

        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            self.retry_attempts = MAX_RETRY_ATTEMPTS;
            adjusted.push("retry_attempts");
        }

        if self.expected_file_count == Some(0) {
            self.expected_file_count = None;
            adjusted.push("expected_file_count");
        }

        adjusted
    }

    /// Set one field from its textual value.
    ///
    /// # Arguments
    /// * `key` - One of [`Settings::KEYS`]
    /// * `value` - Text form; booleans accept true/false/yes/no/on/off/1/0,
    ///   `expected_file_count` accepts `none` to clear it
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        match key {
            "default_input_path" => self.default_input_path = value.to_string(),
            "default_output_path" => self.default_output_path = value.to_string(),
            "remember_paths" => self.remember_paths = parse_bool(key, value)?,
            "auto_delete_originals" => self.auto_delete_originals = parse_bool(key, value)?,
            "show_detailed_logs" => self.show_detailed_logs = parse_bool(key, value)?,
            "sound_notifications" => self.sound_notifications = parse_bool(key, value)?,
            "log_to_console" => self.log_to_console = parse_bool(key, value)?,
            "batch_size" => self.batch_size = parse_u32(key, value)?,
            "retry_attempts" => self.retry_attempts = parse_u32(key, value)?,
            "expected_file_count" => {
                self.expected_file_count = if value.eq_ignore_ascii_case("none") || value.is_empty() {
                    None
                } else {
                    Some(parse_u32(key, value)?)
                };
            }
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "a boolean",
        }),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.retry_attempts, 3);
        assert!(settings.remember_paths);
        assert!(!settings.auto_delete_originals);
        assert!(settings.expected_file_count.is_none());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let settings: Settings = serde_yaml_ng::from_str("auto_delete_originals: true\n").unwrap();
        assert!(settings.auto_delete_originals);
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert!(settings.sound_notifications);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let yaml = "batch_size: 12\ntheme: dark\nwindow_width: 800\n";
        let settings: Settings = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(settings.batch_size, 12);
    }

    #[test]
    fn test_validate_clamps() {
        let mut settings = Settings {
            batch_size: 0,
            retry_attempts: 99,
            expected_file_count: Some(0),
            ..Settings::default()
        };

        let adjusted = settings.validate();

        assert_eq!(adjusted, vec!["batch_size", "retry_attempts", "expected_file_count"]);
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.retry_attempts, MAX_RETRY_ATTEMPTS);
        assert_eq!(settings.expected_file_count, None);
    }

    #[test]
    fn test_validate_leaves_good_values() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_empty());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_set_field() {
        let mut settings = Settings::default();

        settings.set_field("auto_delete_originals", "yes").unwrap();
        settings.set_field("batch_size", "25").unwrap();
        settings.set_field("default_output_path", "C:/Reports/Out").unwrap();
        settings.set_field("expected_file_count", "9").unwrap();

        assert!(settings.auto_delete_originals);
        assert_eq!(settings.batch_size, 25);
        assert_eq!(settings.default_output_path, "C:/Reports/Out");
        assert_eq!(settings.expected_file_count, Some(9));

        settings.set_field("expected_file_count", "none").unwrap();
        assert_eq!(settings.expected_file_count, None);
    }

    #[test]
    fn test_set_field_errors() {
        let mut settings = Settings::default();

        assert_eq!(
            settings.set_field("colour", "red"),
            Err(SettingsError::UnknownKey("colour".to_string()))
        );
        assert!(matches!(
            settings.set_field("batch_size", "-1"),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert!(matches!(
            settings.set_field("remember_paths", "maybe"),
            Err(SettingsError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_keys_are_settable() {
        let mut settings = Settings::default();
        for key in Settings::KEYS {
            let value = match key {
                "default_input_path" | "default_output_path" => "x",
                "batch_size" | "retry_attempts" | "expected_file_count" => "1",
                _ => "true",
            };
            assert!(settings.set_field(key, value).is_ok(), "key {key} rejected");
        }
    }
}
