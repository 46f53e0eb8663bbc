use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::Local;
use std::fmt;
use std::fs;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the log folder created beside the executable
pub const LOG_DIR_NAME: &str = "logs";

/// Prefix of the daily log files (`xlsx-utility.YYYY-MM-DD.log`)
pub const LOG_FILE_PREFIX: &str = "xlsx-utility";

/// Event field that turns an info line into a SUCCESS line
pub const SUCCESS_FIELD: &str = "success";

/// Log an info event rendered with the SUCCESS level label.
///
/// ```ignore
/// success!("Converted {} to {}", source, output);
/// ```
#[macro_export]
macro_rules! success {
    ($($arg:tt)+) => {
        ::tracing::info!(success = true, $($arg)+)
    };
}

/// Keeps the background log writer alive.
///
/// Dropping the guard flushes pending lines, so `main` holds it until exit.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
    file_logging: bool,
}

impl LoggingGuard {
    /// Whether lines are reaching the daily log file
    pub fn file_logging(&self) -> bool {
        self.file_logging
    }
}

/// Setup logging with a daily log file and optional console mirror.
///
/// Never fails: when the log folder or file cannot be created, logging
/// degrades to console-only output and a warning is emitted there.
///
/// # Arguments
/// * `log_dir` - Directory for log files (created if absent)
/// * `log_prefix` - Prefix for log files (e.g., "xlsx-utility")
/// * `detailed` - If true, use debug level; otherwise use info level
/// * `console_output` - If true, also write lines to stderr
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    log_dir: &Utf8Path,
    log_prefix: &str,
    detailed: bool,
    console_output: bool,
) -> LoggingGuard {
    // RUST_LOG wins over the settings toggle
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if detailed { "debug" } else { "info" }));

    let (file_writer, file_guard, file_error) = match open_log_appender(log_dir, log_prefix) {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(non_blocking), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };
    let file_logging = file_writer.is_some();

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .event_format(LogLineFormat)
    });

    let console_layer = (console_output || !file_logging).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .event_format(LogLineFormat)
    });

    let init_result = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    if let Err(e) = init_result {
        tracing::debug!("Logging already initialized: {}", e);
    }

    if let Some(e) = file_error {
        tracing::warn!("File logging unavailable, using console only: {:#}", e);
    }

    tracing::debug!(
        "Logging initialized: dir={}, prefix={}, detailed={}, console={}",
        log_dir,
        log_prefix,
        detailed,
        console_output
    );

    LoggingGuard {
        _file_guard: file_guard,
        file_logging,
    }
}

/// Run `f` with warnings and errors printed to stderr.
///
/// Used for work that happens before [`setup_logging`] can be configured,
/// such as loading the settings that configure it.
pub fn with_bootstrap_logging<R>(f: impl FnOnce() -> R) -> R {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .event_format(LogLineFormat)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Create the log directory and a daily rolling appender inside it
pub fn open_log_appender(log_dir: &Utf8Path, log_prefix: &str) -> Result<RollingFileAppender> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(log_prefix)
        .filename_suffix("log")
        .build(log_dir)
        .with_context(|| format!("Failed to open log file in {}", log_dir))
}

/// Label written between the brackets of a log line
pub fn level_label(level: &Level, success: bool) -> &'static str {
    if success {
        return "SUCCESS";
    }
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Event formatter producing `[yyyy-MM-dd HH:mm:ss.fff] [LEVEL] message key=value`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineFormat;

impl<S, N> FormatEvent<S, N> for LogLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        write!(
            writer,
            "[{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level_label(event.metadata().level(), visitor.success),
            visitor.message
        )?;

        for (name, value) in &visitor.fields {
            write!(writer, " {}={}", name, value)?;
        }

        writeln!(writer)
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: Vec<(&'static str, String)>,
    success: bool,
}

impl Visit for LineVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == SUCCESS_FIELD {
            self.success = value;
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name(), format!("{:?}", value)));
        }
    }
}
