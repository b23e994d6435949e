//! Structured logging system using tracing.
//!
//! Provides configurable logging with:
//! - Human-readable console output on stderr
//! - Optional file output with JSON formatting and rotation

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Crates whose events pass the console and file filters at the chosen level.
const OWN_TARGETS: [&str; 2] = ["ytmux", "ytmux_core"];

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where log files are stored.
    pub log_directory: PathBuf,
    /// Log file name prefix (e.g., "ytmux" -> "ytmux.2024-01-15.log").
    pub log_file_prefix: String,
    /// Maximum log level for console output.
    pub console_level: Level,
    /// Maximum log level for file output.
    pub file_level: Level,
    /// How often to rotate log files.
    pub rotation: Rotation,
    /// Number of rotated log files to keep (0 = keep forever).
    pub max_log_files: usize,
    /// Whether to write a log file at all.
    pub file_enabled: bool,
    /// Whether to include ANSI color codes in console output.
    pub console_ansi: bool,
    /// Whether to include file/line info in logs.
    pub include_file_line: bool,
    /// Whether to include target module in logs.
    pub include_target: bool,
    /// Whether to log span events (enter/exit).
    pub log_span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Verbose configuration used with `--verbose`.
    #[must_use]
    pub fn development() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "ytmux".to_string(),
            console_level: Level::DEBUG,
            file_level: Level::TRACE,
            rotation: Rotation::DAILY,
            max_log_files: 7,
            file_enabled: true,
            console_ansi: true,
            include_file_line: true,
            include_target: true,
            log_span_events: true,
        }
    }

    /// Default configuration: progress on the console, details in the file.
    #[must_use]
    pub fn production() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "ytmux".to_string(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            rotation: Rotation::DAILY,
            max_log_files: 7,
            file_enabled: true,
            console_ansi: true,
            include_file_line: false,
            include_target: false,
            log_span_events: false,
        }
    }

    /// Pick a preset from the command-line verbosity flags.
    ///
    /// `quiet` wins over `verbose` and only lets warnings through on the console.
    #[must_use]
    pub fn from_verbosity(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::production().with_console_level(Level::WARN)
        } else if verbose {
            Self::development()
        } else {
            Self::production()
        }
    }

    /// Set the console log level.
    #[must_use]
    pub const fn with_console_level(mut self, level: Level) -> Self {
        self.console_level = level;
        self
    }

    /// Enable or disable the log file.
    #[must_use]
    pub const fn with_file(mut self, enabled: bool) -> Self {
        self.file_enabled = enabled;
        self
    }
}

/// Guard that keeps file logging active. Drop this to flush and close log files.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the logging system with the given configuration.
///
/// Returns a guard that must be kept alive for the duration of the process.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created, the file appender
/// cannot be built, or a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let span_events = if config.log_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // RUST_LOG overrides the console filter
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_spec(config.console_level)));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.console_ansi)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events.clone())
        .with_filter(console_filter);

    let (file_layer, file_guard) = if config.file_enabled {
        let appender = file_appender(config)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .json()
            .with_filter(EnvFilter::new(filter_spec(config.file_level)));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn file_appender(config: &LoggingConfig) -> Result<RollingFileAppender, LoggingError> {
    if !config.log_directory.exists() {
        std::fs::create_dir_all(&config.log_directory).map_err(|e| {
            LoggingError::DirectoryCreationFailed {
                path: config.log_directory.clone(),
                reason: e.to_string(),
            }
        })?;
    }

    let mut builder = RollingFileAppender::builder()
        .rotation(config.rotation.clone())
        .filename_prefix(&config.log_file_prefix)
        .filename_suffix("log");
    if config.max_log_files > 0 {
        builder = builder.max_log_files(config.max_log_files);
    }
    builder
        .build(&config.log_directory)
        .map_err(|e| LoggingError::AppenderFailed(e.to_string()))
}

/// Get the default log directory.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytmux")
        .join("logs")
}

/// Filter string: dependencies at `warn`, our crates at `level`.
fn filter_spec(level: Level) -> String {
    let level = level_to_directive(level);
    let mut spec = String::from("warn");
    for target in OWN_TARGETS {
        spec.push_str(&format!(",{target}={level}"));
    }
    spec
}

/// Convert a tracing Level to a filter directive string.
const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// The path that could not be created.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// The rolling file appender could not be built.
    #[error("Failed to open log file: {0}")]
    AppenderFailed(String),

    /// A global subscriber was already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
