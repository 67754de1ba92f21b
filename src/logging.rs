//! Host process logging.
//!
//! Platform events (deploys, builds, invocation outcomes, sandbox teardown)
//! are written to `{log_dir}/{app_name}.log`, rotated daily. The directory
//! defaults to `fnbox/logs` under the local data dir. `console = true` adds a
//! stderr layer that honours `RUST_LOG`.
//!
//! Invocation logs captured from user code never pass through here; they are
//! stored on the invocation record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Flushes the file writer when the process exits.
static FILE_WRITER: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// The `[logging]` section.
///
/// ```rust
/// use fnbox::logging::{LogLevel, LoggingConfig};
///
/// let config = LoggingConfig::disabled().with_console(true);
/// assert!(!config.enabled);
/// assert_eq!(config.level, LogLevel::Info);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write the rotated log file.
    pub enabled: bool,
    /// File stem of the log file.
    pub app_name: String,
    /// Overrides the data-dir default.
    pub log_dir: Option<PathBuf>,
    pub level: LogLevel,
    /// Mirror events to stderr.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "fnbox".to_string(),
            log_dir: None,
            level: LogLevel::Info,
            console: false,
        }
    }
}

impl LoggingConfig {
    /// File logging off, console off. Tests and embedders use this.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Returns where the log file goes, or `None` when no data dir exists.
    #[must_use]
    pub fn directory(&self) -> Option<PathBuf> {
        self.log_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join("fnbox").join("logs")))
    }

    fn file_name(&self) -> String {
        format!("{}.log", self.app_name)
    }
}

/// Minimum level written by either layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Why the subscriber could not be installed.
#[derive(Debug)]
pub struct LoggingError {
    kind: Box<LoggingErrorKind>,
}

#[derive(Debug)]
enum LoggingErrorKind {
    NoDirectory,
    Directory { path: PathBuf, source: io::Error },
    Install(String),
}

impl LoggingError {
    fn directory(path: &Path, source: io::Error) -> Self {
        Self {
            kind: Box::new(LoggingErrorKind::Directory {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Returns true if no log directory could be determined.
    #[must_use]
    pub fn is_no_directory(&self) -> bool {
        matches!(*self.kind, LoggingErrorKind::NoDirectory)
    }
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.kind {
            LoggingErrorKind::NoDirectory => {
                write!(f, "no local data directory; set logging.log_dir")
            }
            LoggingErrorKind::Directory { path, source } => {
                write!(f, "cannot create log directory '{}': {source}", path.display())
            }
            LoggingErrorKind::Install(reason) => {
                write!(f, "cannot install log subscriber: {reason}")
            }
        }
    }
}

impl std::error::Error for LoggingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.kind {
            LoggingErrorKind::Directory { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Installs the process-wide subscriber.
///
/// Returns `Ok(false)` if nothing is enabled or a previous call already
/// installed it.
///
/// # Errors
///
/// Fails when the log directory cannot be resolved or created, or when some
/// other subscriber owns the global default.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, LoggingError> {
    if FILE_WRITER.get().is_some() || !(config.enabled || config.console) {
        return Ok(false);
    }

    let mut guard = None;
    let file = if config.enabled {
        let dir = config.directory().ok_or_else(|| LoggingError {
            kind: Box::new(LoggingErrorKind::NoDirectory),
        })?;
        std::fs::create_dir_all(&dir).map_err(|e| LoggingError::directory(&dir, e))?;
        let appender = tracing_appender::rolling::daily(&dir, config.file_name());
        let (writer, flush) = tracing_appender::non_blocking(appender);
        guard = Some(flush);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::from(config.level)),
        )
    } else {
        None
    };

    let console = config.console.then(|| {
        let level = LevelFilter::from(config.level);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .with_filter(filter)
    });

    tracing_subscriber::registry()
        .with(file)
        .with(console)
        .try_init()
        .map_err(|e| LoggingError {
            kind: Box::new(LoggingErrorKind::Install(e.to_string())),
        })?;
    let _ = FILE_WRITER.set(guard);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_fnbox_log_at_info_by_default() {
        let config = LoggingConfig::default();
        assert!(config.enabled);
        assert!(!config.console);
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.file_name(), "fnbox.log");
    }

    #[test]
    fn nothing_enabled_installs_nothing() {
        assert!(!init_logging(&LoggingConfig::disabled()).unwrap());
    }

    #[test]
    fn explicit_directory_wins() {
        let config = LoggingConfig {
            log_dir: Some(PathBuf::from("/var/log/fnbox")),
            ..LoggingConfig::default()
        };
        assert_eq!(config.directory(), Some(PathBuf::from("/var/log/fnbox")));
    }

    #[test]
    fn levels_map_onto_filters() {
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Error), LevelFilter::ERROR);
    }

    #[test]
    fn section_parses_from_toml() {
        let config: LoggingConfig =
            toml::from_str("level = \"debug\"\nconsole = true\napp_name = \"edge\"").unwrap();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.console);
        assert!(config.enabled);
        assert_eq!(config.file_name(), "edge.log");
    }

    #[test]
    fn directory_error_keeps_io_source() {
        let error = LoggingError::directory(
            Path::new("/nope"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/nope"));
        assert!(std::error::Error::source(&error).is_some());
        assert!(!error.is_no_directory());
    }
}
