//! Logging setup for the forkpool binary and host programs.
//!
//! # Environment Variables
//!
//! - `FORKPOOL_LOG` - Log filter (overrides RUST_LOG)
//! - `FORKPOOL_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `FORKPOOL_LOG_FORMAT` - Output format: pretty, compact, json
//! - `FORKPOOL_LOG_FILE` - Path to log file (in addition to stderr)
//! - `FORKPOOL_LOG_ROTATION` - Log file rotation: hourly, daily, never
//! - `FORKPOOL_LOG_SPANS` - Log span timing on close (1, true, yes)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Child processes never install a subscriber: their standard error is
//! reserved for the wire protocol.
//!
//! # Example
//!
//! ```no_run
//! use forkpool::logging::{LogConfig, init};
//!
//! init(LogConfig::default().with_env_overrides());
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Single-line output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Rotation of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    Daily,
    /// Single file (default)
    #[default]
    Never,
}

impl FromStr for LogRotation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(format!(
                "Unknown log rotation: '{}'. Valid options: hourly, daily, never",
                s
            )),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: WARN)
    pub level: Level,
    pub format: LogFormat,
    /// Log file written in addition to stderr
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Log span timing on close
    pub span_events: bool,
    /// Filter directives; takes precedence over `level`
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::default(),
            file_path: None,
            rotation: LogRotation::default(),
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Show collector thread names and ids, useful when debugging completions.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.show_thread_ids = enabled;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter already set from the command line wins over `FORKPOOL_LOG`,
    /// `RUST_LOG` and `FORKPOOL_LOG_LEVEL`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("FORKPOOL_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none()
            && let Ok(level) = std::env::var("FORKPOOL_LOG_LEVEL")
        {
            self.level = parse_level(&level).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("FORKPOOL_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Ok(path) = std::env::var("FORKPOOL_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        if let Ok(rotation) = std::env::var("FORKPOOL_LOG_ROTATION")
            && let Ok(r) = rotation.parse()
        {
            self.rotation = r;
        }

        if let Ok(spans) = std::env::var("FORKPOOL_LOG_SPANS") {
            self.span_events = matches!(spans.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// A formatting layer for `writer` in the configured format.
    fn format_layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        match self.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_span_events(self.span_events())
                .with_target(self.show_target)
                .with_thread_names(self.show_thread_ids)
                .with_writer(writer)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_span_events(self.span_events())
                .with_target(self.show_target)
                .with_thread_ids(self.show_thread_ids)
                .with_thread_names(self.show_thread_ids)
                .with_ansi(ansi)
                .with_writer(writer)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_span_events(self.span_events())
                .with_target(self.show_target)
                .with_thread_ids(self.show_thread_ids)
                .with_thread_names(self.show_thread_ids)
                .with_ansi(ansi)
                .with_writer(writer)
                .boxed(),
        }
    }

    fn file_appender(&self) -> Option<RollingFileAppender> {
        let path = self.file_path.as_ref()?;
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("forkpool.log");
        Some(RollingFileAppender::new(
            self.rotation.into(),
            parent,
            file_name,
        ))
    }

    fn layers(&self) -> Vec<BoxedLayer> {
        let mut layers = vec![self.format_layer(std::io::stderr, true)];
        if let Some(appender) = self.file_appender() {
            layers.push(self.format_layer(appender, false));
        }
        layers
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Install the global tracing subscriber: stderr plus the optional log file.
///
/// Subsequent calls are silently ignored.
pub fn init(config: LogConfig) {
    let _ = tracing_subscriber::registry()
        .with(config.layers())
        .with(config.build_filter())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_log_rotation_from_str() {
        assert_eq!("daily".parse::<LogRotation>().unwrap(), LogRotation::Daily);
        assert_eq!("never".parse::<LogRotation>().unwrap(), LogRotation::Never);
        assert!("weekly".parse::<LogRotation>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.format, LogFormat::default());
        assert_eq!(config.rotation, LogRotation::Never);
        assert!(!config.span_events);
        assert!(config.file_path.is_none());
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new()
            .with_level(Level::DEBUG)
            .with_format(LogFormat::Json)
            .with_filter("forkpool=trace".into())
            .with_thread_ids(true)
            .with_file(PathBuf::from("/tmp/forkpool.log"));

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("forkpool=trace"));
        assert!(config.show_thread_ids);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/forkpool.log")));
    }

    #[test]
    fn test_file_layer_is_added() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::new().with_file(dir.path().join("forkpool.log"));
        assert_eq!(config.layers().len(), 2);
        assert_eq!(LogConfig::new().layers().len(), 1);
    }

    #[test]
    fn test_filter_directive_wins_over_level() {
        let config = LogConfig::new()
            .with_level(Level::ERROR)
            .with_filter("debug".into());
        assert_eq!(config.build_filter().to_string(), "debug");
    }
}
