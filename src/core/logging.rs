//! Subscriber setup for applications embedding the data layer.
//!
//! The library only emits `tracing` events; nothing here runs unless the host
//! calls [`init`] (or [`init_from_env`]).

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "DAYLINE_LOG";
pub const LOG_FORMAT_ENV: &str = "DAYLINE_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "DAYLINE_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" | "pretty" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Verbosity requested by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to tracing filter string.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

/// Logging settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Option<LogLevel>,
    pub format: Option<LogFormat>,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Read `DAYLINE_LOG`, `DAYLINE_LOG_FORMAT` and `DAYLINE_LOG_FILE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LogSettings::from_env`] with an explicit variable lookup.
    /// Blank and unrecognized values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            level: non_empty(LOG_LEVEL_ENV).and_then(|v| LogLevel::from_arg(&v)),
            format: non_empty(LOG_FORMAT_ENV).and_then(|v| LogFormat::from_arg(&v)),
            file: non_empty(LOG_FILE_ENV).map(PathBuf::from),
        }
    }
}

/// Install a subscriber configured from the environment.
pub fn init_from_env(verbose: bool) {
    let settings = LogSettings::from_env();
    init(
        settings.level.unwrap_or_default(),
        settings.format.unwrap_or_default(),
        settings.file,
        verbose,
    );
}

/// Install a global subscriber. Later calls are ignored.
///
/// `RUST_LOG` takes precedence over `level`. An unopenable `log_file` falls
/// back to stderr.
pub fn init(level: LogLevel, format: LogFormat, log_file: Option<PathBuf>, verbose: bool) {
    let level = if verbose && matches!(level, LogLevel::Warn | LogLevel::Error) {
        LogLevel::Debug
    } else {
        level
    };

    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
    });

    let make_writer = |file: Option<&std::fs::File>| -> BoxMakeWriter {
        if let Some(file) = file.and_then(|inner| inner.try_clone().ok()) {
            BoxMakeWriter::new(file)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    let make_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("dayline={}", level.as_filter())))
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .json()
                .with_writer(make_writer(file.as_ref()))
                .with_span_events(FmtSpan::CLOSE)
                .try_init()
                .ok();
        }
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .compact()
                .with_writer(make_writer(file.as_ref()))
                .with_target(true)
                .try_init()
                .ok();
        }
        LogFormat::Human => {
            tracing_subscriber::fmt()
                .with_env_filter(make_filter())
                .with_writer(make_writer(file.as_ref()))
                .with_target(false)
                .try_init()
                .ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn settings_from_variables() {
        let settings = LogSettings::from_lookup(lookup(&[
            (LOG_LEVEL_ENV, "trace"),
            (LOG_FORMAT_ENV, "JSON"),
            (LOG_FILE_ENV, "/tmp/dayline.log"),
        ]));
        assert_eq!(settings.level, Some(LogLevel::Trace));
        assert_eq!(settings.format, Some(LogFormat::Json));
        assert_eq!(settings.file, Some(PathBuf::from("/tmp/dayline.log")));
    }

    #[test]
    fn blank_and_unknown_values_ignored() {
        let settings = LogSettings::from_lookup(lookup(&[
            (LOG_LEVEL_ENV, "loud"),
            (LOG_FORMAT_ENV, "  "),
        ]));
        assert_eq!(settings, LogSettings::default());
    }

    #[test]
    fn level_aliases() {
        assert_eq!(LogLevel::from_arg("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_arg("verbose"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_arg("critical"), Some(LogLevel::Error));
        assert_eq!(LogLevel::Info.as_tracing_level(), Level::INFO);
        assert_eq!(LogLevel::default().as_filter(), "warn");
    }
}
