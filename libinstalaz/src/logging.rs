//! Logging setup shared by the Instalaz server and CLI
//!
//! Output goes to stderr as plain text, JSON lines, or pretty-printed
//! records. `RUST_LOG` still overrides the level when set.
//!
//! ```no_run
//! use libinstalaz::logging::{LoggingConfig, LogFormat};
//!
//! LoggingConfig::from_env(Some(LogFormat::Json), false).init();
//! ```

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for piping)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Configuration for logging initialization
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// Create a new logging configuration
    ///
    /// # Arguments
    ///
    /// * `format` - Log output format (text, json, or pretty)
    /// * `level` - Minimum log level (error, warn, info, debug, trace)
    /// * `verbose` - If true, defaults to debug level
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Initialize logging with the configured settings
    ///
    /// Call once at startup. A second call is ignored.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        // Determine the filter based on verbose flag and level
        let filter = if self.verbose {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
        };

        match self.format {
            LogFormat::Json => {
                // One JSON object per line on stderr
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .flatten_event(true)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .try_init()
                    .ok();
            }
            LogFormat::Pretty => {
                tracing_subscriber::fmt()
                    .pretty()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .try_init()
                    .ok();
            }
            LogFormat::Text => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_level(true)
                    .try_init()
                    .ok();
            }
        }
    }
}

impl LoggingConfig {
    /// Build a configuration from `INSTALAZ_LOG_FORMAT` and `INSTALAZ_LOG_LEVEL`
    ///
    /// An explicit `format` (e.g. from a `--log-format` flag) wins over the
    /// environment. Falls back to text format at info level.
    pub fn from_env(format: Option<LogFormat>, verbose: bool) -> Self {
        let format = format
            .or_else(|| {
                std::env::var("INSTALAZ_LOG_FORMAT")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(LogFormat::Text);

        let level = std::env::var("INSTALAZ_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, verbose)
    }
}

/// Initialize logging with default settings
///
/// # Examples
///
/// ```bash
/// export INSTALAZ_LOG_FORMAT=json
/// export INSTALAZ_LOG_LEVEL=debug
/// instalaz-server
/// ```
pub fn init_default() {
    LoggingConfig::from_env(None, false).init();
}
