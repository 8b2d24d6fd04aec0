//! Logging configuration and initialization
//!
//! All datapipe binaries log through `tracing`. The subscriber is assembled
//! here from a [`LogConfig`], which is normally read from the environment:
//!
//! - `LOG_LEVEL`: trace, debug, info, warn, error
//! - `LOG_OUTPUT`: console, file, both
//! - `LOG_FORMAT`: text, json
//! - `LOG_DIR`: directory for daily rolling log files
//! - `LOG_FILE_PREFIX`: log file name prefix
//! - `LOG_FILTER`: extra filter directives, e.g. `sqlx=warn,rumqttc=info`
//!
//! Use structured fields rather than formatted strings:
//!
//! ```rust,ignore
//! tracing::info!(pipeline = %name, records = rows.len(), "Import finished");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    filter::Directive,
    EnvFilter, Layer, Registry,
};

use crate::env;
use crate::error::DatapipeError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Minimum level of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// `-v` count to level: none is info, one is debug, more is trace
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

fn unknown(kind: &str, value: &str) -> DatapipeError {
    DatapipeError::config(format!("Unknown log {kind} {value:?}"))
}

impl FromStr for LogLevel {
    type Err = DatapipeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if wanted == "warning" {
            return Ok(LogLevel::Warn);
        }
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == wanted)
            .ok_or_else(|| unknown("level", s))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        self != LogOutput::File
    }

    fn file(self) -> bool {
        self != LogOutput::Console
    }
}

impl FromStr for LogOutput {
    type Err = DatapipeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "console" | "stdout" => LogOutput::Console,
            "file" => LogOutput::File,
            "both" | "all" => LogOutput::Both,
            _ => return Err(unknown("output", s)),
        })
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = DatapipeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "text" | "pretty" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => return Err(unknown("format", s)),
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for log files when output includes a file
    pub log_dir: PathBuf,
    /// File name prefix, e.g. "datapipe-stream" -> "datapipe-stream.2024-01-18"
    pub log_file_prefix: String,
    /// Additional filter directives appended to the level directive
    pub filter_directives: Option<String>,
    /// Include file and line number in each event
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "datapipe".to_string(),
            filter_directives: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Load configuration from the `LOG_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields with whichever `LOG_*` variables are set
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = env::var_opt("LOG_LEVEL") {
            self.level = level.parse()?;
        }
        if let Some(output) = env::var_opt("LOG_OUTPUT") {
            self.output = output.parse()?;
        }
        if let Some(format) = env::var_opt("LOG_FORMAT") {
            self.format = format.parse()?;
        }
        self.log_dir = env::var_opt("LOG_DIR").map(PathBuf::from).unwrap_or(self.log_dir);
        self.log_file_prefix = env::var_opt("LOG_FILE_PREFIX").unwrap_or(self.log_file_prefix);
        self.filter_directives = env::var_opt("LOG_FILTER").or(self.filter_directives);
        self.include_location = env::flag("LOG_INCLUDE_LOCATION", self.include_location)?;
        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    fn filter(&self) -> Result<EnvFilter> {
        let base = EnvFilter::builder()
            .with_default_directive(self.level.to_tracing_level().into())
            .from_env_lossy();
        env::split_list(self.filter_directives.as_deref().unwrap_or_default()).try_fold(base, |filter, raw| {
            let directive = raw
                .parse::<Directive>()
                .with_context(|| format!("Invalid LOG_FILTER directive {raw:?}"))?;
            Ok(filter.add_directive(directive))
        })
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_file(self.include_location)
            .with_line_number(self.include_location);
        match self.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Builder for [`LogConfig`], starting from the defaults
#[derive(Default)]
pub struct LogConfigBuilder {
    inner: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(self, level: LogLevel) -> Self {
        self.with(|c| c.level = level)
    }

    pub fn output(self, output: LogOutput) -> Self {
        self.with(|c| c.output = output)
    }

    pub fn format(self, format: LogFormat) -> Self {
        self.with(|c| c.format = format)
    }

    pub fn log_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.with(|c| c.log_dir = dir)
    }

    pub fn log_file_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with(|c| c.log_file_prefix = prefix)
    }

    pub fn filter_directives(self, directives: impl Into<String>) -> Self {
        let directives = directives.into();
        self.with(|c| c.filter_directives = Some(directives))
    }

    fn with(mut self, apply: impl FnOnce(&mut LogConfig)) -> Self {
        apply(&mut self.inner);
        self
    }

    pub fn build(self) -> LogConfig {
        self.inner
    }
}

/// Daily rolling file writer under `log_dir`. The worker guard is leaked so
/// buffered lines are still written during shutdown.
fn file_writer(config: &LogConfig) -> Result<tracing_appender::non_blocking::NonBlocking> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;
    let rolling = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(rolling);
    std::mem::forget(guard);
    Ok(writer)
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let console = config
        .output
        .console()
        .then(|| config.layer(std::io::stdout, true));
    let file = match config.output.file() {
        true => Some(config.layer(file_writer(config)?, false)),
        false => None,
    };

    tracing_subscriber::registry()
        .with(console.into_iter().chain(file).collect::<Vec<BoxedLayer>>())
        .with(config.filter()?)
        .try_init()
        .context("Tracing subscriber already installed")?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(5), LogLevel::Trace);
    }

    #[test]
    fn test_output_targets() {
        let both: LogOutput = "all".parse().unwrap();
        assert!(both.console() && both.file());
        assert!(!LogOutput::File.console());
        assert!("syslog".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::builder()
            .level(LogLevel::Debug)
            .format(LogFormat::Json)
            .log_file_prefix("datapipe-stream")
            .filter_directives("sqlx=warn")
            .build();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file_prefix, "datapipe-stream");
        assert!(config.filter().is_ok());
    }

    #[test]
    #[serial]
    fn test_merge_env_overrides_builder() {
        std::env::set_var("LOG_FORMAT", "json");
        std::env::set_var("LOG_FILE_PREFIX", "from-env");
        let config = LogConfig::builder()
            .log_file_prefix("from-builder")
            .build()
            .merge_env()
            .unwrap();
        std::env::remove_var("LOG_FORMAT");
        std::env::remove_var("LOG_FILE_PREFIX");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file_prefix, "from-env");
    }
}
