//! Logging setup for blueprint sync hosts, clients and the simulator
//!
//! Every component logs through `tracing`; this crate installs the global
//! subscriber that decides where those events go.
//!
//! # Features
//!
//! - **JSONL Output**: structured JSON lines for log aggregation (default)
//! - **Pretty Console**: human-readable output for development
//! - **File Rotation**: daily/hourly log rotation via tracing-appender
//! - **Node Spans**: tag every event emitted by one host or client with its name
//!
//! # Quick Start
//!
//! ```ignore
//! use blueprint_logging::{BlueprintSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = BlueprintSubscriberBuilder::new().try_init()?;
//!
//! // Pretty output while developing
//! let _guard = BlueprintSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//! ```

pub mod config;
pub mod error;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use error::{LogError, LogResult};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use tracing::Subscriber;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Boxed layer over any span-aware subscriber
type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Builder for configuring and installing the global subscriber
///
/// By default console output uses JSONL. Use `LogConfig::development()`
/// for human-readable output.
pub struct BlueprintSubscriberBuilder {
    config: LogConfig,
}

impl BlueprintSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Override the level of one target
    pub fn with_target_level(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config.filters.targets.insert(target.into(), level.into());
        self
    }

    /// The configuration that will be installed
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the filter: `RUST_LOG` when set, otherwise the default level plus target overrides
    pub fn env_filter(&self) -> LogResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let mut filter = EnvFilter::new(&self.config.default_level);
        for (target, level) in &self.config.filters.targets {
            let directive = format!("{target}={level}");
            let parsed: Directive = directive.parse().map_err(|e| LogError::Directive {
                directive: directive.clone(),
                reason: format!("{e}"),
            })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes file output when dropped and must be kept
    /// alive for the duration of the program.
    pub fn try_init(self) -> LogResult<Option<WorkerGuard>> {
        let env_filter = self.env_filter()?;

        let (file_layer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = file_writer(file_config)?;
                (Some(jsonl_layer(&self.config.jsonl, writer)), Some(guard))
            }
            None => (None, None),
        };

        let console_layer = self.config.console.enabled.then(|| {
            if self.config.console.pretty {
                fmt::layer()
                    .with_ansi(self.config.console.ansi)
                    .with_target(true)
                    .boxed()
            } else {
                jsonl_layer(&self.config.jsonl, std::io::stdout)
            }
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }

    /// Install the subscriber globally, reporting failure on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: failed to initialize logging: {e}");
                None
            }
        }
    }
}

impl Default for BlueprintSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn jsonl_layer<S, W>(jsonl: &JsonlConfig, writer: W) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_current_span(jsonl.include_current_span)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_thread_ids(jsonl.include_thread_info)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_writer(writer)
        .boxed()
}

/// Open the non-blocking file writer; `Never` truncates a single file, the rest append
fn file_writer(file_config: &FileConfig) -> LogResult<(NonBlocking, WorkerGuard)> {
    let rotation = match file_config.rotation {
        RotationStrategy::Never => {
            fs::create_dir_all(&file_config.directory)?;
            let path = file_config
                .directory
                .join(format!("{}.log", file_config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file_config.prefix.as_str())
        .filename_suffix("log");
    if let Some(max) = file_config.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder.build(&file_config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Span that tags every event emitted inside it with the node's name
///
/// ```ignore
/// let span = blueprint_logging::node_span("host", "server");
/// let _entered = span.enter();
/// tracing::info!("placement published");
/// ```
pub fn node_span(role: &str, name: &str) -> tracing::Span {
    tracing::info_span!("node", role = role, name = name)
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    BlueprintSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    BlueprintSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing; a subscriber installed earlier wins
pub fn init_testing() {
    let _ = BlueprintSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = BlueprintSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
        assert!(!builder.config().console.pretty);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = BlueprintSubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config().default_level, "debug");
        assert!(builder.config().console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = BlueprintSubscriberBuilder::new()
            .with_level("trace")
            .with_console(false)
            .with_target_level("blueprint_protocol", "debug");
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
        assert_eq!(builder.config().filters.targets["blueprint_protocol"], "debug");
    }

    #[test]
    fn test_invalid_target_level() {
        let builder = BlueprintSubscriberBuilder::new().with_target_level("blueprint", "loud");
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(builder.env_filter(), Err(LogError::Directive { .. })));
        }
    }

    #[test]
    fn test_single_file_writer() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig {
            directory: dir.path().join("nested"),
            prefix: "sim".to_string(),
            rotation: RotationStrategy::Never,
            max_files: None,
        };
        let (_writer, _guard) = file_writer(&config).unwrap();
        assert!(dir.path().join("nested").join("sim.log").exists());
    }

    #[test]
    fn test_rolling_file_writer() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig {
            directory: dir.path().to_path_buf(),
            rotation: RotationStrategy::Hourly,
            ..FileConfig::default()
        };
        assert!(file_writer(&config).is_ok());
    }
}
