//! `tracing` subscriber setup.
//!
//! The filter comes from `RUST_LOG` when set, then from [`LogConfig::filter`],
//! then from the configured level. HTTP and SQLite internals are held at
//! `warn` unless a filter says otherwise.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,rusqlite=warn";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event, fields flattened.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Print file and line of each event (pretty format only).
    pub with_location: bool,
    /// Directive string, e.g. `"eleganto_sw=debug,eleganto_cache=trace"`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose worker output with source locations.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            with_location: true,
            ..Default::default()
        }
    }

    /// JSON at info, for log shippers.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn directives(&self) -> String {
        match self.filter {
            Some(ref filter) => filter.clone(),
            None => format!("{},{}", self.level, QUIET_DEPENDENCIES),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives()))
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Install the global subscriber. Returns `false` when one was already
/// installed; the existing subscriber stays in place.
pub fn init_logging(config: LogConfig) -> bool {
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_location)
            .with_line_number(config.with_location)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter())
        .try_init()
        .is_ok();

    if !installed {
        tracing::debug!("Logging already initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_dependencies() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.directives().starts_with("INFO,"));
        assert!(config.directives().contains("reqwest=warn"));
    }

    #[test]
    fn test_custom_filter_replaces_directives() {
        let config = LogConfig::debug().with_filter("eleganto_sw=trace");
        assert_eq!(config.directives(), "eleganto_sw=trace");
        assert!(config.with_location);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_is_rejected() {
        init_logging(LogConfig::production());
        assert!(!init_logging(LogConfig::default().with_format(LogFormat::Compact)));
    }
}
