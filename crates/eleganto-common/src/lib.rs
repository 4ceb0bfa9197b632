//! # Eleganto Common
//!
//! Pieces shared by every crate of the offline worker:
//!
//! - [`ElegantoError`], the error type of configuration loading and bounded
//!   operations, with a stable [`ElegantoError::category`] for log fields
//! - [`logging`]: `tracing` subscriber setup
//! - [`timeout`]: optional deadlines around network work
//! - [`load_json`]: JSON settings files

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::{with_optional_timeout, with_timeout};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors shared across the worker crates.
#[derive(Error, Debug)]
pub enum ElegantoError {
    /// A setting is missing, malformed or inconsistent.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded operation ran past its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ElegantoError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ElegantoError::Timeout(_) | ElegantoError::Io(_))
    }

    /// Short category name for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ElegantoError::Config { .. } => "config",
            ElegantoError::Io(_) => "io",
            ElegantoError::Timeout(_) => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, ElegantoError>;

/// Read a JSON settings file. Missing files surface as `Io`, malformed ones
/// as `Config` naming the file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        ElegantoError::config_with_source(format!("invalid settings file {}", path.display()), e)
    })
}
