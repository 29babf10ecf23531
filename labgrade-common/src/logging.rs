//! Logging setup for harness binaries.
//!
//! Logs go to stderr and, optionally, to a JSON-lines file. stdout is left
//! alone: it carries the score report.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::EnvParser;
use crate::errors::{GradeError, GradeResult};

/// How logging should be initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `labgrade_common::session=debug`.
    pub filter: String,
    /// Emit human-readable logs on stderr.
    pub stderr: bool,
    /// Also write JSON lines to this file.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Read `GRADE_LOG` and `GRADE_LOG_FILE`, falling back to `default_level`.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let filter = parser
            .get_optional_string("LOG")
            .value
            .unwrap_or_else(|| default_level.to_string());
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);
        Self {
            filter,
            stderr: false,
            file,
        }
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: &str) -> Self {
        self.filter = level.to_string();
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Install the global subscriber.
///
/// The returned guards flush the file writer when dropped; keep them alive
/// for the life of the program.
pub fn init_logging(config: &LogConfig) -> GradeResult<Vec<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| GradeError::Config(format!("invalid log filter '{}': {e}", config.filter)))?;

    let mut guards = Vec::new();

    let file_layer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            guards.push(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true),
            )
        }
        None => None,
    };

    let stderr_layer = config.stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| GradeError::Config(format!("logging already initialised: {e}")))?;

    Ok(guards)
}
