use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Once};

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{LevelFilter, ParseError};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A level (`debug`, `warning`, ...) or full filter directives such as
    /// `info,arbor.model=trace`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Log file, appended to. Logging goes on without it if it can't be opened.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Filter directives: the configured level first, then `RUST_LOG`, so the
    /// environment wins for any target both mention.
    pub fn directives(&self) -> String {
        let level = match self.level.trim() {
            "" => "info",
            level if level.eq_ignore_ascii_case("warning") => "warn",
            level => level,
        };
        match std::env::var("RUST_LOG") {
            Ok(env) if !env.trim().is_empty() => format!("{level},{}", env.trim()),
            _ => level.to_owned(),
        }
    }

    /// Parses [`directives`](Self::directives) on top of an `info` default.
    pub fn env_filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(self.directives())
    }

    fn open_file(&self) -> Option<Result<Arc<File>, (PathBuf, std::io::Error)>> {
        let path = self.file.as_ref()?;
        Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Arc::new)
                .map_err(|err| (path.clone(), err)),
        )
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber. Only the first call does anything.
///
/// Bad filter directives fall back to `info` and a bad log file drops the file
/// sink; both are logged once the subscriber is up.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let (filter, bad_directives) = match config.env_filter() {
            Ok(filter) => (filter, None),
            Err(err) => (EnvFilter::new("info"), Some(err)),
        };

        let (file, bad_file) = match config.open_file() {
            Some(Ok(file)) => (Some(file), None),
            Some(Err(failure)) => (None, Some(failure)),
            None => (None, None),
        };

        // Test output capture only sees the stdlib print macros.
        let stderr = || {
            if cfg!(debug_assertions) {
                BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
            } else {
                BoxMakeWriter::new(std::io::stderr)
            }
        };
        let writer = match (config.stderr, file) {
            (true, Some(file)) => BoxMakeWriter::new(stderr().and(file)),
            (true, None) => stderr(),
            (false, Some(file)) => BoxMakeWriter::new(file),
            (false, None) => BoxMakeWriter::new(std::io::sink),
        };

        let fmt = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            fmt.json().boxed()
        } else {
            fmt.boxed()
        };

        let registry = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(registry).is_err() {
            return;
        }
        if let Some(err) = bad_directives {
            tracing::warn!(
                target = "arbor.config",
                level = %config.level,
                error = %err,
                "invalid log filter; using info"
            );
        }
        if let Some((path, err)) = bad_file {
            tracing::warn!(
                target = "arbor.config",
                path = %path.display(),
                error = %err,
                "failed to open log file; file logging disabled"
            );
        }
    });
}
