//! Logging setup shared by the server and client binaries
//!
//! Two sinks: the main log (text or JSON, stderr or a file) filtered by
//! `logging.level` or `RUST_LOG`, and the error log, which receives only the
//! events emitted through [`report`](crate::error::report).

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ERROR_LOG_TARGET;
use crate::{Error, Result};
use std::path::Path;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter admitting only error-log events
pub fn error_log_filter() -> Targets {
    Targets::new().with_target(ERROR_LOG_TARGET, Level::ERROR)
}

/// Plain-text layer that records error-log events and nothing else
pub fn error_log_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(error_log_filter())
}

/// Install the global subscriber described by `logging`
///
/// The returned guards flush the non-blocking writers and must be held until
/// the process exits.
///
/// # Errors
///
/// [`Error::Config`] if a log path has no file name or a subscriber is
/// already installed.
pub fn init(logging: &LoggingConfig) -> Result<Vec<WorkerGuard>> {
    let mut guards = Vec::new();

    let (writer, guard) = match logging.file {
        Some(ref path) => tracing_appender::non_blocking(file_appender(path)?),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    guards.push(guard);

    let main_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer().with_writer(writer).boxed(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let error_layer = match logging.error_log {
        Some(ref path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            guards.push(guard);
            Some(error_log_layer(writer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(main_layer.with_filter(filter))
        .with(error_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logging: {e}")))?;

    Ok(guards)
}

fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("{} must include a file name", path.display())))?;
    Ok(tracing_appender::rolling::never(dir, file_name))
}
