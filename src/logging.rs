//! Tracing configuration and log routing.
//!
//! Ingestion workers and the HTTP server log to stdout with a compact formatter and, unless
//! disabled, to a file through a non-blocking writer. `RUSTY_DOCS_LOG_FILE` picks the file:
//! a path appends there, `off` disables file logging, and leaving it unset writes
//! `logs/rusty-docs.log`.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "RUSTY_DOCS_LOG_FILE";
const LOG_DIR: &str = "logs";
const LOG_FILE_NAME: &str = "rusty-docs.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs go.
#[derive(Debug, PartialEq, Eq)]
enum LogFile {
    /// Append to an explicit path.
    Path(PathBuf),
    /// `logs/rusty-docs.log` under the working directory.
    Default,
    /// Stdout only.
    Disabled,
}

impl LogFile {
    fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Default,
            Some(value) if value.eq_ignore_ascii_case("off") => Self::Disabled,
            Some(path) => Self::Path(PathBuf::from(path)),
        }
    }
}

/// Configure tracing subscribers for stdout and optional file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Keeps the non-blocking writer's guard alive for the process lifetime.
///
/// Calling it again leaves the first subscriber in place and logs that through it.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let file_layer = file_writer(LogFile::from_setting(
        std::env::var(LOG_FILE_ENV).ok().as_deref(),
    ))
    .map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
    if let Err(error) = installed {
        tracing::debug!(error = %error, "Tracing subscriber already installed; keeping it");
    }
}

/// Open the non-blocking writer for `target`, or `None` when file logging is off or unavailable.
fn file_writer(target: LogFile) -> Option<NonBlocking> {
    let (non_blocking, guard) = match target {
        LogFile::Disabled => return None,
        LogFile::Path(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        LogFile::Default => {
            if let Err(err) = std::fs::create_dir_all(LOG_DIR) {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                LOG_DIR,
                LOG_FILE_NAME,
            ))
        }
    };
    if LOG_GUARD.set(guard).is_err() {
        eprintln!("File logging already initialized; ignoring second writer");
        return None;
    }
    Some(non_blocking)
}
