//! Tracing setup for the CLI and any embedding front end.
//!
//! Console output always goes to stderr so command output on stdout stays
//! scriptable. Unless disabled in `[logging]`, each launch also gets its own
//! `modeldesk_<timestamp>.log` under the app logs directory; older launch
//! files beyond `keep_files` are pruned.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs;
use crate::config::LoggingSettings;

/// Environment variable holding an `EnvFilter` directive, e.g. `modeldesk=debug`.
/// Takes precedence over `logging.level`.
pub const LOG_FILTER_ENV: &str = "MODELDESK_LOG";

const LOG_FILE_PREFIX: &str = "modeldesk_";
const LOG_FILE_EXTENSION: &str = "log";
const FALLBACK_FILTER: &str = "info";
/// Launches within the same second get a numeric suffix; give up after this many.
const MAX_NAME_COLLISIONS: usize = 100;

static INSTALLED: OnceLock<Installed> = OnceLock::new();

struct Installed {
    log_file: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

/// Where log output ended up after [`init`].
#[derive(Debug)]
pub enum LogTarget {
    /// Stderr only, because file logging is switched off.
    Console,
    /// Stderr plus this launch's log file.
    File(PathBuf),
    /// Stderr only, because the log file could not be prepared.
    FileUnavailable(LoggingError),
}

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("No suitable directory available for logs")]
    NoLogDir,
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: io::Error,
    },
    #[error("Failed to read log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: io::Error,
    },
    #[error("Failed to create log file in {dir}: {source}")]
    CreateLogFile {
        dir: PathBuf,
        source: io::Error,
    },
    #[error("Failed to format log filename time: {0}")]
    FormatTime(#[from] time::error::Format),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install the global subscriber.
///
/// Only a failure to install the subscriber itself is an error; a log file
/// that cannot be created degrades to [`LogTarget::FileUnavailable`]. Later
/// calls report the target chosen by the first one.
pub fn init(settings: &LoggingSettings) -> Result<LogTarget, LoggingError> {
    if let Some(installed) = INSTALLED.get() {
        return Ok(installed
            .log_file
            .clone()
            .map_or(LogTarget::Console, LogTarget::File));
    }

    let (log_file, file_error) = if settings.file {
        match app_dirs::logs_dir()
            .map_err(map_app_dir_error)
            .and_then(|dir| open_launch_file(&dir, now_local_or_utc(), settings.keep_files))
        {
            Ok((path, file)) => (Some((path, file)), None),
            Err(err) => (None, Some(err)),
        }
    } else {
        (None, None)
    };

    let timer = build_timer();
    let console_layer = fmt::layer()
        .with_timer(timer.clone())
        .with_target(false)
        .with_writer(io::stderr);
    let (file_layer, guard, log_path) = match log_file {
        Some((path, file)) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(writer);
            (Some(layer), Some(guard), Some(path))
        }
        None => (None, None, None),
    };

    let subscriber = Registry::default()
        .with(build_env_filter(&settings.level))
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(Installed {
        log_file: log_path.clone(),
        _guard: guard,
    });

    Ok(match (log_path, file_error) {
        (Some(path), _) => {
            tracing::debug!("Writing log to {}", path.display());
            LogTarget::File(path)
        }
        (None, Some(err)) => LogTarget::FileUnavailable(err),
        (None, None) => LogTarget::Console,
    })
}

/// `MODELDESK_LOG` wins over the configured level; unparsable directives
/// fall back to `info`.
fn build_env_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Claim a fresh file for this launch, then prune older ones so that at most
/// `keep` launch files remain (the new one included).
fn open_launch_file(
    dir: &Path,
    now: OffsetDateTime,
    keep: usize,
) -> Result<(PathBuf, File), LoggingError> {
    let stamp = format_stamp(now)?;
    let mut claimed = None;
    for attempt in 0..MAX_NAME_COLLISIONS {
        let path = dir.join(launch_file_name(&stamp, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                claimed = Some((path, file));
                break;
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(LoggingError::CreateLogFile {
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        }
    }
    let (path, file) = claimed.ok_or_else(|| LoggingError::CreateLogFile {
        dir: dir.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{MAX_NAME_COLLISIONS} launches share timestamp {stamp}"),
        ),
    })?;
    prune_launch_files(dir, keep.max(1))?;
    Ok((path, file))
}

fn launch_file_name(stamp: &str, attempt: usize) -> String {
    match attempt {
        0 => format!("{LOG_FILE_PREFIX}{stamp}.{LOG_FILE_EXTENSION}"),
        n => format!("{LOG_FILE_PREFIX}{stamp}_{}.{LOG_FILE_EXTENSION}", n + 1),
    }
}

/// Remove the oldest launch files beyond `keep`. Names sort chronologically,
/// so no file metadata is consulted. Returns how many files were removed.
fn prune_launch_files(dir: &Path, keep: usize) -> Result<usize, LoggingError> {
    let mut launches = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_launch_file(path))
        .collect::<Vec<_>>();
    launches.sort();

    let excess = launches.len().saturating_sub(keep);
    let mut removed = 0;
    for path in &launches[..excess] {
        // Another launch may be pruning the same directory.
        if fs::remove_file(path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

fn is_launch_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|ext| ext.to_str()) == Some(LOG_FILE_EXTENSION)
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
}

fn format_stamp(now: OffsetDateTime) -> Result<String, LoggingError> {
    const STAMP_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    Ok(now.format(STAMP_FORMAT)?)
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> LoggingError {
    match error {
        app_dirs::AppDirError::NoBaseDir => LoggingError::NoLogDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            LoggingError::CreateDir { path, source }
        }
    }
}
