use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use time::UtcOffset;
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{self, EnvFilter, fmt, prelude::*};

const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const SESSION_PREFIX: &str = "session-";

/// Session logs live in the user cache directory
/// - Linux: ~/.cache/fragment-language-server/
/// - macOS: ~/Library/Caches/fragment-language-server/
/// - Windows: %LOCALAPPDATA%\fragment-language-server\
fn log_dir() -> io::Result<PathBuf> {
    let dir = dirs::cache_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Unable to determine user cache directory"))?
        .join(env!("CARGO_PKG_NAME"));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn is_session_log(name: &str) -> bool {
    name.starts_with(SESSION_PREFIX) && name.ends_with(".log")
}

/// Removes session logs last modified more than `retention` before `now`
///
/// Returns how many files were removed. Unreadable entries are skipped.
pub fn cleanup_old_logs(dir: &Path, now: SystemTime, retention: Duration) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        let name = entry.file_name();
        if !metadata.is_file() || !expired || !name.to_str().is_some_and(is_session_log) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to remove old log file {:?}: {}", entry.path(), e),
        }
    }
    Ok(removed)
}

fn session_log_name() -> io::Result<String> {
    let timestamp = time::OffsetDateTime::now_utc()
        .format(format_description!("[year][month][day]-[hour][minute][second]"))
        .map_err(io::Error::other)?;
    Ok(format!("{}{}-{}.log", SESSION_PREFIX, timestamp, std::process::id()))
}

/// A second `init_logger` in the same process (tests) keeps the first subscriber
fn tolerate_already_set(result: Result<(), TryInitError>) -> io::Result<()> {
    match result {
        Err(e) => {
            let message = e.to_string();
            if message.contains("already been set") || message.contains("already initialized") {
                Ok(())
            } else {
                Err(io::Error::other(e))
            }
        }
        Ok(()) => Ok(()),
    }
}

/// Initialize logger with stderr and optional file output
///
/// Returns a guard that must be kept alive for the duration of the program
/// so buffered file output is flushed.
///
/// # Arguments
/// * `no_color` - Disable ANSI colors in stderr output
/// * `log_level` - Override log level (otherwise uses RUST_LOG or defaults to "info")
/// * `enable_file_logging` - Also write a DEBUG level session log (disable for tests)
///
/// Stdout carries the LSP transport, so nothing is ever logged there.
pub fn init_logger(no_color: bool, log_level: Option<&str>, enable_file_logging: bool) -> io::Result<WorkerGuard> {
    let timer = fmt::time::OffsetTime::new(
        UtcOffset::UTC,
        format_description!("[[[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z]"),
    );

    let stderr_filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(timer.clone())
        .with_ansi(!no_color)
        .with_filter(stderr_filter);

    if !enable_file_logging {
        let (_, guard) = tracing_appender::non_blocking(io::sink());
        tolerate_already_set(tracing_subscriber::registry().with(stderr_layer).try_init())?;
        return Ok(guard);
    }

    let dir = log_dir()?;
    cleanup_old_logs(&dir, SystemTime::now(), LOG_RETENTION)?;
    let log_path = dir.join(session_log_name()?);
    let file = fs::OpenOptions::new().create(true).append(true).open(&log_path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_timer(timer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug"));

    tolerate_already_set(
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .try_init(),
    )?;
    eprintln!("Logging to file: {:?}", log_path);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_log_names() {
        assert!(is_session_log("session-20260101-120000-42.log"));
        assert!(!is_session_log("wire-20260101-120000-42.log"));
        assert!(!is_session_log("session-notes.txt"));
        assert!(is_session_log(&session_log_name().unwrap()));
    }

    #[test]
    fn test_cleanup_removes_only_expired_session_logs() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        fs::write(dir.join("session-old.log"), "x").unwrap();
        fs::write(dir.join("notes.log"), "x").unwrap();

        let now = SystemTime::now();
        assert_eq!(cleanup_old_logs(dir, now, LOG_RETENTION).unwrap(), 0);

        let later = now + LOG_RETENTION + Duration::from_secs(60);
        assert_eq!(cleanup_old_logs(dir, later, LOG_RETENTION).unwrap(), 1);
        assert!(!dir.join("session-old.log").exists());
        assert!(dir.join("notes.log").exists());
    }

    #[test]
    fn test_init_logger_twice_is_tolerated() {
        let _first = init_logger(true, Some("warn"), false).unwrap();
        let _second = init_logger(true, Some("debug"), false).unwrap();
    }
}
