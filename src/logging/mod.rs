use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::metadata::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::PrettyFields;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::logsink::{rotate_if_over, BACKUP_COUNT, MAX_BYTES};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("init logging error: `{0}`")]
    TryInitError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Logging;

impl Logging {
    /// Installs a console-only subscriber. Used by tests and the
    /// `--print-debug-info` path, where no log directory is available yet.
    pub fn try_init() -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .fmt_fields(PrettyFields::new())
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError(
                    "unable to set global logging subscriber".to_string(),
                )
            })
    }

    /// Installs a subscriber that writes to both stdout and `<log_dir>/app.log`.
    /// The returned `WorkerGuard` must be held for the life of the process; the
    /// non-blocking file writer flushes on drop.
    pub fn try_init_with_file(log_dir: &Path) -> Result<WorkerGuard, LoggingError> {
        std::fs::create_dir_all(log_dir)?;

        // `app.log` follows the same 10 MiB/5-backup rotation as the
        // per-host `LogSink` files (External Interfaces: "Application-level
        // log ... written by the same rotation policy"), so it is backed by
        // the same `rotate_if_over` logic rather than `tracing_appender`'s
        // own time-based rolling policies.
        let file_writer = RotatingAppLogWriter::open(log_dir.join("app.log"))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);

        let env_filter = || {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
        };

        let console_layer = tracing_subscriber::fmt::layer()
            .fmt_fields(PrettyFields::new())
            .with_filter(env_filter());

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .fmt_fields(PrettyFields::new())
            .with_filter(env_filter());

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|_| {
                LoggingError::TryInitError(
                    "unable to set global logging subscriber".to_string(),
                )
            })?;

        Ok(guard)
    }
}

/// `std::io::Write` sink for `app.log` that rotates at the same 10 MiB/5
/// -backup threshold as [`crate::logsink::LogSink`], so the application-level
/// log and the per-host logs share one rotation discipline. Handed to
/// `tracing_appender::non_blocking`, which only requires `Write + Send +
/// 'static`; the line formatting itself stays the `fmt` layer's job.
struct RotatingAppLogWriter {
    path: PathBuf,
    file: File,
}

impl RotatingAppLogWriter {
    fn open(path: PathBuf) -> Result<Self, LoggingError> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }
}

impl Write for RotatingAppLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        rotate_if_over(&self.path, &mut self.file, MAX_BYTES, BACKUP_COUNT)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
