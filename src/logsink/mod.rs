use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use thiserror::Error;

pub(crate) const MAX_BYTES: u64 = 10 * 1024 * 1024;
pub(crate) const BACKUP_COUNT: u32 = 5;

#[derive(Error, Debug)]
pub enum LogSinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Severity tag written alongside each line; stdout lines are `INFO`, stderr
/// lines are `WARN`, application-level callers choose their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// An append-only, size-rotated log file, mirroring Python's
/// `RotatingFileHandler`: at `MAX_BYTES` the active file is renamed through
/// `.log.1` .. `.log.5`, the oldest backup is dropped, and a fresh file is opened.
pub struct LogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogSinkError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Host-scoped sink named `<host>-<YYYYMMDD>.log` under `dir`.
    pub fn for_host(dir: impl AsRef<Path>, host_name: &str, date: &str) -> Result<Self, LogSinkError> {
        Self::open(dir.as_ref().join(format!("{host_name}-{date}.log")))
    }

    pub fn write_line(&self, level: Level, message: &str) -> Result<(), LogSinkError> {
        let mut file = self.file.lock().unwrap();
        self.rotate_if_needed(&mut file)?;

        let line = format!(
            "{} [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level.as_str(),
            message
        );
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self, file: &mut File) -> Result<(), LogSinkError> {
        rotate_if_over(&self.path, file, MAX_BYTES, BACKUP_COUNT)
    }
}

/// Renames `path` through `.1` .. `.backup_count`, dropping the oldest
/// backup, once `file` reaches `max_bytes`, then reopens `path` for append.
/// Shared by [`LogSink`] and the application-level log writer in
/// `crate::logging`, so both follow the same 10 MiB/5-backup discipline.
pub(crate) fn rotate_if_over(
    path: &Path,
    file: &mut File,
    max_bytes: u64,
    backup_count: u32,
) -> Result<(), LogSinkError> {
    let len = file.metadata()?.len();
    if len < max_bytes {
        return Ok(());
    }

    let oldest = backup_path(path, backup_count - 1);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..backup_count - 1).rev() {
        let from = backup_path(path, i);
        let to = backup_path(path, i + 1);
        if from.exists() {
            fs::rename(&from, &to)?;
        }
    }
    fs::rename(path, backup_path(path, 1))?;
    *file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

fn backup_path(path: &Path, n: u32) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(format!(".{n}"));
    PathBuf::from(s)
}
