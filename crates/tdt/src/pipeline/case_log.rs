//! Optional per-case log file, `logging_file_CT_<index>.log` in the case root.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

use crate::error::StorageError;

pub struct CaseLog {
    file: Option<(PathBuf, File)>,
}

impl CaseLog {
    /// A log that discards every line.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Opens `path` for appending so resumed runs extend the same file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            file: Some((path.to_path_buf(), file)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn info(&mut self, message: &str) {
        self.write("INFO", message);
    }

    pub fn error(&mut self, message: &str) {
        self.write("ERROR", message);
    }

    fn write(&mut self, level: &str, message: &str) {
        let Some((path, file)) = self.file.as_mut() else {
            return;
        };
        let line = format_line(&Local::now().format("%Y-%m-%d %H:%M:%S").to_string(), level, message);
        // Losing a log line never fails a case.
        if let Err(e) = file.write_all(line.as_bytes()) {
            debug!(path = %path.display(), error = %e, "case log write failed");
        }
    }
}

fn format_line(timestamp: &str, level: &str, message: &str) -> String {
    format!("{} | {} | {}\n", timestamp, level, message)
}
