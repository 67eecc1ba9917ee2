use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::case::model::{Case, CtInputKind};
use crate::error::{RunError, StorageError};
use crate::sanitize;

/// Enumerates CT inputs into cases. Each top-level entry of the input
/// directory becomes one case; indices follow file-name order.
pub struct CaseScanner {
    input_directory: PathBuf,
}

impl CaseScanner {
    pub fn new<P: AsRef<Path>>(input_directory: P) -> Self {
        Self {
            input_directory: input_directory.as_ref().to_path_buf(),
        }
    }

    pub fn input_directory(&self) -> &Path {
        &self.input_directory
    }

    pub fn scan(&self) -> Result<Vec<Case>, RunError> {
        if !self.input_directory.is_dir() {
            return Err(RunError::InputNotDirectory(self.input_directory.clone()));
        }

        let mut cases = Vec::new();

        for entry in WalkDir::new(&self.input_directory)
            .min_depth(1)
            .max_depth(1) // Series folders are single cases, never descended into
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                RunError::Discovery(StorageError::ScanFailed {
                    path: self.input_directory.clone(),
                    source: e,
                })
            })?;

            if is_hidden(entry.path()) {
                continue;
            }

            let kind = classify(entry.path(), entry.file_type().is_dir());
            if let CtInputKind::Unsupported(reason) = &kind {
                warn!(
                    "Unsupported CT input {}: {}",
                    sanitize::redact_path(entry.path()),
                    reason
                );
            } else {
                debug!("Found CT input: {}", sanitize::redact_path(entry.path()));
            }

            cases.push(Case::new(cases.len(), entry.path().to_path_buf(), kind));
        }

        info!(
            "Discovered {} cases in {}",
            cases.len(),
            self.input_directory.display()
        );
        Ok(cases)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn classify(path: &Path, is_dir: bool) -> CtInputKind {
    if is_dir {
        return CtInputKind::Series;
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_ascii_lowercase())
        .unwrap_or_default();

    if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        CtInputKind::Volume
    } else {
        CtInputKind::Unsupported("expected a .nii/.nii.gz volume or a series directory".to_string())
    }
}
