//! Keeps patient paths out of span attributes, logs, failure records and the
//! manifest.
//!
//! CT inputs usually sit under directories named after patients or studies;
//! only the final component is ever recorded.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, MAIN_SEPARATOR};

/// File or directory name of a CT input, without its parent directories.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Stable token for correlating log lines of one input across runs.
pub fn hash_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// True when `name` can be used as a single file-name token: non-empty, no
/// path separators, no parent-directory reference.
pub fn is_safe_component(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

/// Strips the parent directories of `path` wherever they appear in `text`.
///
/// Error messages quote full paths; this reduces them to the input's name
/// before the message is persisted.
pub fn redact_in_text(text: &str, path: &Path) -> String {
    let parent = path
        .parent()
        .and_then(|p| p.to_str())
        .map(|p| p.trim_end_matches(MAIN_SEPARATOR))
        .filter(|p| !p.is_empty());

    match parent {
        Some(parent) => text.replace(&format!("{}{}", parent, MAIN_SEPARATOR), ""),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/data/clinic/doe_john/patient01.nii.gz")),
            "patient01.nii.gz"
        );
        assert_eq!(redact_path(Path::new("/data/ct/series_03/")), "series_03");
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_hash_path_is_stable_and_distinct() {
        let path = PathBuf::from("/data/ct/patient01.nii");
        assert_eq!(hash_path(&path), hash_path(&path));
        assert_eq!(hash_path(&path).len(), 16);
        assert_ne!(
            hash_path(Path::new("/data/a/ct.nii")),
            hash_path(Path::new("/data/b/ct.nii"))
        );
    }

    #[test]
    fn test_is_safe_component() {
        assert!(is_safe_component("kidney"));
        assert!(is_safe_component("synthetic_lesion"));
        assert!(!is_safe_component(""));
        assert!(!is_safe_component("  "));
        assert!(!is_safe_component("../liver"));
        assert!(!is_safe_component("left/kidney"));
        assert!(!is_safe_component("left\\kidney"));
    }

    #[cfg(unix)]
    #[test]
    fn test_redact_in_text() {
        let source = Path::new("/data/clinic/doe_john/patient01.nii.gz");
        let message = "Invalid CT input '/data/clinic/doe_john/patient01.nii.gz': input no longer exists";
        assert_eq!(
            redact_in_text(message, source),
            "Invalid CT input 'patient01.nii.gz': input no longer exists"
        );
        assert_eq!(redact_in_text("exit status: 1", source), "exit status: 1");
        assert_eq!(redact_in_text("a.nii missing", Path::new("a.nii")), "a.nii missing");
    }
}
