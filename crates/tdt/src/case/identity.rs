use serde::{Deserialize, Serialize};

use crate::case::{Case, CaseLayout};
use crate::error::StorageError;
use crate::sanitize;
use crate::storage::filesystem::{read_json, write_json_atomic};

/// `case.json`: which input a `<title>_CT_<index>` folder belongs to.
///
/// Folder names follow the sorted position of an input, so adding or removing
/// inputs between runs can shift a patient onto another patient's folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseIdentity {
    pub case_id: String,
    /// Input file or directory name, without its parent directories.
    pub source: String,
    /// Hash of the full input path at the time the folder was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
}

impl CaseIdentity {
    pub fn of(case: &Case) -> Self {
        Self {
            case_id: case.id.clone(),
            source: sanitize::redact_path(&case.source_path),
            source_hash: Some(sanitize::hash_path(&case.source_path)),
        }
    }

    /// Identity recorded in the folder: `case.json`, falling back to the
    /// `case_id`/`source` fields of `provenance.json` for folders written
    /// before the marker existed.
    pub fn recorded(layout: &CaseLayout) -> Result<Option<Self>, StorageError> {
        for path in [layout.identity_path(), layout.provenance_path()] {
            if path.exists() {
                return read_json(&path).map(Some);
            }
        }
        Ok(None)
    }

    /// Same input, judged by case id and input name. The path hash is kept for
    /// auditing only, so a relocated input directory still resumes.
    pub fn same_input(&self, other: &CaseIdentity) -> bool {
        self.case_id == other.case_id && self.source == other.source
    }

    /// Writes the marker unless one is already present.
    pub fn record(&self, layout: &CaseLayout) -> Result<(), StorageError> {
        let path = layout.identity_path();
        if path.exists() {
            return Ok(());
        }
        write_json_atomic(&path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CtInputKind;
    use crate::config::SubdirNames;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn case(path: &str) -> Case {
        Case::new(0, PathBuf::from(path), CtInputKind::Volume)
    }

    #[test]
    fn test_marker_written_once_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let layout = CaseLayout::new(temp_dir.path(), "tdt_output", 0, &SubdirNames::default());
        layout.create().unwrap();

        assert_eq!(CaseIdentity::recorded(&layout).unwrap(), None);

        let first = CaseIdentity::of(&case("/data/ct/patient02.nii.gz"));
        first.record(&layout).unwrap();
        CaseIdentity::of(&case("/data/ct/patient01.nii.gz"))
            .record(&layout)
            .unwrap();

        let recorded = CaseIdentity::recorded(&layout).unwrap().unwrap();
        assert_eq!(recorded, first);
        assert_eq!(recorded.case_id, "patient02");
        assert_eq!(recorded.source, "patient02.nii.gz");
    }

    #[test]
    fn test_same_input_ignores_parent_directory() {
        let original = CaseIdentity::of(&case("/data/ct/patient02.nii.gz"));
        let moved = CaseIdentity::of(&case("/archive/ct/patient02.nii.gz"));
        let other = CaseIdentity::of(&case("/data/ct/patient01.nii.gz"));

        assert!(original.same_input(&moved));
        assert!(!original.same_input(&other));
    }

    #[test]
    fn test_provenance_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let layout = CaseLayout::new(temp_dir.path(), "tdt_output", 0, &SubdirNames::default());
        layout.create().unwrap();
        std::fs::write(
            layout.provenance_path(),
            r#"{"case_id":"patient02","index":0,"source":"patient02.nii.gz","mode":"PRODUCTION",
                "state":"finalized","finalized_at":"2026-01-01T00:00:00Z","stages":[]}"#,
        )
        .unwrap();

        let recorded = CaseIdentity::recorded(&layout).unwrap().unwrap();
        assert_eq!(recorded.case_id, "patient02");
        assert_eq!(recorded.source_hash, None);
    }
}
