//! Run manifest: one record per case written after every case has finished.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::case::{Case, CaseState};
use crate::config::RunMode;
use crate::error::StorageError;
use crate::sanitize;
use crate::stage::StageResult;
use crate::storage::filesystem::{ensure_directory, write_json_atomic};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub id: String,
    /// File name of the CT input; directories above it are not recorded.
    pub source: String,
    pub output_dir: PathBuf,
    pub state: CaseState,
    pub stages: Vec<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ManifestEntry {
    pub fn new(case: &Case, output_dir: &Path, stages: Vec<StageResult>) -> Self {
        Self {
            index: case.index,
            id: case.id.clone(),
            source: sanitize::redact_path(&case.source_path),
            output_dir: output_dir.to_path_buf(),
            state: case.state,
            stages,
            failure: case.failure.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: RunMode,
    pub output_root: PathBuf,
    pub cases: Vec<ManifestEntry>,
    /// Ids of finalized cases.
    pub succeeded: Vec<String>,
    /// Ids of every case that did not finalize.
    pub failed: Vec<String>,
}

impl Manifest {
    pub fn new(mode: RunMode, output_root: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            mode,
            output_root: output_root.to_path_buf(),
            cases: Vec::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        if entry.state == CaseState::Finalized {
            self.succeeded.push(entry.id.clone());
        } else {
            self.failed.push(entry.id.clone());
        }
        self.cases.push(entry);
    }

    pub fn finish(mut self) -> Self {
        self.cases.sort_by_key(|c| c.index);
        self.finished_at = Utc::now();
        self
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Writes the manifest to `<output_root>/<title>_manifest.json`.
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(output_root: &Path, title: &str) -> Self {
        Self {
            path: output_root.join(format!("{}_manifest.json", title)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic: a reader never sees a partially written manifest.
    pub fn write(&self, manifest: &Manifest) -> Result<&Path, StorageError> {
        if let Some(parent) = self.path.parent() {
            ensure_directory(parent)?;
        }
        write_json_atomic(&self.path, manifest)?;
        Ok(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::CtInputKind;
    use crate::stage::Stage;
    use crate::storage::filesystem::read_json;
    use tempfile::TempDir;

    fn case(index: usize, name: &str, state: CaseState) -> Case {
        let mut case = Case::new(
            index,
            PathBuf::from(format!("/data/clinic/{}", name)),
            CtInputKind::Volume,
        );
        case.state = state;
        case
    }

    #[test]
    fn test_entries_split_into_succeeded_and_failed() {
        let mut manifest = Manifest::new(RunMode::Production, Path::new("/out"), Utc::now());

        let mut failed = case(1, "patient02.nii", CaseState::Discovered);
        failed.mark_failed("preprocessing stage failed".to_string());
        manifest.push(ManifestEntry::new(
            &failed,
            Path::new("/out/tdt_CT_1"),
            vec![StageResult::failed(
                Stage::Preprocessing,
                "exit 1".to_string(),
                0.5,
            )],
        ));
        manifest.push(ManifestEntry::new(
            &case(0, "patient01.nii.gz", CaseState::Finalized),
            Path::new("/out/tdt_CT_0"),
            vec![],
        ));

        let manifest = manifest.finish();
        assert_eq!(manifest.succeeded, vec!["patient01"]);
        assert_eq!(manifest.failed, vec!["patient02"]);
        assert_eq!(manifest.cases[0].index, 0);
        assert_eq!(manifest.cases[1].failure.as_deref(), Some("preprocessing stage failed"));
        assert!(!manifest.all_succeeded());
    }

    #[test]
    fn test_source_is_redacted() {
        let entry = ManifestEntry::new(
            &case(0, "patient01.nii.gz", CaseState::Finalized),
            Path::new("/out/tdt_CT_0"),
            vec![],
        );
        assert_eq!(entry.source, "patient01.nii.gz");
    }

    #[test]
    fn test_writer_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("out");
        let writer = ManifestWriter::new(&root, "tdt_output");

        let mut manifest = Manifest::new(RunMode::Debug, &root, Utc::now());
        manifest.push(ManifestEntry::new(
            &case(0, "patient01.nii", CaseState::Finalized),
            &root.join("tdt_output_CT_0"),
            vec![],
        ));
        let manifest = manifest.finish();

        let path = writer.write(&manifest).unwrap().to_path_buf();
        assert_eq!(path, root.join("tdt_output_manifest.json"));

        let loaded: Manifest = read_json(&path).unwrap();
        assert_eq!(loaded.run_id, manifest.run_id);
        assert_eq!(loaded.mode, RunMode::Debug);
        assert_eq!(loaded.succeeded, vec!["patient01"]);
    }
}
