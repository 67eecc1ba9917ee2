use std::path::{Path, PathBuf};

use crate::config::SubdirNames;
use crate::error::StorageError;
use crate::stage::Stage;
use crate::storage::filesystem::{copy_tree, ensure_directory, write_atomic};

const WORK_DIR: &str = "simind_work";
const CT_COPY_DIR: &str = "ct_input_copy";

/// Folder layout of one case: `<output_root>/<title>_CT_<index>/...`.
#[derive(Debug, Clone)]
pub struct CaseLayout {
    index: usize,
    root: PathBuf,
    preprocessing: PathBuf,
    pbpk: PathBuf,
    simulation: PathBuf,
}

impl CaseLayout {
    pub fn new(output_root: &Path, title: &str, index: usize, subdirs: &SubdirNames) -> Self {
        let root = output_root.join(format!("{}_CT_{}", title, index));
        Self {
            index,
            preprocessing: root.join(&subdirs.preprocessing),
            pbpk: root.join(&subdirs.pbpk),
            simulation: root.join(&subdirs.spect_simulation),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reconstruction writes next to the simulation outputs it consumes.
    pub fn stage_dir(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Preprocessing => &self.preprocessing,
            Stage::Pbpk => &self.pbpk,
            Stage::Simulation | Stage::Reconstruction => &self.simulation,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.simulation.join(WORK_DIR)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.root.join("case.json")
    }

    pub fn provenance_path(&self) -> PathBuf {
        self.root.join("provenance.json")
    }

    pub fn failure_path(&self) -> PathBuf {
        self.root.join("failure.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root
            .join(format!("logging_file_CT_{}.log", self.index))
    }

    pub fn ct_copy_dir(&self) -> PathBuf {
        self.root.join(CT_COPY_DIR)
    }

    pub fn config_copy_path(&self, extension: &str) -> PathBuf {
        self.root.join(format!("config.{}", extension))
    }

    pub fn create(&self) -> Result<(), StorageError> {
        ensure_directory(&self.root)?;
        ensure_directory(&self.preprocessing)?;
        ensure_directory(&self.pbpk)?;
        ensure_directory(&self.simulation)?;
        Ok(())
    }

    /// Copies the CT input under `ct_input_copy/`. An existing copy is kept.
    /// Returns whether anything was copied.
    pub fn copy_ct_input(&self, source: &Path) -> Result<bool, StorageError> {
        let name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ct_input".into());
        let target = self.ct_copy_dir().join(name);
        if target.exists() {
            return Ok(false);
        }
        copy_tree(source, &target)?;
        Ok(true)
    }

    /// Snapshots the config document into the case root. Unchanged content is not rewritten.
    pub fn copy_config(&self, config_path: &Path) -> Result<PathBuf, StorageError> {
        let extension = config_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json");
        let target = self.config_copy_path(extension);

        let content = std::fs::read(config_path).map_err(|e| StorageError::ReadFile {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        if std::fs::read(&target).map(|existing| existing == content).unwrap_or(false) {
            return Ok(target);
        }
        write_atomic(&target, &content)?;
        Ok(target)
    }
}
