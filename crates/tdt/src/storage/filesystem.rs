use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::StorageError;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which covers
/// cross-device moves out of the engine work directory.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    // Fast path: atomic rename
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    // Slow path: copy then remove original
    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if let Some(parent) = dst.parent() {
        ensure_directory(parent)?;
    }
    std::fs::copy(src, dst).map_err(|e| StorageError::CopyFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Copies `src` into `dst`. Files are copied directly; directories are copied
/// recursively, preserving their relative layout. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, StorageError> {
    if src.is_file() {
        copy_file(src, dst)?;
        return Ok(1);
    }

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| StorageError::ScanFailed {
            path: src.to_path_buf(),
            source: e,
        })?;

        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            ensure_directory(&target)?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Writes `bytes` to a sibling temp file and renames it over `path`, so readers
/// never observe a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let tmp_path = temp_sibling(path);
    std::fs::write(&tmp_path, bytes).map_err(|e| StorageError::WriteFile {
        path: tmp_path.clone(),
        source: e,
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        StorageError::MoveFile {
            from: tmp_path.clone(),
            to: path.to_path_buf(),
            source: e,
        }
    })
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Encode {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_atomic(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let bytes = std::fs::read(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode {
        path: path.to_path_buf(),
        source: e,
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        values: Vec<f64>,
    }

    #[test]
    fn test_move_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("job_tot_w1.a00");
        let dst = temp_dir.path().join("out").join("job_tot_w1.a00");
        std::fs::write(&src, [0u8; 8]).unwrap();
        ensure_directory(dst.parent().unwrap()).unwrap();

        move_file(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap().len(), 8);
    }

    #[test]
    fn test_move_missing_source_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = move_file(
            &temp_dir.path().join("nonexistent.a00"),
            &temp_dir.path().join("dst.a00"),
        );

        match result {
            Err(StorageError::MoveFile { from, .. }) => {
                assert!(from.to_string_lossy().contains("nonexistent.a00"));
            }
            _ => panic!("Expected MoveFile error"),
        }
    }

    #[test]
    fn test_create_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("deep/nested/directory");

        ensure_directory(&nested).unwrap();
        assert!(nested.is_dir());

        // Idempotent
        ensure_directory(&nested).unwrap();
    }

    #[test]
    fn test_copy_tree_directory() {
        let temp_dir = TempDir::new().unwrap();
        let series = temp_dir.path().join("series");
        std::fs::create_dir_all(series.join("sub")).unwrap();
        std::fs::write(series.join("IM0001.dcm"), b"a").unwrap();
        std::fs::write(series.join("sub/IM0002.dcm"), b"b").unwrap();

        let dst = temp_dir.path().join("copy");
        let copied = copy_tree(&series, &dst).unwrap();

        assert_eq!(copied, 2);
        assert!(dst.join("IM0001.dcm").exists());
        assert!(dst.join("sub/IM0002.dcm").exists());
    }

    #[test]
    fn test_copy_tree_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("ct.nii.gz");
        std::fs::write(&src, b"volume").unwrap();

        let dst = temp_dir.path().join("copy/ct.nii.gz");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 1);
        assert_eq!(std::fs::read(&dst).unwrap(), b"volume");
    }

    #[test]
    fn test_json_roundtrip_and_no_temp_left() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("record.json");
        let record = Record {
            name: "kidney".to_string(),
            values: vec![1.0, 2.5],
        };

        write_json_atomic(&path, &record).unwrap();
        let loaded: Record = read_json(&path).unwrap();
        assert_eq!(loaded, record);

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_json_decode_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result: Result<Record, _> = read_json(&path);
        assert!(matches!(result, Err(StorageError::Decode { .. })));
    }
}
