use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Rule deciding whether an existing output is good enough to skip its producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityPolicy {
    /// The file exists.
    Exists,
    /// The file exists and is not empty.
    NonEmpty,
    /// Non-empty, and raw projections hold whole `f32` samples and JSON parses.
    #[default]
    Structural,
}

impl ValidityPolicy {
    /// Returns the reason `path` is not a valid output, if any.
    pub fn check(self, path: &Path) -> Result<(), String> {
        let metadata = std::fs::metadata(path)
            .map_err(|_| format!("{} does not exist", path.display()))?;

        if self == ValidityPolicy::Exists {
            return Ok(());
        }

        if metadata.is_dir() {
            let has_entries = std::fs::read_dir(path)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            return if has_entries {
                Ok(())
            } else {
                Err(format!("{} is an empty directory", path.display()))
            };
        }

        let len = metadata.len();
        if len == 0 {
            return Err(format!("{} is empty", path.display()));
        }

        if self == ValidityPolicy::NonEmpty {
            return Ok(());
        }

        match extension(path).as_deref() {
            Some("a00") | Some("bin") if len % 4 != 0 => Err(format!(
                "{} has {} bytes, not a whole number of f32 samples",
                path.display(),
                len
            )),
            Some("json") => {
                let bytes = std::fs::read(path)
                    .map_err(|e| format!("{} is unreadable: {}", path.display(), e))?;
                serde_json::from_slice::<serde_json::Value>(&bytes)
                    .map(|_| ())
                    .map_err(|e| format!("{} is not valid JSON: {}", path.display(), e))
            }
            _ => Ok(()),
        }
    }

    pub fn is_valid(self, path: &Path) -> bool {
        self.check(path).is_ok()
    }

    /// Checks every path, reporting the first failure.
    pub fn check_all<'a, I>(self, paths: I) -> Result<(), String>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        for path in paths {
            self.check(path)?;
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct PolicyCase {
        name: &'static str,
        file: &'static str,
        content: &'static [u8],
        exists: bool,
        non_empty: bool,
        structural: bool,
    }

    #[test]
    fn test_policy_table() {
        let cases = vec![
            PolicyCase {
                name: "empty projection",
                file: "a_tot_w1.a00",
                content: b"",
                exists: true,
                non_empty: false,
                structural: false,
            },
            PolicyCase {
                name: "truncated projection",
                file: "a_tot_w2.a00",
                content: &[0, 0, 0, 0, 0, 0],
                exists: true,
                non_empty: true,
                structural: false,
            },
            PolicyCase {
                name: "whole projection",
                file: "a_tot_w3.a00",
                content: &[0, 0, 128, 63, 0, 0, 0, 64],
                exists: true,
                non_empty: true,
                structural: true,
            },
            PolicyCase {
                name: "broken json",
                file: "meta.json",
                content: b"{\"rois\": [",
                exists: true,
                non_empty: true,
                structural: false,
            },
            PolicyCase {
                name: "valid json",
                file: "meta.json",
                content: b"{\"rois\": []}",
                exists: true,
                non_empty: true,
                structural: true,
            },
            PolicyCase {
                name: "opaque volume",
                file: "spect_60min.nii",
                content: b"nifti",
                exists: true,
                non_empty: true,
                structural: true,
            },
        ];

        for case in cases {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join(case.file);
            std::fs::write(&path, case.content).unwrap();

            assert_eq!(
                ValidityPolicy::Exists.is_valid(&path),
                case.exists,
                "{}: exists",
                case.name
            );
            assert_eq!(
                ValidityPolicy::NonEmpty.is_valid(&path),
                case.non_empty,
                "{}: non_empty",
                case.name
            );
            assert_eq!(
                ValidityPolicy::Structural.is_valid(&path),
                case.structural,
                "{}: structural",
                case.name
            );
        }
    }

    #[test]
    fn test_missing_file_fails_every_policy() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.a00");
        for policy in [
            ValidityPolicy::Exists,
            ValidityPolicy::NonEmpty,
            ValidityPolicy::Structural,
        ] {
            assert!(!policy.is_valid(&path));
        }
    }

    #[test]
    fn test_check_all_reports_first_failure() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.a00");
        let bad = temp_dir.path().join("bad.a00");
        std::fs::write(&good, [0u8; 4]).unwrap();

        let err = ValidityPolicy::Structural
            .check_all(&[good, bad.clone()])
            .unwrap_err();
        assert!(err.contains("bad.a00"));
    }
}
