//! Raw projection files: little-endian `f32` samples, one file per energy window.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::filesystem::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Lower,
    Photopeak,
    Upper,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::Lower, Window::Photopeak, Window::Upper];

    /// Engine window number (`w1`..`w3`).
    pub fn number(self) -> usize {
        match self {
            Window::Lower => 1,
            Window::Photopeak => 2,
            Window::Upper => 3,
        }
    }

    pub fn slot(self) -> usize {
        self.number() - 1
    }
}

/// `<dir>/<stem>_tot_w<n>.a00`
pub fn window_file(dir: &Path, stem: &str, window: Window) -> PathBuf {
    dir.join(format!("{}_tot_w{}.a00", stem, window.number()))
}

pub fn window_files(dir: &Path, stem: &str) -> [PathBuf; 3] {
    Window::ALL.map(|w| window_file(dir, stem, w))
}

pub fn read_projection(path: &Path) -> Result<Vec<f32>, StorageError> {
    let bytes = std::fs::read(path).map_err(|e| StorageError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    if bytes.len() % 4 != 0 {
        return Err(StorageError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{} bytes is not a whole number of f32 samples", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn write_projection(path: &Path, samples: &[f32]) -> Result<(), StorageError> {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    write_atomic(path, &bytes)
}

/// Lower / photopeak / upper projections of one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyWindowSet {
    pub lower: Vec<f32>,
    pub photopeak: Vec<f32>,
    pub upper: Vec<f32>,
}

impl EnergyWindowSet {
    pub fn read(paths: &[PathBuf; 3]) -> Result<Self, StorageError> {
        Ok(Self {
            lower: read_projection(&paths[0])?,
            photopeak: read_projection(&paths[1])?,
            upper: read_projection(&paths[2])?,
        })
    }

    pub fn get(&self, window: Window) -> &[f32] {
        match window {
            Window::Lower => &self.lower,
            Window::Photopeak => &self.photopeak,
            Window::Upper => &self.upper,
        }
    }

    pub fn write(&self, dir: &Path, stem: &str) -> Result<[PathBuf; 3], StorageError> {
        let paths = window_files(dir, stem);
        for window in Window::ALL {
            write_projection(&paths[window.slot()], self.get(window))?;
        }
        Ok(paths)
    }
}
