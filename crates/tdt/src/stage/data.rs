//! Records exchanged between stages through the case folder.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PbpkConfig;
use crate::sanitize::is_safe_component;

/// Frame start times are compared with this tolerance (minutes).
const FRAME_TOLERANCE: f64 = 1e-6;

/// One imaging epoch. Every stage refers to frames by `index` and `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeFrame {
    pub index: usize,
    pub start_min: f64,
    pub duration_min: f64,
}

impl TimeFrame {
    pub fn from_config(pbpk: &PbpkConfig) -> Vec<TimeFrame> {
        pbpk.frame_start_times
            .iter()
            .zip(pbpk.frame_durations.iter())
            .enumerate()
            .map(|(index, (start, duration))| TimeFrame {
                index,
                start_min: *start,
                duration_min: *duration,
            })
            .collect()
    }

    /// File-name token, e.g. `60min` or `90.5min`.
    pub fn label(&self) -> String {
        if self.start_min.fract() == 0.0 {
            format!("{:.0}min", self.start_min)
        } else {
            format!("{}min", self.start_min)
        }
    }

    fn matches(&self, record: &FrameRecord) -> bool {
        (self.start_min - record.start_min).abs() < FRAME_TOLERANCE
            && (self.duration_min - record.duration_min).abs() < FRAME_TOLERANCE
    }
}

/// Region of interest ready for simulation: mask label plus per-frame sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    pub name: String,
    pub label: u32,
    pub mask_path: PathBuf,
    /// Activity source image per frame.
    pub activity_maps: Vec<PathBuf>,
    /// Total activity per frame, MBq.
    pub activity_mbq: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiLabel {
    pub name: String,
    pub label: u32,
}

/// Written by the preprocessing collaborator as `<name>_preprocessing.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingMetadata {
    pub rois: Vec<RoiLabel>,
    /// Volume shape as `[z, y, x]`.
    pub shape: [usize; 3],
    /// Voxel spacing in cm as `[z, y, x]`.
    pub spacing_cm: [f64; 3],
    pub attenuation_map: PathBuf,
    pub roi_label_map: PathBuf,
}

impl PreprocessingMetadata {
    pub fn file_name(name: &str) -> String {
        format!("{}_preprocessing.json", name)
    }

    /// Relative paths in the record resolve against the stage directory.
    pub fn resolve_paths(&mut self, stage_dir: &Path) {
        self.attenuation_map = stage_dir.join(&self.attenuation_map);
        self.roi_label_map = stage_dir.join(&self.roi_label_map);
    }

    pub fn roi_names(&self) -> Vec<String> {
        self.rois.iter().map(|r| r.name.clone()).collect()
    }

    pub fn referenced_files(&self) -> Vec<PathBuf> {
        vec![self.attenuation_map.clone(), self.roi_label_map.clone()]
    }

    pub fn validate(&self, roi_subset: &[String]) -> Result<(), String> {
        if self.rois.is_empty() {
            return Err("preprocessing produced no ROIs".to_string());
        }
        if self.shape.iter().any(|d| *d == 0) {
            return Err(format!("volume shape {:?} has an empty axis", self.shape));
        }
        if self.spacing_cm.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(format!("voxel spacing {:?} is not positive", self.spacing_cm));
        }

        // ROI names become file-name tokens of every simulation output.
        if let Some(roi) = self.rois.iter().find(|r| !is_safe_component(&r.name)) {
            return Err(format!("ROI name '{}' is not usable in file names", roi.name));
        }

        let names: BTreeSet<&str> = self.rois.iter().map(|r| r.name.as_str()).collect();
        if names.len() != self.rois.len() {
            return Err("ROI names are not unique".to_string());
        }

        let missing: Vec<&String> = roi_subset
            .iter()
            .filter(|r| !names.contains(r.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(format!("requested ROIs missing from segmentation: {:?}", missing));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub start_min: f64,
    pub duration_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiKinetics {
    pub name: String,
    pub activity_mbq: Vec<f64>,
    pub activity_maps: Vec<PathBuf>,
}

/// Written by the PBPK collaborator as `<name>_pbpk.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KineticsOutput {
    pub frames: Vec<FrameRecord>,
    pub rois: Vec<RoiKinetics>,
    pub total_activity_mbq: Vec<f64>,
}

impl KineticsOutput {
    pub fn file_name(name: &str) -> String {
        format!("{}_pbpk.json", name)
    }

    pub fn resolve_paths(&mut self, stage_dir: &Path) {
        for roi in &mut self.rois {
            for map in &mut roi.activity_maps {
                *map = stage_dir.join(&*map);
            }
        }
    }

    pub fn referenced_files(&self) -> Vec<PathBuf> {
        self.rois
            .iter()
            .flat_map(|r| r.activity_maps.iter().cloned())
            .collect()
    }

    /// Frames must match the configured frames exactly, and every segmented ROI
    /// needs one activity value and one source map per frame.
    pub fn validate(&self, frames: &[TimeFrame], roi_names: &[String]) -> Result<(), String> {
        if self.frames.len() != frames.len()
            || !frames.iter().zip(&self.frames).all(|(f, r)| f.matches(r))
        {
            return Err(format!(
                "PBPK frames {:?} do not match the configured frames {:?}",
                self.frames
                    .iter()
                    .map(|f| (f.start_min, f.duration_min))
                    .collect::<Vec<_>>(),
                frames
                    .iter()
                    .map(|f| (f.start_min, f.duration_min))
                    .collect::<Vec<_>>()
            ));
        }

        if self.total_activity_mbq.len() != frames.len() {
            return Err(format!(
                "total_activity_mbq has {} entries for {} frames",
                self.total_activity_mbq.len(),
                frames.len()
            ));
        }

        for name in roi_names {
            let roi = self
                .roi(name)
                .ok_or_else(|| format!("PBPK output has no kinetics for ROI '{}'", name))?;
            if roi.activity_mbq.len() != frames.len() || roi.activity_maps.len() != frames.len() {
                return Err(format!(
                    "ROI '{}' has {} activities and {} maps for {} frames",
                    name,
                    roi.activity_mbq.len(),
                    roi.activity_maps.len(),
                    frames.len()
                ));
            }
            if roi.activity_mbq.iter().any(|a| !a.is_finite() || *a < 0.0) {
                return Err(format!("ROI '{}' has a negative or non-finite activity", name));
            }
        }

        Ok(())
    }

    pub fn roi(&self, name: &str) -> Option<&RoiKinetics> {
        self.rois.iter().find(|r| r.name == name)
    }

    /// Joins kinetics with the segmentation labels, in segmentation order.
    pub fn rois_for(&self, metadata: &PreprocessingMetadata) -> Vec<Roi> {
        metadata
            .rois
            .iter()
            .filter_map(|label| {
                self.roi(&label.name).map(|k| Roi {
                    name: label.name.clone(),
                    label: label.label,
                    mask_path: metadata.roi_label_map.clone(),
                    activity_maps: k.activity_maps.clone(),
                    activity_mbq: k.activity_mbq.clone(),
                })
            })
            .collect()
    }
}
