//! Builder patterns for creating test data programmatically.
//!
//! These builders allow creating complete pipeline configurations without
//! repeating the full `spect_simulation` block in every test.

#![allow(dead_code)]

use serde_json::{json, Value};

use tdt::config::{load_config_from_str, Config, RunMode};
use tdt::stage::ValidityPolicy;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    version: String,
    mode: RunMode,
    title: String,
    validity: ValidityPolicy,
    case_parallelism: usize,
    roi_subset: Vec<String>,
    frame_start_times: Vec<f64>,
    frame_durations: Vec<f64>,
    num_cores: usize,
    max_job_retries: u32,
    calibration_activity_mbq: f64,
    lesion_specs: Option<Value>,
}

impl ConfigBuilder {
    /// Create a new builder with sensible defaults for testing: two frames,
    /// one simulation worker, one retry.
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            mode: RunMode::Production,
            title: "tdt".to_string(),
            validity: ValidityPolicy::Structural,
            case_parallelism: 1,
            roi_subset: vec![],
            frame_start_times: vec![60.0, 240.0],
            frame_durations: vec![15.0, 15.0],
            num_cores: 1,
            max_job_retries: 1,
            calibration_activity_mbq: 1.0,
            lesion_specs: None,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn validity(mut self, validity: ValidityPolicy) -> Self {
        self.validity = validity;
        self
    }

    pub fn case_parallelism(mut self, count: usize) -> Self {
        self.case_parallelism = count;
        self
    }

    pub fn roi_subset(mut self, rois: &[&str]) -> Self {
        self.roi_subset = rois.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Frames as `(start_min, duration_min)` pairs.
    pub fn frames(mut self, frames: &[(f64, f64)]) -> Self {
        self.frame_start_times = frames.iter().map(|f| f.0).collect();
        self.frame_durations = frames.iter().map(|f| f.1).collect();
        self
    }

    pub fn num_cores(mut self, cores: usize) -> Self {
        self.num_cores = cores;
        self
    }

    pub fn max_job_retries(mut self, retries: u32) -> Self {
        self.max_job_retries = retries;
        self
    }

    pub fn calibration_activity(mut self, mbq: f64) -> Self {
        self.calibration_activity_mbq = mbq;
        self
    }

    /// Lesion specs keyed by host organ, e.g. `{"liver": {"count": 2}}`.
    pub fn synthetic_lesions(mut self, specs: Value) -> Self {
        self.lesion_specs = Some(specs);
        self
    }

    /// The config document as JSON.
    pub fn to_json(&self) -> Value {
        let validity = match self.validity {
            ValidityPolicy::Exists => "exists",
            ValidityPolicy::NonEmpty => "non_empty",
            ValidityPolicy::Structural => "structural",
        };

        let mut document = json!({
            "version": self.version,
            "mode": self.mode.to_string(),
            "case_parallelism": self.case_parallelism,
            "output_folder": { "title": self.title },
            "resume": { "validity": validity },
            "spect_preprocessing": {
                "name": "tdt",
                "roi_subset": self.roi_subset,
            },
            "pbpk": {
                "name": "pbpk",
                "vois": ["Kidney", "Liver", "Rest"],
                "frame_start_times": self.frame_start_times,
                "frame_durations": self.frame_durations,
            },
            "spect_simulation": {
                "name": "spect",
                "simind_directory": "/opt/simind",
                "collimator": "ma-meg",
                "isotope": "lu177",
                "num_photons": 1000,
                "num_projections": 60,
                "energy_window_width": 20,
                "detector_distance": 15,
                "detector_width": 40,
                "output_img_size": 64,
                "output_pixel_width": 0.9,
                "output_slice_width": 0.9,
                "iterations": 2,
                "subsets": 4,
                "num_cores": self.num_cores,
                "max_job_retries": self.max_job_retries,
                "calibration_activity_mbq": self.calibration_activity_mbq,
            }
        });
        if let Some(specs) = &self.lesion_specs {
            document["synthetic_lesions"] = json!({ "specs": specs });
        }
        document
    }

    /// Build through the real loader so schema and semantic validation apply.
    pub fn build(self) -> Config {
        load_config_from_str(&self.to_json().to_string()).expect("test config is valid")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
