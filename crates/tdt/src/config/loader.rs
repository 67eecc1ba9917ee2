use std::path::Path;

use json_comments::StripComments;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::sanitize::is_safe_component;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const SUPPORTED_VERSION: &str = "1.0";

/// Loads a config document. `.yaml`/`.yml` files are parsed as YAML, everything else as JSON.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    if is_yaml {
        load_config_from_yaml_str(&content)
    } else {
        load_config_from_str(&content)
    }
}

/// Parses a JSON config. `//` and `/* */` comments are stripped first.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value =
        serde_json::from_reader(StripComments::new(content.as_bytes()))?;
    load_config_from_value(json_value)
}

pub fn load_config_from_yaml_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_yaml::from_str(content)?;
    load_config_from_value(json_value)
}

fn load_config_from_value(json_value: serde_json::Value) -> Result<Config, ConfigError> {
    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();

    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != SUPPORTED_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.case_parallelism == 0 {
        return Err(ConfigError::Validation {
            message: "case_parallelism must be at least 1".to_string(),
        });
    }

    validate_frames(config)?;

    let sim = &config.spect_simulation;
    if sim.simind_directory.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: "spect_simulation.simind_directory".to_string(),
        });
    }
    require_positive("spect_simulation.num_photons", sim.num_photons)?;
    require_positive("spect_simulation.energy_window_width", sim.energy_window_width)?;
    require_positive("spect_simulation.output_pixel_width", sim.output_pixel_width)?;
    require_positive("spect_simulation.output_slice_width", sim.output_slice_width)?;
    require_positive(
        "spect_simulation.calibration_activity_mbq",
        sim.calibration_activity_mbq,
    )?;
    if sim.detector_length < 0.0 {
        return Err(ConfigError::Validation {
            message: "spect_simulation.detector_length must not be negative".to_string(),
        });
    }

    // ROI names become file-name tokens in every downstream stage.
    for roi in &config.spect_preprocessing.roi_subset {
        if !is_safe_component(roi) {
            return Err(ConfigError::Validation {
                message: format!("Invalid ROI name in roi_subset: '{}'", roi),
            });
        }
    }

    let lesions = &config.synthetic_lesions;
    if !is_safe_component(&lesions.name) {
        return Err(ConfigError::Validation {
            message: format!("Invalid synthetic_lesions.name: '{}'", lesions.name),
        });
    }
    if let Some(specs) = &lesions.specs {
        if let Some(organ) = specs.keys().find(|k| !is_safe_component(k)) {
            return Err(ConfigError::Validation {
                message: format!("Invalid organ name in synthetic_lesions.specs: '{}'", organ),
            });
        }
    }

    Ok(())
}

fn validate_frames(config: &Config) -> Result<(), ConfigError> {
    let starts = &config.pbpk.frame_start_times;
    let durations = &config.pbpk.frame_durations;

    if starts.is_empty() {
        return Err(ConfigError::MissingField {
            field: "pbpk.frame_start_times".to_string(),
        });
    }

    if starts.len() != durations.len() {
        return Err(ConfigError::Validation {
            message: format!(
                "pbpk.frame_start_times has {} entries but pbpk.frame_durations has {}",
                starts.len(),
                durations.len()
            ),
        });
    }

    if starts.iter().any(|t| !t.is_finite() || *t < 0.0) {
        return Err(ConfigError::Validation {
            message: "pbpk.frame_start_times must be finite and non-negative".to_string(),
        });
    }

    if starts.windows(2).any(|w| w[1] <= w[0]) {
        return Err(ConfigError::Validation {
            message: "pbpk.frame_start_times must be strictly increasing".to_string(),
        });
    }

    for duration in durations {
        require_positive("pbpk.frame_durations", *duration)?;
    }

    Ok(())
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Validation {
            message: format!("{} must be a positive number (got {})", field, value),
        });
    }
    Ok(())
}
