use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregation::projection::{EnergyWindowSet, Window};
use crate::error::AggregationError;
use crate::stage::TimeFrame;

/// Derived ratio that is undefined when its denominator is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ratio {
    Value(f64),
    NotApplicable,
}

impl Ratio {
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
            Ratio::NotApplicable
        } else {
            Ratio::Value(numerator / denominator)
        }
    }
}

/// Per-frame sum of every ROI's energy windows. Windows stay separate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedProjection {
    pub frame: TimeFrame,
    /// Lower / photopeak / upper sums, accumulated in `f64`.
    pub windows: [Vec<f64>; 3],
    pub contributing_rois: Vec<String>,
    /// Scatter windows over photopeak.
    pub scatter_ratio: Ratio,
}

impl AggregatedProjection {
    pub fn window(&self, window: Window) -> &[f64] {
        &self.windows[window.slot()]
    }

    pub fn window_totals(&self) -> [f64; 3] {
        Window::ALL.map(|w| self.window(w).iter().sum())
    }

    pub fn to_window_set(&self) -> EnergyWindowSet {
        let narrow = |w: Window| self.window(w).iter().map(|v| *v as f32).collect();
        EnergyWindowSet {
            lower: narrow(Window::Lower),
            photopeak: narrow(Window::Photopeak),
            upper: narrow(Window::Upper),
        }
    }

    pub fn report(&self) -> FrameReport {
        FrameReport {
            frame: self.frame.label(),
            start_min: self.frame.start_min,
            duration_min: self.frame.duration_min,
            window_totals: self.window_totals(),
            contributing_rois: self.contributing_rois.clone(),
            scatter_ratio: self.scatter_ratio,
        }
    }
}

/// Entry of `<prefix>_aggregation.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame: String,
    pub start_min: f64,
    pub duration_min: f64,
    pub window_totals: [f64; 3],
    pub contributing_rois: Vec<String>,
    pub scatter_ratio: Ratio,
}

/// Sums ROI contributions for a frame. Refuses to assemble a frame unless every
/// expected ROI contributed.
#[derive(Debug, Clone)]
pub struct Aggregator {
    expected_rois: Vec<String>,
}

impl Aggregator {
    pub fn new(rois: &[String]) -> Self {
        let mut expected_rois = rois.to_vec();
        expected_rois.sort();
        expected_rois.dedup();
        Self { expected_rois }
    }

    pub fn expected_rois(&self) -> &[String] {
        &self.expected_rois
    }

    pub fn aggregate(
        &self,
        frame: &TimeFrame,
        contributions: &BTreeMap<String, EnergyWindowSet>,
    ) -> Result<AggregatedProjection, AggregationError> {
        if self.expected_rois.is_empty() {
            return Err(AggregationError::NoContributions {
                frame: frame.label(),
            });
        }

        let missing: Vec<String> = self
            .expected_rois
            .iter()
            .filter(|r| !contributions.contains_key(*r))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AggregationError::IncompleteFrame {
                frame: frame.label(),
                missing,
            });
        }

        let mut windows: Option<[Vec<f64>; 3]> = None;
        let mut expected_len = 0;

        // Summation runs in sorted ROI order, so the result does not depend on
        // the order in which jobs finished.
        for roi in &self.expected_rois {
            let set = match contributions.get(roi) {
                Some(set) => set,
                None => continue,
            };

            let sums = windows.get_or_insert_with(|| {
                expected_len = set.lower.len();
                [
                    vec![0.0; expected_len],
                    vec![0.0; expected_len],
                    vec![0.0; expected_len],
                ]
            });

            for window in Window::ALL {
                let samples = set.get(window);
                if samples.len() != expected_len {
                    return Err(AggregationError::LengthMismatch {
                        frame: frame.label(),
                        roi: roi.clone(),
                        expected: expected_len,
                        actual: samples.len(),
                    });
                }
                for (acc, sample) in sums[window.slot()].iter_mut().zip(samples) {
                    *acc += f64::from(*sample);
                }
            }
        }

        let windows = windows.ok_or_else(|| AggregationError::NoContributions {
            frame: frame.label(),
        })?;

        let lower: f64 = windows[Window::Lower.slot()].iter().sum();
        let photopeak: f64 = windows[Window::Photopeak.slot()].iter().sum();
        let upper: f64 = windows[Window::Upper.slot()].iter().sum();

        Ok(AggregatedProjection {
            frame: frame.clone(),
            windows,
            contributing_rois: self.expected_rois.clone(),
            scatter_ratio: Ratio::of(lower + upper, photopeak),
        })
    }
}
