use serde::{Deserialize, Serialize};

use crate::aggregation::aggregate::AggregatedProjection;
use crate::aggregation::projection::{EnergyWindowSet, Window};
use crate::error::AggregationError;

/// Counts-to-activity conversion from the reference (calibration) simulation.
///
/// `sensitivity[w]` is detected counts per MBq in window `w`. Computed once per
/// case from the calibration job and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactor {
    pub window_counts: [f64; 3],
    pub reference_activity_mbq: f64,
    pub sensitivity: [f64; 3],
}

impl CalibrationFactor {
    pub fn from_reference(
        reference: &EnergyWindowSet,
        reference_activity_mbq: f64,
    ) -> Result<Self, AggregationError> {
        if !reference_activity_mbq.is_finite() || reference_activity_mbq <= 0.0 {
            return Err(AggregationError::Calibration(format!(
                "reference activity must be positive (got {})",
                reference_activity_mbq
            )));
        }

        // Sequential f64 sums keep the factor bit-for-bit reproducible.
        let window_counts =
            Window::ALL.map(|w| reference.get(w).iter().map(|v| f64::from(*v)).sum::<f64>());
        let sensitivity = window_counts.map(|counts| counts / reference_activity_mbq);

        Ok(Self {
            window_counts,
            reference_activity_mbq,
            sensitivity,
        })
    }

    pub fn photopeak_sensitivity(&self) -> f64 {
        self.sensitivity[Window::Photopeak.slot()]
    }

    /// Converts the photopeak counts of `projection` to MBq. Exact zeros stay zero.
    pub fn apply(&self, projection: &AggregatedProjection) -> Result<Vec<f32>, AggregationError> {
        let sensitivity = self.photopeak_sensitivity();
        if sensitivity == 0.0 || !sensitivity.is_finite() {
            return Err(AggregationError::Calibration(format!(
                "photopeak sensitivity is {}; no counts-to-activity conversion exists",
                sensitivity
            )));
        }

        let scale = 1.0 / sensitivity;
        Ok(projection
            .window(Window::Photopeak)
            .iter()
            .map(|counts| (counts * scale) as f32)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::aggregate::Ratio;
    use crate::stage::TimeFrame;

    fn reference() -> EnergyWindowSet {
        EnergyWindowSet {
            lower: vec![1.0, 1.0],
            photopeak: vec![30.0, 20.0],
            upper: vec![0.5, 0.5],
        }
    }

    fn projection(photopeak: Vec<f64>) -> AggregatedProjection {
        AggregatedProjection {
            frame: TimeFrame {
                index: 0,
                start_min: 60.0,
                duration_min: 15.0,
            },
            windows: [vec![0.0; photopeak.len()], photopeak.clone(), vec![0.0; photopeak.len()]],
            contributing_rois: vec!["kidney".to_string()],
            scatter_ratio: Ratio::NotApplicable,
        }
    }

    #[test]
    fn test_sensitivity_per_window() {
        let factor = CalibrationFactor::from_reference(&reference(), 2.0).unwrap();
        assert_eq!(factor.window_counts, [2.0, 50.0, 1.0]);
        assert_eq!(factor.sensitivity, [1.0, 25.0, 0.5]);
    }

    #[test]
    fn test_apply_converts_and_keeps_zeros() {
        let factor = CalibrationFactor::from_reference(&reference(), 2.0).unwrap();
        let calibrated = factor.apply(&projection(vec![50.0, 0.0, 25.0])).unwrap();
        assert_eq!(calibrated, vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_deterministic() {
        let a = CalibrationFactor::from_reference(&reference(), 1.7).unwrap();
        let b = CalibrationFactor::from_reference(&reference(), 1.7).unwrap();
        assert_eq!(a.sensitivity.map(f64::to_bits), b.sensitivity.map(f64::to_bits));

        let p = projection(vec![3.3, 7.1]);
        let ca: Vec<u32> = a.apply(&p).unwrap().iter().map(|v| v.to_bits()).collect();
        let cb: Vec<u32> = b.apply(&p).unwrap().iter().map(|v| v.to_bits()).collect();
        assert_eq!(ca, cb);
    }

    #[test]
    fn test_zero_photopeak_is_error() {
        let zero = EnergyWindowSet {
            lower: vec![1.0],
            photopeak: vec![0.0],
            upper: vec![1.0],
        };
        let factor = CalibrationFactor::from_reference(&zero, 1.0).unwrap();
        assert!(matches!(
            factor.apply(&projection(vec![1.0])),
            Err(AggregationError::Calibration(_))
        ));
    }

    #[test]
    fn test_non_positive_activity_rejected() {
        assert!(CalibrationFactor::from_reference(&reference(), 0.0).is_err());
    }
}
