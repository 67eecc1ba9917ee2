pub mod aggregate;
pub mod calibration;
pub mod projection;

pub use aggregate::{AggregatedProjection, Aggregator, FrameReport, Ratio};
pub use calibration::CalibrationFactor;
pub use projection::{
    read_projection, window_file, window_files, write_projection, EnergyWindowSet, Window,
};
