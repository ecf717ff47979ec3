//! Producer side of the minimap.
//!
//! Turns raw position samples (level name + world coordinates) into
//! [`StateSnapshot`](minimap_protocol::StateSnapshot)s using per-level map
//! calibration, and decides when a new snapshot is worth publishing.

mod calibration;
mod tracker;

pub use calibration::{CalibrationTable, LevelCalibration, Point, Projection};
pub use tracker::{Sample, Tracker};

/// Errors produced while loading or applying calibration data.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid calibration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("degenerate calibration for level {level:?}: reference points share an {axis} coordinate")]
    Degenerate { level: String, axis: char },
}
