//! Sample → snapshot conversion with change detection.

use chrono::{DateTime, Utc};
use minimap_protocol::StateSnapshot;

use crate::calibration::{CalibrationTable, LevelCalibration, Projection};

/// One reading from the position source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub level_name: String,
    pub x: f64,
    pub y: f64,
    pub angle: f64,
}

struct ActiveLevel {
    name: String,
    calibration: LevelCalibration,
    projection: Projection,
}

/// Converts position samples into snapshots worth publishing.
///
/// Samples for a level without calibration are skipped until a known level
/// shows up; the previously active level stays selected meanwhile.
pub struct Tracker {
    table: CalibrationTable,
    scale: f64,
    active: Option<ActiveLevel>,
    last: Option<StateSnapshot>,
}

impl Tracker {
    pub fn new(table: CalibrationTable) -> Self {
        Self {
            table,
            scale: 1.0,
            active: None,
            last: None,
        }
    }

    /// Sets the display scale reported to clients. Non-positive values are ignored.
    pub fn set_scale(&mut self, scale: f64) {
        if scale > 0.0 && scale.is_finite() {
            self.scale = scale;
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Returns the last snapshot produced, or an empty one.
    pub fn current(&self) -> StateSnapshot {
        self.last.clone().unwrap_or_default()
    }

    /// Processes one sample.
    ///
    /// Returns a snapshot only when the observed state differs from the last
    /// one returned.
    pub fn observe(&mut self, sample: &Sample, now: DateTime<Utc>) -> Option<StateSnapshot> {
        if self.active.as_ref().map(|a| a.name.as_str()) != Some(sample.level_name.as_str()) {
            let Some(calibration) = self.table.get(&sample.level_name) else {
                tracing::debug!(level = %sample.level_name, "no calibration for level, skipping sample");
                return None;
            };
            let projection = match Projection::from_calibration(&sample.level_name, calibration) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("skipping sample: {e}");
                    return None;
                }
            };
            tracing::info!(level = %sample.level_name, image = %calibration.image, "level changed");
            self.active = Some(ActiveLevel {
                name: sample.level_name.clone(),
                calibration: calibration.clone(),
                projection,
            });
        }

        let active = self.active.as_ref()?;
        let pointer = active.projection.project(sample.x, sample.y);
        let snapshot = StateSnapshot {
            level_name: Some(active.name.clone()),
            player_x: sample.x,
            player_y: sample.y,
            angle: sample.angle,
            image_path: Some(active.calibration.image.clone()),
            map_width: active.calibration.width,
            map_height: active.calibration.height,
            pointer_x: pointer.x,
            pointer_y: pointer.y,
            scale: self.scale,
            updated: now,
        };

        if self.last.as_ref().is_some_and(|last| last.same_state(&snapshot)) {
            return None;
        }
        self.last = Some(snapshot.clone());
        Some(snapshot)
    }
}
