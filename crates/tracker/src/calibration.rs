//! Level-to-image calibration data.
//!
//! Each level's map image is calibrated with two reference points, each
//! pairing a world coordinate with the matching pixel on the image. A linear
//! per-axis mapping is derived from the pair.
//!
//! # File format
//!
//! ```toml
//! [levels."Floodways"]
//! ref1 = { x = -30.53606, y = 33.62107 }
//! img1 = { x = 1042.0, y = 1188.0 }
//! ref2 = { x = 154.6815, y = 158.3651 }
//! img2 = { x = 1941.0, y = 578.0 }
//! width = 2390.0
//! height = 1623.0
//! image = "R5A1.png"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CalibrationError;

/// A 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Calibration of one level's map image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelCalibration {
    /// First reference point in world coordinates.
    pub ref1: Point,
    /// Pixel matching `ref1`.
    pub img1: Point,
    pub ref2: Point,
    pub img2: Point,
    /// Image size in pixels.
    pub width: f64,
    pub height: f64,
    /// Image file name, resolved by the server under `/images/`.
    pub image: String,
}

/// Linear world → image mapping derived from a [`LevelCalibration`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    scale: Point,
    origin: Point,
    dest: Point,
}

impl Projection {
    /// Derives the mapping for `level`.
    pub fn from_calibration(level: &str, cal: &LevelCalibration) -> Result<Self, CalibrationError> {
        let dx = cal.ref2.x - cal.ref1.x;
        let dy = cal.ref2.y - cal.ref1.y;
        if dx == 0.0 {
            return Err(CalibrationError::Degenerate {
                level: level.to_string(),
                axis: 'x',
            });
        }
        if dy == 0.0 {
            return Err(CalibrationError::Degenerate {
                level: level.to_string(),
                axis: 'y',
            });
        }

        Ok(Self {
            scale: Point::new((cal.img2.x - cal.img1.x) / dx, (cal.img2.y - cal.img1.y) / dy),
            origin: cal.ref1,
            dest: cal.img1,
        })
    }

    /// Maps a world position to image pixels.
    pub fn project(&self, x: f64, y: f64) -> Point {
        Point::new(
            self.scale.x * (x - self.origin.x) + self.dest.x,
            self.scale.y * (y - self.origin.y) + self.dest.y,
        )
    }
}

/// Calibrations keyed by level name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    #[serde(default)]
    levels: HashMap<String, LevelCalibration>,
}

impl CalibrationTable {
    /// The calibrations shipped with the application.
    pub fn builtin() -> Self {
        let levels = BUILTIN
            .iter()
            .map(|&(name, ref1, img1, ref2, img2, (width, height), image)| {
                let cal = LevelCalibration {
                    ref1: Point::new(ref1.0, ref1.1),
                    img1: Point::new(img1.0, img1.1),
                    ref2: Point::new(ref2.0, ref2.1),
                    img2: Point::new(img2.0, img2.1),
                    width,
                    height,
                    image: image.to_string(),
                };
                (name.to_string(), cal)
            })
            .collect();
        Self { levels }
    }

    /// Parses a calibration table from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, CalibrationError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the built-in table and overlays the levels defined in `path`.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let content = std::fs::read_to_string(path)?;
        let overrides = Self::from_toml_str(&content)?;
        let mut table = Self::builtin();
        let count = overrides.len();
        table.merge(overrides);
        tracing::debug!(path = %path.display(), count, "calibration file loaded");
        Ok(table)
    }

    /// Adds or replaces levels from `other`.
    pub fn merge(&mut self, other: CalibrationTable) {
        self.levels.extend(other.levels);
    }

    pub fn insert(&mut self, level: impl Into<String>, cal: LevelCalibration) {
        self.levels.insert(level.into(), cal);
    }

    pub fn get(&self, level: &str) -> Option<&LevelCalibration> {
        self.levels.get(level)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

type BuiltinEntry = (
    &'static str,
    (f64, f64),
    (f64, f64),
    (f64, f64),
    (f64, f64),
    (f64, f64),
    &'static str,
);

#[rustfmt::skip]
const BUILTIN: &[BuiltinEntry] = &[
    ("Floodways",   (-30.53606, 33.62107),  (1042.0, 1188.0), (154.68150, 158.36510),  (1941.0, 578.0),  (2390.0, 1623.0),  "R5A1.png"),
    ("Recollect",   (-15.68219, 33.39020),  (3438.0, 2238.0), (21.66232, 66.58588),    (3922.0, 1805.0), (4961.0, 3128.0),  "R5A2.png"),
    ("Mining",      (-15.48526, 35.48653),  (6273.0, 5236.0), (-222.14380, 157.75900), (3092.0, 3344.0), (10442.0, 6441.0), "R5A3.png"),
    ("Smother",     (-92.53666, 33.50102),  (223.0, 3096.0),  (41.55623, 139.47990),   (2319.0, 1445.0), (8192.0, 8168.0),  "R5B1.png"),
    ("Discharge",   (141.84010, 38.63810),  (4767.0, 4057.0), (-5.77276, 274.48680),   (2455.0, 362.0),  (6255.0, 7192.0),  "R5B2.png"),
    ("Unseal",      (150.20460, 33.66447),  (2923.0, 3009.0), (-10.64170, 195.12910),  (416.0, 481.0),   (4410.0, 5726.0),  "R5B3.png"),
    ("Diversion",   (-93.98196, 34.98185),  (1248.0, 7104.0), (8.39555, 286.54610),    (2840.0, 3167.0), (5366.0, 8171.0),  "R5B4.png"),
    ("Binary",      (153.99590, 97.71357),  (4937.0, 5030.0), (-86.11004, 284.36490),  (1207.0, 2084.0), (5203.0, 7184.0),  "R5C1.png"),
    ("Access",      (-281.10670, 37.05779), (2149.0, 4050.0), (86.86817, 277.01640),   (7875.0, 309.0),  (9669.0, 5197.0),  "R5C2.png"),
    ("Starvation",  (-27.15706, 97.54346),  (3948.0, 8174.0), (-208.65670, 289.90450), (1138.0, 5174.0), (5962.0, 10207.0), "R5C3.png"),
    ("Even Deeper", (94.37240, 161.55690),  (2571.0, 5768.0), (-94.63663, 610.64720),  (707.0, 1328.0),  (3227.0, 7709.0),  "R5D1.png"),
    ("Error",       (222.31290, 33.37928),  (7409.0, 4104.0), (-154.00380, 228.45910), (1554.0, 1075.0), (9529.0, 5532.0),  "R5D2.png"),
    ("KDS Deep",    (29.83016, 34.39783),   (5459.0, 1861.0), (-273.94760, -448.13540),(726.0, 9359.0),  (5735.0, 12843.0), "R5E1.png"),
];
