//! Severity policy and recordability filter.
//!
//! Severity is derived from the share of the frame a detection covers. It is
//! recomputed for every detection and never stored apart from an `Event`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detect::Detection;

pub const HIGH_RATIO: f64 = 0.10;
pub const MEDIUM_RATIO: f64 = 0.02;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.70;
pub const DEFAULT_MAX_AREA_RATIO: f64 = 0.10;
/// Boxes whose top edge sits at or below this row are ignored (hood/dashboard band).
pub const DEFAULT_EXCLUSION_BAND_Y: f32 = 600.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
}

impl SeverityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SeverityLevel::Low => "Low",
            SeverityLevel::Medium => "Medium",
            SeverityLevel::High => "High",
        }
    }

    /// Numeric weight used for area averages (Low=1, Medium=2, High=3).
    pub fn weight(self) -> u32 {
        match self {
            SeverityLevel::Low => 1,
            SeverityLevel::Medium => 2,
            SeverityLevel::High => 3,
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a box by its area relative to the frame.
///
/// Callers guarantee `frame_area > 0`; frame dimensions are fixed when the
/// stream opens.
pub fn classify(box_area: f64, frame_area: f64) -> SeverityLevel {
    let ratio = box_area / frame_area;
    if ratio > HIGH_RATIO {
        SeverityLevel::High
    } else if ratio > MEDIUM_RATIO {
        SeverityLevel::Medium
    } else {
        SeverityLevel::Low
    }
}

/// Acceptance filter deciding which detections become events.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordabilityFilter {
    pub min_confidence: f32,
    pub max_area_ratio: f64,
    pub exclusion_band_y: f32,
}

impl Default for RecordabilityFilter {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_area_ratio: DEFAULT_MAX_AREA_RATIO,
            exclusion_band_y: DEFAULT_EXCLUSION_BAND_Y,
        }
    }
}

/// Per-detection verdict produced by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assessment {
    pub severity: SeverityLevel,
    pub recordable: bool,
}

impl RecordabilityFilter {
    pub fn is_recordable(&self, detection: &Detection, frame_area: f64) -> bool {
        let ratio = detection.bbox.area() / frame_area;
        detection.confidence >= self.min_confidence
            && ratio <= self.max_area_ratio
            && detection.bbox.top() < self.exclusion_band_y
    }

    pub fn assess(&self, detection: &Detection, frame_area: f64) -> Assessment {
        Assessment {
            severity: classify(detection.bbox.area(), frame_area),
            recordable: self.is_recordable(detection, frame_area),
        }
    }
}
