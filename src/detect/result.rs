use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Axis-aligned box in pixel coordinates. `(x, y)` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Builds a box, rejecting non-positive width or height.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Result<Self> {
        if !(w > 0.0 && h > 0.0) {
            return Err(anyhow!(
                "bounding box must have positive size (w={}, h={})",
                w,
                h
            ));
        }
        Ok(Self { x, y, w, h })
    }

    pub fn area(&self) -> f64 {
        self.w as f64 * self.h as f64
    }

    /// Top-edge y coordinate.
    pub fn top(&self) -> f32 {
        self.y
    }
}

/// One candidate defect reported by the detector for a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!("confidence {} outside [0, 1]", confidence));
        }
        Ok(Self {
            class_id,
            confidence,
            bbox,
        })
    }
}

/// Wire form used by replay files: `{"class_id": 0, "confidence": 0.9, "box": [x, y, w, h]}`.
#[derive(Debug, Deserialize)]
pub(crate) struct DetectionRecord {
    #[serde(default)]
    pub class_id: u32,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = anyhow::Error;

    fn try_from(record: DetectionRecord) -> Result<Self> {
        let [x, y, w, h] = record.bbox;
        Detection::new(record.class_id, record.confidence, BoundingBox::new(x, y, w, h)?)
    }
}
