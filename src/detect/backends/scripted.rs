use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::path::Path;

use crate::detect::backend::DefectDetector;
use crate::detect::result::{Detection, DetectionRecord};
use crate::frame::Frame;

/// Replays recorded detections, one batch per frame.
///
/// The replay file is a JSON array with one entry per frame, each entry an
/// array of `{"class_id": 0, "confidence": 0.9, "box": [x, y, w, h]}`.
/// Once the script runs out every further frame has no detections.
pub struct ScriptedDetector {
    batches: VecDeque<Vec<Detection>>,
}

impl ScriptedDetector {
    pub fn new(batches: Vec<Vec<Detection>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read detection replay {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parse detection replay {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let frames: Vec<Vec<DetectionRecord>> =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid replay json: {}", e))?;
        let mut batches = Vec::with_capacity(frames.len());
        for (frame_no, records) in frames.into_iter().enumerate() {
            let batch = records
                .into_iter()
                .map(Detection::try_from)
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("replay frame {}", frame_no))?;
            batches.push(batch);
        }
        Ok(Self::new(batches))
    }

    /// Batches not yet handed out.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

impl DefectDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
