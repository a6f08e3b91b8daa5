mod backend;
mod backends;
mod labels;
mod result;

use anyhow::Result;

use crate::config::DetectorSettings;

pub use backend::DefectDetector;
pub use backends::{NullDetector, ScriptedDetector};
pub use labels::{label_for, load_labels};
pub use result::{BoundingBox, Detection};

/// Replay detector when a replay file is configured, otherwise the null detector.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn DefectDetector>> {
    match &settings.replay_path {
        Some(path) => {
            let detector = ScriptedDetector::from_path(path)?;
            log::info!(
                "detector: replaying {} frame(s) from {}",
                detector.remaining(),
                path.display()
            );
            Ok(Box::new(detector))
        }
        None => {
            log::warn!("detector: no replay file configured, no detections will be produced");
            Ok(Box::new(NullDetector))
        }
    }
}
