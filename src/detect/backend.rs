use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Defect detector boundary.
///
/// The model itself lives outside this crate. Implementations turn one frame
/// into zero or more detections and must not keep the frame beyond the call.
pub trait DefectDetector: Send {
    /// Detector identifier for logs.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl DefectDetector for Box<dyn DefectDetector> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
