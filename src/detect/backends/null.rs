use anyhow::Result;

use crate::detect::backend::DefectDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector that never sees anything.
#[derive(Debug, Default)]
pub struct NullDetector;

impl DefectDetector for NullDetector {
    fn name(&self) -> &'static str {
        "null"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
