use anyhow::Result;
use std::path::PathBuf;

use crate::config::DisplaySettings;
use crate::frame::Frame;

/// Where annotated frames go. Failures are logged by the caller and never
/// stop the run.
pub trait DisplaySink {
    fn show(&mut self, frame: &Frame) -> Result<()>;
}

impl DisplaySink for Box<dyn DisplaySink> {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        (**self).show(frame)
    }
}

#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Writes every Nth annotated frame to a fixed path, replacing the previous one.
#[derive(Debug)]
pub struct SnapshotDisplay {
    path: PathBuf,
    every: u64,
    seen: u64,
    written: u64,
}

impl SnapshotDisplay {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            seen: 0,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for SnapshotDisplay {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        self.seen += 1;
        if (self.seen - 1) % self.every != 0 {
            return Ok(());
        }
        frame.save(&self.path)?;
        self.written += 1;
        Ok(())
    }
}

pub fn build_display(settings: &DisplaySettings) -> Box<dyn DisplaySink> {
    match &settings.snapshot_path {
        Some(path) => Box::new(SnapshotDisplay::new(path, settings.snapshot_every)),
        None => Box::new(NullDisplay),
    }
}
