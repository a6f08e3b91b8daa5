//! Frame sources.
//!
//! - `stub://<name>`: synthetic frames for tests and dry runs
//! - a local directory: every decodable image in it, in file-name order
//!
//! Camera capture and video decoding stay outside the crate; anything that
//! can produce RGB frames can implement `FrameSource`.

mod image_dir;
mod synthetic;

use anyhow::{anyhow, Result};

use crate::config::SourceSettings;
use crate::frame::Frame;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;

pub const STUB_PREFIX: &str = "stub://";

pub trait FrameSource {
    /// Next frame, or `None` when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn stats(&self) -> SourceStats;
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// Opens the source named by `settings.uri`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if !is_local_uri(&settings.uri) {
        return Err(anyhow!(
            "frame source '{}' must be stub:// or a local directory",
            settings.uri
        ));
    }
    if settings.uri.starts_with(STUB_PREFIX) {
        Ok(Box::new(SyntheticSource::new(
            &settings.uri,
            settings.width,
            settings.height,
            settings.frames,
        )?))
    } else {
        Ok(Box::new(ImageDirSource::open(&settings.uri)?))
    }
}

fn is_local_uri(uri: &str) -> bool {
    if uri.trim().is_empty() {
        return false;
    }
    uri.starts_with(STUB_PREFIX) || !uri.contains("://")
}
