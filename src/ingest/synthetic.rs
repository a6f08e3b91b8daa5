use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Generated frames with a slowly drifting gradient.
pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(uri: &str, width: u32, height: u32, limit: Option<u64>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source needs a non-zero frame size"));
        }
        log::info!("SyntheticSource: {} at {}x{}", uri, width, height);
        Ok(Self {
            uri: uri.to_string(),
            width,
            height,
            limit,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.uri.clone(),
        }
    }
}
