//! Frame buffer handed through the pipeline.
//!
//! - `Frame`: RGB8 pixels plus dimensions and a capture index.
//! - Implements `Canvas`, so the annotator can draw on it in place.
//!
//! Rectangles and text are both rasterized into the pixel buffer, so saved
//! event images and display snapshots carry every annotation. Text uses the
//! 8x8 public-domain bitmap font scaled by `TEXT_SCALE`, with `y` as the
//! baseline.

use anyhow::{anyhow, Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use std::path::Path;

use crate::annotate::{Canvas, Rgb};

const GLYPH_SIZE: i64 = 8;
pub const TEXT_SCALE: i64 = 2;

pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based capture index within the run.
    pub index: u64,
}

impl Frame {
    /// Wraps an RGB8 buffer. Fails when the buffer length does not match.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer size mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
        })
    }

    /// Solid-color frame, mostly for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, index: u64, color: Rgb) -> Result<Self> {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&color.0);
        }
        Self::from_rgb(pixels, width, height, index)
    }

    /// Decodes any image format enabled on the `image` crate.
    pub fn load(path: &Path, index: u64) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("decode frame {}", path.display()))?
            .to_rgb8();
        let (width, height) = img.dimensions();
        Self::from_rgb(img.into_raw(), width, height, index)
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some(Rgb([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]))
    }

    /// Writes the frame to disk; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        image::save_buffer(
            path,
            &self.pixels,
            self.width,
            self.height,
            image::ColorType::Rgb8,
        )
        .with_context(|| format!("write frame image {}", path.display()))
    }

    fn set_pixel(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&color.0);
    }

    fn fill_block(&mut self, x: i64, y: i64, size: i64, color: Rgb) {
        for dy in 0..size {
            for dx in 0..size {
                self.set_pixel(x + dx, y + dy, color);
            }
        }
    }
}

impl Canvas for Frame {
    fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Rgb, thickness: u32) {
        let (x0, y0) = (x as i64, y as i64);
        let (x1, y1) = (x0 + w as i64, y0 + h as i64);
        // only the visible part of each edge is walked
        let (cx0, cx1) = (x0.max(0), x1.min(self.width as i64 - 1));
        let (cy0, cy1) = (y0.max(0), y1.min(self.height as i64 - 1));
        if cx0 > cx1 || cy0 > cy1 {
            return;
        }
        let thickness = thickness.clamp(1, self.width.max(self.height)) as i64;
        for t in 0..thickness {
            for px in cx0..=cx1 {
                self.set_pixel(px, y0 + t, color);
                self.set_pixel(px, y1 - t, color);
            }
            for py in cy0..=cy1 {
                self.set_pixel(x0 + t, py, color);
                self.set_pixel(x1 - t, py, color);
            }
        }
    }

    fn put_text(&mut self, text: &str, x: i32, y: i32, color: Rgb) {
        let advance = GLYPH_SIZE * TEXT_SCALE;
        let top = y as i64 - advance;
        let mut left = x as i64;
        for ch in text.chars() {
            if left >= self.width as i64 {
                break;
            }
            let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
            if let Some(rows) = glyph {
                for (row, bits) in rows.iter().enumerate() {
                    for col in 0..GLYPH_SIZE {
                        if bits & (1 << col) != 0 {
                            self.fill_block(
                                left + col * TEXT_SCALE,
                                top + row as i64 * TEXT_SCALE,
                                TEXT_SCALE,
                                color,
                            );
                        }
                    }
                }
            }
            left += advance;
        }
    }
}
