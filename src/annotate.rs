//! Frame annotation: detection outlines, severity labels and the FPS figure.
//!
//! Drawing goes through the `Canvas` trait so the annotator never touches
//! pixel storage directly. `Frame` is the production canvas.

use std::time::{Duration, Instant};

use crate::detect::BoundingBox;
use crate::severity::SeverityLevel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const GREEN: Rgb = Rgb([0, 255, 0]);
    pub const BLUE: Rgb = Rgb([0, 0, 255]);
    pub const GREY: Rgb = Rgb([128, 128, 128]);
}

/// Drawing primitives the annotator needs.
pub trait Canvas {
    fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Rgb, thickness: u32);
    fn put_text(&mut self, text: &str, x: i32, y: i32, color: Rgb);
}

/// One detection to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct Drawable {
    pub bbox: BoundingBox,
    pub severity: SeverityLevel,
    pub recordable: bool,
}

/// Frame count and start time, owned by the orchestrator.
#[derive(Clone, Copy, Debug)]
pub struct RunMetrics {
    pub frames_processed: u64,
    pub started_at: Instant,
}

impl RunMetrics {
    pub fn start() -> Self {
        Self {
            frames_processed: 0,
            started_at: Instant::now(),
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps_at(self.started_at.elapsed())
    }

    /// Frames per second over `elapsed`; zero before any time has passed.
    pub fn fps_at(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.frames_processed as f64 / secs
    }
}

pub const FPS_ORIGIN: (i32, i32) = (20, 50);
const LABEL_OFFSET_Y: i32 = 10;

#[derive(Clone, Copy, Debug)]
pub struct FrameAnnotator {
    pub recordable_color: Rgb,
    pub other_color: Rgb,
    pub label_color: Rgb,
    pub fps_color: Rgb,
    pub thickness: u32,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self {
            recordable_color: Rgb::GREEN,
            other_color: Rgb::GREY,
            label_color: Rgb::BLUE,
            fps_color: Rgb::GREEN,
            thickness: 1,
        }
    }
}

impl FrameAnnotator {
    /// Draws every drawable, then the FPS figure.
    pub fn annotate<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        drawables: &[Drawable],
        metrics: &RunMetrics,
    ) {
        for drawable in drawables {
            self.draw_detection(canvas, drawable);
        }
        self.draw_metrics(canvas, metrics);
    }

    pub fn draw_detection<C: Canvas + ?Sized>(&self, canvas: &mut C, drawable: &Drawable) {
        let b = &drawable.bbox;
        let (x, y) = (b.x.round() as i32, b.y.round() as i32);
        let color = if drawable.recordable {
            self.recordable_color
        } else {
            self.other_color
        };
        canvas.draw_rect(
            x,
            y,
            b.w.round() as i32,
            b.h.round() as i32,
            color,
            self.thickness,
        );
        canvas.put_text(
            &format!("Severity: {}", drawable.severity),
            x,
            y - LABEL_OFFSET_Y,
            self.label_color,
        );
    }

    pub fn draw_metrics<C: Canvas + ?Sized>(&self, canvas: &mut C, metrics: &RunMetrics) {
        let (x, y) = FPS_ORIGIN;
        canvas.put_text(&format_fps(metrics.fps()), x, y, self.fps_color);
    }
}

pub fn format_fps(fps: f64) -> String {
    format!("FPS: {:.2}", fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        rects: Vec<(i32, i32, i32, i32, Rgb)>,
        texts: Vec<(String, i32, i32)>,
    }

    impl Canvas for Recorder {
        fn draw_rect(&mut self, x: i32, y: i32, w: i32, h: i32, color: Rgb, _thickness: u32) {
            self.rects.push((x, y, w, h, color));
        }

        fn put_text(&mut self, text: &str, x: i32, y: i32, _color: Rgb) {
            self.texts.push((text.to_string(), x, y));
        }
    }

    fn drawable(x: f32, y: f32, severity: SeverityLevel, recordable: bool) -> Drawable {
        Drawable {
            bbox: BoundingBox::new(x, y, 40.0, 30.0).unwrap(),
            severity,
            recordable,
        }
    }

    #[test]
    fn one_outline_and_label_per_detection_plus_fps() {
        let mut canvas = Recorder::default();
        let metrics = RunMetrics::start();
        FrameAnnotator::default().annotate(
            &mut canvas,
            &[
                drawable(10.0, 100.0, SeverityLevel::Medium, true),
                drawable(200.0, 700.0, SeverityLevel::Low, false),
            ],
            &metrics,
        );
        assert_eq!(canvas.rects.len(), 2);
        assert_eq!(canvas.rects[0], (10, 100, 40, 30, Rgb::GREEN));
        assert_eq!(canvas.rects[1].4, Rgb::GREY);
        assert_eq!(canvas.texts[0], ("Severity: Medium".to_string(), 10, 90));
        assert_eq!(canvas.texts[1].0, "Severity: Low");
        let (fps_text, x, y) = canvas.texts.last().unwrap();
        assert!(fps_text.starts_with("FPS: "));
        assert_eq!((*x, *y), FPS_ORIGIN);
    }

    #[test]
    fn fps_is_frames_over_elapsed() {
        let metrics = RunMetrics {
            frames_processed: 30,
            started_at: Instant::now(),
        };
        assert!((metrics.fps_at(Duration::from_secs(2)) - 15.0).abs() < 1e-9);
        assert_eq!(metrics.fps_at(Duration::ZERO), 0.0);
        assert_eq!(format_fps(15.0), "FPS: 15.00");
    }
}
