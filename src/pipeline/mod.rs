//! Per-frame loop.
//!
//! One orchestrator drives every location source: frames come from a
//! `FrameSource`, detections from a `DefectDetector`, positions from any
//! `GeoLocationProvider`, and recorded events go to an `EventRecordStore`.
//!
//! Each iteration:
//! 1. take the next frame (`None` ends the run)
//! 2. detect (a failure skips the frame)
//! 3. assess every detection; outline it; for recordable ones resolve a
//!    fix, write the image, then append the event
//! 4. draw the FPS figure and hand the frame to the display sink
//! 5. poll the stop signal

mod display;
mod stop;

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::annotate::{Drawable, FrameAnnotator, RunMetrics};
use crate::detect::{label_for, DefectDetector, Detection};
use crate::event::{image_file_name, EventCandidate};
use crate::frame::Frame;
use crate::geo::GeoLocationProvider;
use crate::ingest::FrameSource;
use crate::severity::{RecordabilityFilter, SeverityLevel};
use crate::store::{EventLogStorage, EventRecordStore};

pub use display::{build_display, DisplaySink, NullDisplay, SnapshotDisplay};
pub use stop::{CtrlCStop, NeverStop, StdinStop, StopSignal, QUIT_KEY};

/// Consecutive frame-read failures tolerated before the run stops.
pub const DEFAULT_SOURCE_ERROR_LIMIT: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Stopped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub recordable: u64,
    pub events_recorded: u64,
    pub absent_fixes: u64,
    pub flush_failures: u64,
    pub image_failures: u64,
    pub detector_failures: u64,
    pub source_failures: u64,
}

pub struct PipelineOrchestrator<P, L>
where
    P: GeoLocationProvider,
    L: EventLogStorage,
{
    source: Box<dyn FrameSource>,
    detector: Box<dyn DefectDetector>,
    provider: P,
    store: EventRecordStore<L>,
    image_dir: PathBuf,
    filter: RecordabilityFilter,
    annotator: FrameAnnotator,
    display: Box<dyn DisplaySink>,
    stop: Box<dyn StopSignal>,
    labels: Vec<String>,
    source_error_limit: u32,
    consecutive_source_errors: u32,
    metrics: RunMetrics,
    state: PipelineState,
    summary: RunSummary,
}

impl<P, L> PipelineOrchestrator<P, L>
where
    P: GeoLocationProvider,
    L: EventLogStorage,
{
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DefectDetector>,
        provider: P,
        store: EventRecordStore<L>,
        image_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            detector,
            provider,
            store,
            image_dir: image_dir.into(),
            filter: RecordabilityFilter::default(),
            annotator: FrameAnnotator::default(),
            display: Box::new(NullDisplay),
            stop: Box::new(NeverStop),
            labels: Vec::new(),
            source_error_limit: DEFAULT_SOURCE_ERROR_LIMIT,
            consecutive_source_errors: 0,
            metrics: RunMetrics::start(),
            state: PipelineState::Running,
            summary: RunSummary::default(),
        }
    }

    pub fn with_filter(mut self, filter: RecordabilityFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_annotator(mut self, annotator: FrameAnnotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn with_display(mut self, display: Box<dyn DisplaySink>) -> Self {
        self.display = display;
        self
    }

    pub fn with_stop_signal(mut self, stop: Box<dyn StopSignal>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_source_error_limit(mut self, limit: u32) -> Self {
        self.source_error_limit = limit.max(1);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &EventRecordStore<L> {
        &self.store
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Loops until `Stopped`, then returns the summary.
    pub fn run(&mut self) -> RunSummary {
        if let Err(e) = self.detector.warm_up() {
            log::warn!("detector {} warm-up failed: {:#}", self.detector.name(), e);
        }
        while self.step() == PipelineState::Running {}
        self.summary.clone()
    }

    /// Processes one frame.
    pub fn step(&mut self) -> PipelineState {
        if self.state == PipelineState::Stopped {
            return self.state;
        }

        let mut frame = match self.source.next_frame() {
            Ok(Some(frame)) => {
                self.consecutive_source_errors = 0;
                frame
            }
            Ok(None) => {
                log::info!("frame source exhausted");
                self.state = PipelineState::Stopped;
                return self.state;
            }
            Err(e) => {
                self.summary.source_failures += 1;
                self.consecutive_source_errors += 1;
                log::warn!("frame read failed: {:#}", e);
                if self.consecutive_source_errors >= self.source_error_limit {
                    log::error!(
                        "{} consecutive frame read failures; stopping",
                        self.consecutive_source_errors
                    );
                    self.state = PipelineState::Stopped;
                }
                return self.state;
            }
        };
        self.summary.frames += 1;
        self.metrics.frames_processed += 1;

        match self.detector.detect(&frame) {
            Ok(detections) => self.process_detections(&mut frame, detections),
            Err(e) => {
                self.summary.detector_failures += 1;
                log::warn!("detector failed on frame {}: {:#}", frame.index, e);
            }
        }

        self.finish_frame(&mut frame)
    }

    fn process_detections(&mut self, frame: &mut Frame, detections: Vec<Detection>) {
        let frame_area = frame.area();
        for detection in detections {
            self.summary.detections += 1;
            let assessment = self.filter.assess(&detection, frame_area);
            self.annotator.draw_detection(
                frame,
                &Drawable {
                    bbox: detection.bbox,
                    severity: assessment.severity,
                    recordable: assessment.recordable,
                },
            );
            if !assessment.recordable {
                log::debug!(
                    "frame {}: {} conf={:.2} not recordable",
                    frame.index,
                    label_for(&self.labels, detection.class_id),
                    detection.confidence
                );
                continue;
            }
            self.summary.recordable += 1;
            self.record(frame, &detection, assessment.severity);
        }
    }

    fn record(&mut self, frame: &Frame, detection: &Detection, severity: SeverityLevel) {
        let sequence_id = self.store.next_sequence_id();
        let geo_fix = self.provider.resolve();
        if !geo_fix.is_present() {
            self.summary.absent_fixes += 1;
        }

        let image_path = self.image_dir.join(image_file_name(sequence_id));
        if let Err(e) = frame.save(&image_path) {
            self.summary.image_failures += 1;
            log::error!("image write failed, event skipped: {:#}", e);
            return;
        }

        let candidate = EventCandidate {
            image_reference: image_path,
            geo_fix,
            severity,
            timestamp_utc: Utc::now(),
        };
        let label = label_for(&self.labels, detection.class_id);
        match self.store.append(candidate) {
            Ok(id) => {
                self.summary.events_recorded += 1;
                self.log_event(id, &label, detection.confidence);
            }
            Err(e) => {
                self.summary.events_recorded += 1;
                self.summary.flush_failures += 1;
                log::error!("{}", e);
                self.log_event(e.sequence_id, &label, detection.confidence);
            }
        }
    }

    fn log_event(&self, sequence_id: u64, label: &str, confidence: f32) {
        let Some(event) = self.store.events().get(sequence_id as usize) else {
            return;
        };
        let fix = event.geo_fix();
        let position = match fix.coordinates() {
            Some((lat, lon)) => format!("{:.6},{:.6}", lat, lon),
            None => "unknown".to_string(),
        };
        log::info!(
            "event #{}: {} severity={} conf={:.2} at={} via={} image={}",
            sequence_id,
            label,
            event.severity(),
            confidence,
            position,
            fix.source,
            event.image_reference().display()
        );
    }

    fn finish_frame(&mut self, frame: &mut Frame) -> PipelineState {
        self.annotator.draw_metrics(frame, &self.metrics);
        if let Err(e) = self.display.show(frame) {
            log::warn!("display sink failed: {:#}", e);
        }
        if let Some(command) = self.stop.poll() {
            if command == QUIT_KEY {
                log::info!("stop requested");
                self.state = PipelineState::Stopped;
            }
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Rgb;
    use crate::detect::{BoundingBox, NullDetector, ScriptedDetector};
    use crate::geo::{GeoFix, ProviderKind, StaticLocationProvider};
    use crate::ingest::SyntheticSource;
    use crate::store::InMemoryLogStorage;
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    struct FailingDetector;

    impl DefectDetector for FailingDetector {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("inference crashed"))
        }
    }

    struct ScriptedStop(VecDeque<Option<char>>);

    impl StopSignal for ScriptedStop {
        fn poll(&mut self) -> Option<char> {
            self.0.pop_front().flatten()
        }
    }

    struct CountingProvider {
        calls: u32,
    }

    impl GeoLocationProvider for CountingProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Device
        }

        fn resolve(&mut self) -> GeoFix {
            self.calls += 1;
            GeoFix::absent(ProviderKind::Device)
        }
    }

    fn source(frames: u64) -> Box<dyn FrameSource> {
        Box::new(SyntheticSource::new("stub://test", 100, 100, Some(frames)).unwrap())
    }

    fn detection(conf: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(0, conf, BoundingBox::new(x, y, w, h).unwrap()).unwrap()
    }

    #[test]
    fn end_of_stream_stops_without_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineOrchestrator::new(
            source(3),
            Box::new(NullDetector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        );
        let summary = pipeline.run();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.events_recorded, 0);
        assert_eq!(pipeline.step(), PipelineState::Stopped);
    }

    #[test]
    fn detector_failure_skips_frame_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineOrchestrator::new(
            source(4),
            Box::new(FailingDetector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        );
        let summary = pipeline.run();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.detector_failures, 4);
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn quit_key_stops_after_current_frame() {
        let dir = tempfile::tempdir().unwrap();
        let stop = ScriptedStop(VecDeque::from(vec![None, Some('x'), Some(QUIT_KEY)]));
        let mut pipeline = PipelineOrchestrator::new(
            source(100),
            Box::new(NullDetector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        )
        .with_stop_signal(Box::new(stop));
        let summary = pipeline.run();
        assert_eq!(summary.frames, 3);
    }

    #[test]
    fn non_recordable_detections_never_resolve_location() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![vec![
            detection(0.69, 10.0, 10.0, 10.0, 10.0),
            detection(0.95, 0.0, 0.0, 50.0, 50.0),
        ]]);
        let mut pipeline = PipelineOrchestrator::new(
            source(1),
            Box::new(detector),
            CountingProvider { calls: 0 },
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        );
        let summary = pipeline.run();
        assert_eq!(summary.detections, 2);
        assert_eq!(summary.recordable, 0);
        assert_eq!(pipeline.provider.calls, 0);
    }

    #[test]
    fn absent_fix_still_records_event_with_null_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![vec![detection(0.9, 10.0, 10.0, 20.0, 20.0)]]);
        let mut pipeline = PipelineOrchestrator::new(
            source(1),
            Box::new(detector),
            CountingProvider { calls: 0 },
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        );
        let summary = pipeline.run();
        assert_eq!(summary.events_recorded, 1);
        assert_eq!(summary.absent_fixes, 1);
        let event = &pipeline.store().events()[0];
        assert!(event.geo_fix().coordinates().is_none());
        assert!(dir.path().join("pot0.jpg").exists());
    }

    #[test]
    fn image_write_failure_skips_event() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![vec![detection(0.9, 10.0, 10.0, 20.0, 20.0)]]);
        let mut pipeline = PipelineOrchestrator::new(
            source(1),
            Box::new(detector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path().join("does-not-exist"),
        );
        let summary = pipeline.run();
        assert_eq!(summary.image_failures, 1);
        assert_eq!(summary.events_recorded, 0);
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn flush_failure_is_counted_but_event_kept() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![
            vec![detection(0.9, 10.0, 10.0, 20.0, 20.0)],
            vec![detection(0.9, 10.0, 10.0, 20.0, 20.0)],
        ]);
        let storage = InMemoryLogStorage {
            fail_next: 1,
            ..InMemoryLogStorage::default()
        };
        let mut pipeline = PipelineOrchestrator::new(
            source(2),
            Box::new(detector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(storage),
            dir.path(),
        );
        let summary = pipeline.run();
        assert_eq!(summary.events_recorded, 2);
        assert_eq!(summary.flush_failures, 1);
        assert_eq!(pipeline.store().pending(), 0);
        assert_eq!(pipeline.store().storage().writes, 1);
    }

    #[test]
    fn saved_image_carries_the_outline() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::new(vec![vec![detection(0.9, 10.0, 10.0, 20.0, 20.0)]]);
        let frames: Box<dyn FrameSource> = Box::new(OneFrame(Some(
            Frame::filled(100, 100, 1, Rgb([0, 0, 0])).unwrap(),
        )));
        let mut pipeline = PipelineOrchestrator::new(
            frames,
            Box::new(detector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        );
        pipeline.run();
        let saved = image::open(dir.path().join("pot0.jpg")).unwrap().to_rgb8();
        let corner = saved.get_pixel(10, 10);
        let inside = saved.get_pixel(20, 20);
        assert!(corner[1] > 60, "outline should be green, got {:?}", corner);
        assert!(inside[1] < 30, "interior should stay dark, got {:?}", inside);
    }

    #[test]
    fn saved_image_carries_the_severity_label() {
        let dir = tempfile::tempdir().unwrap();
        // label baseline sits 10 px above the box, at y = 40
        let detector = ScriptedDetector::new(vec![vec![detection(0.9, 30.0, 50.0, 20.0, 20.0)]]);
        let frames: Box<dyn FrameSource> = Box::new(OneFrame(Some(
            Frame::filled(200, 100, 1, Rgb([0, 0, 0])).unwrap(),
        )));
        let mut pipeline = PipelineOrchestrator::new(
            frames,
            Box::new(detector),
            StaticLocationProvider::new(1.0, 2.0).unwrap(),
            EventRecordStore::new(InMemoryLogStorage::default()),
            dir.path(),
        );
        pipeline.run();
        let saved = image::open(dir.path().join("pot0.jpg")).unwrap().to_rgb8();
        let label_ink = (24..40)
            .flat_map(|y| (30..200).map(move |x| (x, y)))
            .filter(|&(x, y)| saved.get_pixel(x, y)[2] > 100)
            .count();
        assert!(label_ink > 20, "label pixels missing from saved image");
    }

    struct OneFrame(Option<Frame>);

    impl FrameSource for OneFrame {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.0.take())
        }

        fn stats(&self) -> crate::ingest::SourceStats {
            crate::ingest::SourceStats {
                frames_captured: 1,
                uri: "test://one".to_string(),
            }
        }
    }
}
