//! Roadway defect geotagger.
//!
//! Consumes per-frame detections from an external detector, grades each one
//! by how much of the frame it covers, tags recordable ones with a position
//! from a pluggable location source, and keeps an always-valid JSON event
//! log next to one image per event.
//!
//! # Module Structure
//!
//! - `severity`: severity grading and the recordability filter
//! - `geo`: location providers (device service, serial NMEA, IP lookup, static)
//! - `event` / `store`: immutable events and the flushed event log
//! - `annotate` / `frame`: drawing onto RGB frames
//! - `detect` / `ingest`: detector and frame-source boundaries
//! - `pipeline`: the per-frame loop
//! - `report` / `verify`: offline tools over a finished log

pub mod annotate;
pub mod config;
pub mod detect;
pub mod event;
pub mod frame;
pub mod geo;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod severity;
pub mod store;
pub mod verify;

pub use annotate::{Canvas, Drawable, FrameAnnotator, Rgb, RunMetrics};
pub use config::TaggerConfig;
pub use detect::{BoundingBox, DefectDetector, Detection};
pub use event::{Event, EventCandidate, EventRecord};
pub use frame::Frame;
pub use geo::{GeoFix, GeoLocationProvider, ProviderKind};
pub use pipeline::{PipelineOrchestrator, PipelineState, RunSummary};
pub use severity::{classify, RecordabilityFilter, SeverityLevel};
pub use store::{EventLogStorage, EventRecordStore, FlushError, JsonFileLogStorage, LogMode};
