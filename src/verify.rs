//! Consistency checks for a written event log.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::event::{image_file_name, EventRecord};

#[derive(Clone, Debug, PartialEq)]
pub enum IssueKind {
    /// Entry does not deserialize as an event record.
    Malformed(String),
    InvalidTimestamp(String),
    /// Timestamp earlier than the previous entry's.
    OutOfOrder,
    /// Exactly one of latitude/longitude is set.
    PartialCoordinates,
    CoordinatesOutOfRange,
    /// Image already referenced by the entry at this index.
    DuplicateImage(usize),
    MissingImage(PathBuf),
    /// Image name does not match the entry's position.
    UnexpectedImageName { expected: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Issue {
    pub index: usize,
    pub kind: IssueKind,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry {}: ", self.index)?;
        match &self.kind {
            IssueKind::Malformed(e) => write!(f, "malformed record ({})", e),
            IssueKind::InvalidTimestamp(ts) => write!(f, "invalid datetime_utc '{}'", ts),
            IssueKind::OutOfOrder => write!(f, "datetime_utc earlier than previous entry"),
            IssueKind::PartialCoordinates => write!(f, "only one of latitude/longitude is set"),
            IssueKind::CoordinatesOutOfRange => write!(f, "coordinates out of range"),
            IssueKind::DuplicateImage(first) => {
                write!(f, "image_path already used by entry {}", first)
            }
            IssueKind::MissingImage(path) => write!(f, "image {} not found", path.display()),
            IssueKind::UnexpectedImageName { expected } => {
                write!(f, "image name should be {}", expected)
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Check that every referenced image exists.
    pub check_images: bool,
    /// Base for relative image paths. Defaults to the working directory.
    pub image_base: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    pub entries: usize,
    pub located: usize,
    pub issues: Vec<Issue>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn verify_log_file(path: &Path, options: &VerifyOptions) -> Result<VerifyReport> {
    let raw = std::fs::read(path).with_context(|| format!("read event log {}", path.display()))?;
    let entries: Vec<serde_json::Value> = serde_json::from_slice(&raw)
        .map_err(|e| anyhow!("{} is not a JSON array: {}", path.display(), e))?;
    Ok(verify_entries(entries, options))
}

pub fn verify_entries(entries: Vec<serde_json::Value>, options: &VerifyOptions) -> VerifyReport {
    let mut report = VerifyReport {
        entries: entries.len(),
        ..VerifyReport::default()
    };
    let mut seen_images: HashMap<String, usize> = HashMap::new();
    let mut previous: Option<DateTime<Utc>> = None;

    for (index, value) in entries.into_iter().enumerate() {
        let record: EventRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                report.issues.push(Issue {
                    index,
                    kind: IssueKind::Malformed(e.to_string()),
                });
                continue;
            }
        };
        let mut push = |kind| report.issues.push(Issue { index, kind });

        match DateTime::parse_from_rfc3339(&record.datetime_utc) {
            Ok(ts) => {
                let ts = ts.with_timezone(&Utc);
                if previous.is_some_and(|prev| ts < prev) {
                    push(IssueKind::OutOfOrder);
                }
                previous = Some(ts);
            }
            Err(_) => push(IssueKind::InvalidTimestamp(record.datetime_utc.clone())),
        }

        match (record.latitude, record.longitude) {
            (Some(lat), Some(lon)) => {
                if crate::geo::validate_coordinates(lat, lon).is_err() {
                    push(IssueKind::CoordinatesOutOfRange);
                }
            }
            (None, None) => {}
            _ => push(IssueKind::PartialCoordinates),
        }

        if let Some(first) = seen_images.get(&record.image_path) {
            push(IssueKind::DuplicateImage(*first));
        } else {
            seen_images.insert(record.image_path.clone(), index);
        }

        let expected = image_file_name(index as u64);
        let image = Path::new(&record.image_path);
        if image.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
            push(IssueKind::UnexpectedImageName { expected });
        }

        if options.check_images {
            let resolved = match &options.image_base {
                Some(base) if image.is_relative() => base.join(image),
                _ => image.to_path_buf(),
            };
            if !resolved.is_file() {
                push(IssueKind::MissingImage(resolved));
            }
        }

        if record.coordinates().is_some() {
            report.located += 1;
        }
    }
    report
}
