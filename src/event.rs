use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::geo::GeoFix;
use crate::severity::SeverityLevel;

/// Everything needed to record a detection, before a sequence id is assigned.
#[derive(Clone, Debug)]
pub struct EventCandidate {
    pub image_reference: PathBuf,
    pub geo_fix: GeoFix,
    pub severity: SeverityLevel,
    pub timestamp_utc: DateTime<Utc>,
}

/// Immutable record of one recordable detection.
///
/// Only `EventRecordStore` creates events; `sequence_id` equals the event's
/// index in the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    sequence_id: u64,
    image_reference: PathBuf,
    geo_fix: GeoFix,
    severity: SeverityLevel,
    timestamp_utc: String,
}

impl Event {
    pub(crate) fn new(sequence_id: u64, candidate: EventCandidate) -> Self {
        Self {
            sequence_id,
            image_reference: candidate.image_reference,
            geo_fix: candidate.geo_fix,
            severity: candidate.severity,
            timestamp_utc: format_timestamp(candidate.timestamp_utc),
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn image_reference(&self) -> &Path {
        &self.image_reference
    }

    pub fn geo_fix(&self) -> &GeoFix {
        &self.geo_fix
    }

    pub fn severity(&self) -> SeverityLevel {
        self.severity
    }

    pub fn timestamp_utc(&self) -> &str {
        &self.timestamp_utc
    }

    /// On-disk form of this event.
    pub fn record(&self) -> EventRecord {
        EventRecord {
            image_path: self.image_reference.to_string_lossy().into_owned(),
            latitude: self.geo_fix.latitude(),
            longitude: self.geo_fix.longitude(),
            severity: self.severity,
            datetime_utc: self.timestamp_utc.clone(),
        }
    }
}

/// One entry of the JSON event log. Field order is the serialized key order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub image_path: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub severity: SeverityLevel,
    pub datetime_utc: String,
}

impl EventRecord {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// RFC 3339 UTC with microseconds, e.g. `2024-03-01T09:30:00.000000Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Deterministic image name for a sequence id.
pub fn image_file_name(sequence_id: u64) -> String {
    format!("pot{}.jpg", sequence_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::ProviderKind;
    use chrono::TimeZone;

    #[test]
    fn record_carries_absent_coordinates_as_null() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let event = Event::new(
            4,
            EventCandidate {
                image_reference: PathBuf::from("out/pot4.jpg"),
                geo_fix: GeoFix::absent(ProviderKind::SerialNmea),
                severity: SeverityLevel::Low,
                timestamp_utc: ts,
            },
        );
        assert_eq!(event.timestamp_utc(), "2024-03-01T09:30:00.000000Z");
        let json = serde_json::to_string(&event.record()).unwrap();
        assert_eq!(
            json,
            r#"{"image_path":"out/pot4.jpg","latitude":null,"longitude":null,"severity":"Low","datetime_utc":"2024-03-01T09:30:00.000000Z"}"#
        );
    }

    #[test]
    fn image_names_follow_sequence_id() {
        assert_eq!(image_file_name(0), "pot0.jpg");
        assert_eq!(image_file_name(17), "pot17.jpg");
    }
}
