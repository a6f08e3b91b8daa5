//! Event record store and its persistence ports.
//!
//! `EventRecordStore` owns the ordered in-memory sequence of events and
//! flushes it through an injected `EventLogStorage` after every append. The
//! in-memory sequence is authoritative: a failed flush is reported but the
//! append stands, and the next successful flush brings the file up to date.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::event::{Event, EventCandidate, EventRecord};

const INDENT: &[u8] = b"    ";

/// Persistence port for the event log.
pub trait EventLogStorage {
    /// Persist the full ordered sequence. `flushed` is how many leading events
    /// the last successful call already persisted.
    fn persist(&mut self, events: &[Event], flushed: usize) -> Result<()>;
}

/// Returned when an event was appended in memory but the log flush failed.
#[derive(Debug)]
pub struct FlushError {
    pub sequence_id: u64,
    pub source: anyhow::Error,
}

impl std::fmt::Display for FlushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event {} kept in memory; log flush failed: {:#}",
            self.sequence_id, self.source
        )
    }
}

impl std::error::Error for FlushError {}

pub struct EventRecordStore<S: EventLogStorage> {
    events: Vec<Event>,
    storage: S,
    flushed: usize,
}

impl<S: EventLogStorage> EventRecordStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            events: Vec::new(),
            storage,
            flushed: 0,
        }
    }

    /// Id the next successful append will receive.
    pub fn next_sequence_id(&self) -> u64 {
        self.events.len() as u64
    }

    /// Appends an event and flushes the whole log.
    ///
    /// On flush failure the event stays in memory and `FlushError` carries its id.
    pub fn append(&mut self, candidate: EventCandidate) -> Result<u64, FlushError> {
        let sequence_id = self.next_sequence_id();
        self.events.push(Event::new(sequence_id, candidate));
        match self.flush() {
            Ok(()) => Ok(sequence_id),
            Err(source) => Err(FlushError {
                sequence_id,
                source,
            }),
        }
    }

    /// Writes the current sequence. Re-flushing an unchanged sequence
    /// produces the same bytes.
    pub fn flush(&mut self) -> Result<()> {
        self.storage.persist(&self.events, self.flushed)?;
        self.flushed = self.events.len();
        Ok(())
    }

    /// Events not yet confirmed on disk.
    pub fn pending(&self) -> usize {
        self.events.len() - self.flushed
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

// ----------------------------------------------------------------------------
// JSON file storage
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// Serialize the whole sequence and atomically replace the file.
    #[default]
    FullRewrite,
    /// Patch the closing bracket and write only new events.
    AppendInPlace,
}

/// Event log kept as one pretty-printed JSON array (4-space indent).
///
/// Both modes leave byte-identical files. `AppendInPlace` falls back to a
/// full rewrite whenever the file is not exactly what it last wrote.
pub struct JsonFileLogStorage {
    path: PathBuf,
    mode: LogMode,
    written_len: Option<u64>,
}

impl JsonFileLogStorage {
    pub fn new(path: impl Into<PathBuf>, mode: LogMode) -> Self {
        Self {
            path: path.into(),
            mode,
            written_len: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rewrite(&mut self, events: &[Event]) -> Result<()> {
        let bytes = render_log(events)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file =
                File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(&bytes)
                .with_context(|| format!("write {}", tmp.display()))?;
            file.sync_all()
                .with_context(|| format!("sync {}", tmp.display()))?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        self.written_len = Some(bytes.len() as u64);
        Ok(())
    }

    fn append_tail(&mut self, events: &[Event], flushed: usize) -> Result<bool> {
        let Some(expected_len) = self.written_len else {
            return Ok(false);
        };
        if flushed == 0 || flushed > events.len() {
            return Ok(false);
        }
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(_) => return Ok(false),
        };
        let len = file.metadata()?.len();
        if len != expected_len || len < 2 {
            return Ok(false);
        }
        let mut closing = [0u8; 2];
        file.seek(SeekFrom::Start(len - 2))?;
        file.read_exact(&mut closing)?;
        if &closing != b"\n]" {
            return Ok(false);
        }

        let mut tail = Vec::new();
        for event in &events[flushed..] {
            tail.extend_from_slice(b",\n");
            tail.extend_from_slice(&render_entry(&event.record())?);
        }
        tail.extend_from_slice(b"\n]");

        file.set_len(len - 2)?;
        file.seek(SeekFrom::Start(len - 2))?;
        file.write_all(&tail)?;
        file.sync_data()?;
        self.written_len = Some(len - 2 + tail.len() as u64);
        Ok(true)
    }
}

impl EventLogStorage for JsonFileLogStorage {
    fn persist(&mut self, events: &[Event], flushed: usize) -> Result<()> {
        if self.mode == LogMode::AppendInPlace && flushed < events.len() {
            match self.append_tail(events, flushed) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    log::warn!(
                        "in-place append to {} failed ({:#}); rewriting",
                        self.path.display(),
                        e
                    );
                }
            }
        }
        self.rewrite(events)
    }
}

/// Keeps the last persisted log in memory. Can be told to fail.
#[derive(Debug, Default)]
pub struct InMemoryLogStorage {
    pub bytes: Vec<u8>,
    pub writes: usize,
    pub fail_next: usize,
}

impl EventLogStorage for InMemoryLogStorage {
    fn persist(&mut self, events: &[Event], _flushed: usize) -> Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(anyhow!("simulated storage failure"));
        }
        self.bytes = render_log(events)?;
        self.writes += 1;
        Ok(())
    }
}

/// Serialize events as the on-disk JSON array.
pub fn render_log(events: &[Event]) -> Result<Vec<u8>> {
    let records: Vec<EventRecord> = events.iter().map(Event::record).collect();
    to_pretty_json(&records)
}

/// Reads an event log written by `JsonFileLogStorage`.
pub fn read_log(path: &Path) -> Result<Vec<EventRecord>> {
    let raw = std::fs::read(path).with_context(|| format!("read event log {}", path.display()))?;
    serde_json::from_slice(&raw).map_err(|e| anyhow!("invalid event log {}: {}", path.display(), e))
}

fn render_entry(record: &EventRecord) -> Result<Vec<u8>> {
    let body = to_pretty_json(record)?;
    let mut out = Vec::with_capacity(body.len() + 64);
    for (i, line) in body.split(|b| *b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        out.extend_from_slice(INDENT);
        out.extend_from_slice(line);
    }
    Ok(out)
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoFix, ProviderKind};
    use crate::severity::SeverityLevel;
    use chrono::{TimeZone, Utc};

    fn candidate(i: u32) -> EventCandidate {
        EventCandidate {
            image_reference: PathBuf::from(format!("out/pot{}.jpg", i)),
            geo_fix: if i % 2 == 0 {
                GeoFix::at(ProviderKind::Static, 19.0760, 72.8777)
            } else {
                GeoFix::absent(ProviderKind::HttpIp)
            },
            severity: SeverityLevel::Medium,
            timestamp_utc: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, i).unwrap(),
        }
    }

    #[test]
    fn sequence_ids_are_dense_and_flushed_every_append() {
        let mut store = EventRecordStore::new(InMemoryLogStorage::default());
        for n in 1..=5u32 {
            let id = store.append(candidate(n - 1)).unwrap();
            assert_eq!(id, (n - 1) as u64);
            let on_disk: Vec<EventRecord> = serde_json::from_slice(&store.storage().bytes).unwrap();
            assert_eq!(on_disk.len(), n as usize);
            assert_eq!(on_disk.last().unwrap().image_path, format!("out/pot{}.jpg", n - 1));
        }
        assert_eq!(store.storage().writes, 5);
        for (i, ev) in store.events().iter().enumerate() {
            assert_eq!(ev.sequence_id(), i as u64);
        }
    }

    #[test]
    fn flush_failure_keeps_event_and_reconciles_later() {
        let mut store = EventRecordStore::new(InMemoryLogStorage::default());
        store.append(candidate(0)).unwrap();
        store.storage.fail_next = 1;

        let err = store.append(candidate(1)).unwrap_err();
        assert_eq!(err.sequence_id, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.pending(), 1);

        assert_eq!(store.append(candidate(2)).unwrap(), 2);
        assert_eq!(store.pending(), 0);
        let on_disk: Vec<EventRecord> = serde_json::from_slice(&store.storage().bytes).unwrap();
        assert_eq!(on_disk.len(), 3);
    }

    #[test]
    fn reflush_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut store = EventRecordStore::new(JsonFileLogStorage::new(&path, LogMode::FullRewrite));
        store.append(candidate(0)).unwrap();
        store.append(candidate(1)).unwrap();
        let first = std::fs::read(&path).unwrap();
        store.flush().unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_log_renders_as_empty_array() {
        assert_eq!(render_log(&[]).unwrap(), b"[]");
    }

    #[test]
    fn log_uses_four_space_indent_and_fixed_key_order() {
        let mut store = EventRecordStore::new(InMemoryLogStorage::default());
        store.append(candidate(0)).unwrap();
        let text = String::from_utf8(store.storage().bytes.clone()).unwrap();
        let expected = "[\n    {\n        \"image_path\": \"out/pot0.jpg\",\n        \"latitude\": 19.076,\n        \"longitude\": 72.8777,\n        \"severity\": \"Medium\",\n        \"datetime_utc\": \"2024-03-01T09:30:00.000000Z\"\n    }\n]";
        assert_eq!(text, expected);
    }

    #[test]
    fn append_in_place_matches_full_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let full_path = dir.path().join("full.json");
        let inplace_path = dir.path().join("inplace.json");
        let mut full = EventRecordStore::new(JsonFileLogStorage::new(&full_path, LogMode::FullRewrite));
        let mut inplace =
            EventRecordStore::new(JsonFileLogStorage::new(&inplace_path, LogMode::AppendInPlace));
        for i in 0..6 {
            full.append(candidate(i)).unwrap();
            inplace.append(candidate(i)).unwrap();
            assert_eq!(
                std::fs::read(&full_path).unwrap(),
                std::fs::read(&inplace_path).unwrap()
            );
        }
        assert_eq!(read_log(&inplace_path).unwrap().len(), 6);
    }

    #[test]
    fn append_in_place_recovers_from_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        let mut store = EventRecordStore::new(JsonFileLogStorage::new(&path, LogMode::AppendInPlace));
        store.append(candidate(0)).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        store.append(candidate(1)).unwrap();
        let records = read_log(&path).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn unwritable_path_reports_flush_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("log.json");
        let mut store = EventRecordStore::new(JsonFileLogStorage::new(&path, LogMode::FullRewrite));
        let err = store.append(candidate(0)).unwrap_err();
        assert_eq!(err.sequence_id, 0);
        assert_eq!(store.len(), 1);
        assert!(err.to_string().contains("event 0 kept in memory"));
    }
}
