//! Ledger reader with crash recovery.
//!
//! The frame read loop tolerates a torn tail: a partial header or payload
//! at end-of-file truncates silently (logged once per segment), a CRC
//! mismatch or JSON error skips the record. A reader therefore yields
//! exactly the fully framed, checksummed records and never aborts a
//! partition.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, warn};

use crate::errors::LedgerError;
use crate::ledger::{is_late_partition, list_segments, FRAME_HEADER_SIZE};
use crate::models::SignalEvent;

#[derive(Debug, Clone, serde::Serialize)]
pub struct PartitionInfo {
    pub partition_date: String,
    pub is_sealed: bool,
    pub is_late: bool,
    pub total_records: u64,
    pub segments: Vec<String>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub highwater_sequence: u64,
    pub manifest_revision: u64,
}

pub struct LedgerReader {
    base_path: PathBuf,
}

impl LedgerReader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn list_partitions(&self) -> Vec<PartitionInfo> {
        let mut partitions = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.base_path) else {
            return partitions;
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && !p
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with('_'))
                        .unwrap_or(true)
            })
            .collect();
        dirs.sort();
        for dir in dirs {
            if let Some(info) = self.partition_info(&dir) {
                partitions.push(info);
            }
        }
        partitions
    }

    fn partition_info(&self, partition_dir: &Path) -> Option<PartitionInfo> {
        let name = partition_dir.file_name()?.to_string_lossy().to_string();
        let is_sealed = partition_dir.join("_SEALED").exists();
        let manifest_file = partition_dir.join("_manifest.json");

        if manifest_file.exists() {
            if let Ok(manifest) = std::fs::read_to_string(&manifest_file)
                .map_err(|_| ())
                .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|_| ()))
            {
                return Some(PartitionInfo {
                    partition_date: name.clone(),
                    is_sealed,
                    is_late: manifest["is_late_partition"]
                        .as_bool()
                        .unwrap_or_else(|| is_late_partition(&name)),
                    total_records: manifest["total_records"].as_u64().unwrap_or(0),
                    segments: manifest["segments"]
                        .as_array()
                        .map(|segments| {
                            segments
                                .iter()
                                .filter_map(|s| s["file"].as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default(),
                    sealed_at: manifest["sealed_at"]
                        .as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc)),
                    highwater_sequence: manifest["highwater_sequence"].as_u64().unwrap_or(0),
                    manifest_revision: manifest["manifest_revision"].as_u64().unwrap_or(0),
                });
            }
        }

        let segments = list_segments(partition_dir);
        let total_records: u64 = segments.iter().map(|s| count_records(s)).sum();
        Some(PartitionInfo {
            partition_date: name.clone(),
            is_sealed,
            is_late: is_late_partition(&name),
            total_records,
            segments: segments
                .iter()
                .filter_map(|s| s.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect(),
            sealed_at: None,
            highwater_sequence: 0,
            manifest_revision: 0,
        })
    }

    pub fn is_partition_sealed(&self, partition_date: &str) -> bool {
        self.base_path
            .join(partition_date)
            .join("_SEALED")
            .exists()
    }

    /// Read all signals from a partition (and its late sibling when
    /// `include_late`).
    pub fn read_partition(
        &self,
        partition_date: &str,
        validate: bool,
        include_late: bool,
    ) -> Result<Vec<SignalEvent>, LedgerError> {
        let mut events = Vec::new();
        let partition_dir = self.base_path.join(partition_date);
        if partition_dir.exists() {
            for segment in list_segments(&partition_dir) {
                events.extend(read_segment(&segment, validate)?);
            }
        }
        if include_late && !is_late_partition(partition_date) {
            let late_dir = self.base_path.join(format!("{}-late", partition_date));
            if late_dir.exists() {
                for segment in list_segments(&late_dir) {
                    events.extend(read_segment(&segment, validate)?);
                }
            }
        }
        Ok(events)
    }

    pub fn get_signal(
        &self,
        partition_date: &str,
        signal_id: &str,
    ) -> Result<Option<SignalEvent>, LedgerError> {
        Ok(self
            .read_partition(partition_date, true, true)?
            .into_iter()
            .find(|event| event.signal_id == signal_id))
    }

    /// (highwater_sequence, manifest_revision) for a partition, falling
    /// back to a scan when no manifest exists.
    pub fn get_partition_highwater(&self, partition_date: &str) -> (u64, u64) {
        let partition_dir = self.base_path.join(partition_date);
        if !partition_dir.exists() {
            return (0, 0);
        }
        let manifest_file = partition_dir.join("_manifest.json");
        if manifest_file.exists() {
            if let Ok(manifest) = std::fs::read_to_string(&manifest_file)
                .map_err(|_| ())
                .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).map_err(|_| ()))
            {
                return (
                    manifest["highwater_sequence"].as_u64().unwrap_or(0),
                    manifest["manifest_revision"].as_u64().unwrap_or(0),
                );
            }
        }
        let highwater = self
            .read_partition(partition_date, false, false)
            .map(|events| {
                events
                    .iter()
                    .filter_map(|e| e.ledger_sequence)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        (highwater, 0)
    }

    /// Scan the partitions covering [start, end] and filter on emitted_at.
    pub fn query_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        validate: bool,
    ) -> Result<Vec<SignalEvent>, LedgerError> {
        let mut results = Vec::new();
        let mut current = start.date_naive();
        let end_date = end.date_naive();
        while current <= end_date {
            let partition = current.format("%Y-%m-%d").to_string();
            for event in self.read_partition(&partition, validate, true)? {
                if event.emitted_at >= start && event.emitted_at <= end {
                    results.push(event);
                }
            }
            let Some(next) = current.succ_opt() else {
                break;
            };
            current = next;
        }
        Ok(results)
    }

    /// Full scan across partitions for a set of trace ids.
    pub fn query_by_trace_ids(
        &self,
        trace_ids: &[String],
        validate: bool,
    ) -> Result<Vec<SignalEvent>, LedgerError> {
        let trace_set: std::collections::HashSet<&str> =
            trace_ids.iter().map(|s| s.as_str()).collect();
        let mut results = Vec::new();
        for info in self.list_partitions() {
            for event in self.read_partition(&info.partition_date, validate, false)? {
                if trace_set.contains(event.signal.trace_id.as_str()) {
                    results.push(event);
                }
            }
        }
        Ok(results)
    }

    /// Signals of one category across a date range.
    pub fn query_by_category(
        &self,
        category: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        validate: bool,
    ) -> Result<Vec<SignalEvent>, LedgerError> {
        let mut results = Vec::new();
        let mut current = start_date;
        while current <= end_date {
            let partition = current.format("%Y-%m-%d").to_string();
            for event in self.read_partition(&partition, validate, true)? {
                if event.signal.category.as_str().eq_ignore_ascii_case(category) {
                    results.push(event);
                }
            }
            let Some(next) = current.succ_opt() else {
                break;
            };
            current = next;
        }
        Ok(results)
    }

    /// Most recent signals across all partitions, newest first.
    pub fn recent_signals(&self, limit: usize) -> Vec<SignalEvent> {
        let mut events: Vec<SignalEvent> = Vec::new();
        let mut partitions = self.list_partitions();
        partitions.reverse();
        for info in partitions {
            if events.len() >= limit {
                break;
            }
            if let Ok(batch) = self.read_partition(&info.partition_date, false, false) {
                events.extend(batch);
            }
        }
        events.sort_by(|a, b| b.emitted_at.cmp(&a.emitted_at));
        events.truncate(limit);
        events
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Read all valid records from one segment with crash recovery.
fn read_segment(segment: &Path, validate: bool) -> Result<Vec<SignalEvent>, LedgerError> {
    let mut file = File::open(segment)?;
    let mut events = Vec::new();
    let mut record_num = 0u64;
    let segment_name = segment
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let n = read_up_to(&mut file, &mut header)?;
        if n == 0 {
            break;
        }
        if n < FRAME_HEADER_SIZE {
            warn!(
                segment = %segment_name,
                record = record_num,
                "partial header at end of segment, truncating"
            );
            break;
        }

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        let mut payload = vec![0u8; length];
        let n = read_up_to(&mut file, &mut payload)?;
        if n < length {
            warn!(
                segment = %segment_name,
                record = record_num,
                "partial payload at end of segment, truncating"
            );
            break;
        }
        record_num += 1;

        if validate {
            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                error!(
                    segment = %segment_name,
                    record = record_num,
                    expected = format!("{:08x}", expected_crc),
                    actual = format!("{:08x}", actual_crc),
                    "CRC mismatch, skipping record"
                );
                continue;
            }
        }

        match serde_json::from_slice::<SignalEvent>(&payload) {
            Ok(event) => events.push(event),
            Err(err) => {
                error!(
                    segment = %segment_name,
                    record = record_num,
                    error = %err,
                    "invalid JSON record, skipping"
                );
            }
        }
    }
    Ok(events)
}

fn count_records(segment: &Path) -> u64 {
    let Ok(mut file) = File::open(segment) else {
        return 0;
    };
    let mut count = 0u64;
    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match read_up_to(&mut file, &mut header) {
            Ok(n) if n < FRAME_HEADER_SIZE => break,
            Err(_) => break,
            Ok(_) => {}
        }
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut payload = vec![0u8; length];
        match read_up_to(&mut file, &mut payload) {
            Ok(n) if n < length => break,
            Err(_) => break,
            Ok(_) => count += 1,
        }
    }
    count
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
