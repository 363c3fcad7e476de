//! Ledger writer with WAL framing.
//!
//! Guarantees:
//! - O(1) append, each write fsync'd before returning
//! - crash-safe: a torn write leaves a detectable partial frame
//! - single writer per partition (exclusive `_LOCK` file lock)
//! - segments immutable after rollover
//!
//! `ledger_sequence` is `(segment_ordinal << 32) | record_index` with a
//! 1-based record index, strictly increasing within a partition across
//! rollovers and process restarts.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::errors::LedgerError;
use crate::ledger::{
    atomic_write_text, is_late_partition, list_segments, partition_base_date, segment_file_name,
    segment_ordinal, FRAME_HEADER_SIZE, MANIFEST_SCHEMA_VERSION, MAX_SEGMENT_RECORDS,
    MAX_SEGMENT_SIZE_BYTES,
};
use crate::models::SignalEvent;

/// Hours after partition end before a main partition may seal.
pub const SEAL_GRACE_PERIOD_HOURS: i64 = 6;
/// Days after the base date before a late partition may seal.
pub const LATE_SEAL_GRACE_DAYS: i64 = 3;

struct WriterState {
    current_segments: HashMap<PathBuf, PathBuf>,
    record_counts: HashMap<PathBuf, u64>,
}

pub struct LedgerWriter {
    base_path: PathBuf,
    max_segment_size_bytes: u64,
    max_segment_records: u64,
    state: Mutex<WriterState>,
}

impl LedgerWriter {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            max_segment_size_bytes: MAX_SEGMENT_SIZE_BYTES,
            max_segment_records: MAX_SEGMENT_RECORDS,
            state: Mutex::new(WriterState {
                current_segments: HashMap::new(),
                record_counts: HashMap::new(),
            }),
        })
    }

    /// Override rollover limits (tests exercise rollover with tiny caps).
    pub fn with_limits(mut self, max_segment_size_bytes: u64, max_segment_records: u64) -> Self {
        self.max_segment_size_bytes = max_segment_size_bytes;
        self.max_segment_records = max_segment_records;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Append a signal event. Returns the event annotated with
    /// `{ledger_partition, ledger_sequence, ledger_written_at}`.
    pub fn write(&self, event: SignalEvent) -> Result<SignalEvent, LedgerError> {
        // Partition by the UTC date of emission.
        let mut partition_name = event.emitted_at.format("%Y-%m-%d").to_string();
        let mut partition_dir = self.base_path.join(&partition_name);

        if Self::is_sealed(&partition_dir) {
            let late_name = format!("{}-late", partition_name);
            let late_dir = self.base_path.join(&late_name);
            if Self::is_sealed(&late_dir) {
                return Err(LedgerError::PartitionSealed(late_name));
            }
            warn!(signal_id = %event.signal_id, partition = %late_name, "late arrival");
            partition_name = late_name;
            partition_dir = late_dir;
        }
        std::fs::create_dir_all(&partition_dir)?;

        // Single-writer guarantee per partition.
        let lock_file = File::create(partition_dir.join("_LOCK"))?;
        lock_file.lock_exclusive().map_err(LedgerError::Io)?;
        let result = self.write_locked(&partition_dir, &partition_name, event);
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    fn write_locked(
        &self,
        partition_dir: &Path,
        partition_name: &str,
        event: SignalEvent,
    ) -> Result<SignalEvent, LedgerError> {
        let mut state = self.state.lock();
        let segment = self.current_segment(&mut state, partition_dir)?;

        let record_index = self.record_count(&mut state, &segment)? + 1;
        state.record_counts.insert(segment.clone(), record_index);

        let ordinal = segment_ordinal(
            &segment
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        )
        .ok_or_else(|| LedgerError::Write(format!("bad segment name {:?}", segment)))?;
        let ledger_sequence = (ordinal << 32) | record_index;

        let event = event.with_ledger_metadata(partition_name.to_string(), ledger_sequence);

        let payload = serde_json::to_vec(&event)
            .map_err(|e| LedgerError::Write(format!("serialize failed: {}", e)))?;
        self.append_framed(&segment, &payload)?;

        self.maybe_rollover(&mut state, partition_dir, &segment)?;

        debug!(
            signal_id = %event.signal_id,
            partition = %partition_name,
            sequence = ledger_sequence,
            "ledger write"
        );
        Ok(event)
    }

    /// Frame format: [u32 BE length][u32 BE crc32][payload]; fsync'd.
    fn append_framed(&self, segment: &Path, payload: &[u8]) -> Result<(), LedgerError> {
        let crc = crc32fast::hash(payload);
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.extend_from_slice(payload);

        let mut file = OpenOptions::new().create(true).append(true).open(segment)?;
        file.write_all(&frame)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn current_segment(
        &self,
        state: &mut WriterState,
        partition_dir: &Path,
    ) -> Result<PathBuf, LedgerError> {
        if let Some(segment) = state.current_segments.get(partition_dir).cloned() {
            if segment.exists() && self.segment_writable(state, &segment)? {
                return Ok(segment);
            }
        }

        let current_file = partition_dir.join("_CURRENT");
        if current_file.exists() {
            let name = std::fs::read_to_string(&current_file)?.trim().to_string();
            let segment = partition_dir.join(&name);
            if segment.exists() && self.segment_writable(state, &segment)? {
                state
                    .current_segments
                    .insert(partition_dir.to_path_buf(), segment.clone());
                return Ok(segment);
            }
        }

        let segments = list_segments(partition_dir);
        for segment in segments.iter().rev() {
            if self.segment_writable(state, segment)? {
                self.set_current(state, partition_dir, segment)?;
                return Ok(segment.clone());
            }
        }

        let next_ordinal = segments
            .last()
            .and_then(|s| {
                segment_ordinal(&s.file_name().map(|n| n.to_string_lossy().to_string())?)
            })
            .map(|n| n + 1)
            .unwrap_or(1);
        let new_segment = partition_dir.join(segment_file_name(next_ordinal));
        File::create(&new_segment)?;
        self.set_current(state, partition_dir, &new_segment)?;
        Ok(new_segment)
    }

    fn set_current(
        &self,
        state: &mut WriterState,
        partition_dir: &Path,
        segment: &Path,
    ) -> Result<(), LedgerError> {
        let name = segment
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        atomic_write_text(&partition_dir.join("_CURRENT"), &name)?;
        state
            .current_segments
            .insert(partition_dir.to_path_buf(), segment.to_path_buf());
        Ok(())
    }

    fn segment_writable(&self, state: &mut WriterState, segment: &Path) -> Result<bool, LedgerError> {
        let metadata = std::fs::metadata(segment)?;
        if metadata.permissions().readonly() {
            return Ok(false);
        }
        if metadata.len() >= self.max_segment_size_bytes {
            return Ok(false);
        }
        if self.record_count(state, segment)? >= self.max_segment_records {
            return Ok(false);
        }
        Ok(true)
    }

    fn maybe_rollover(
        &self,
        state: &mut WriterState,
        partition_dir: &Path,
        segment: &Path,
    ) -> Result<(), LedgerError> {
        let size = std::fs::metadata(segment)?.len();
        let count = self.record_count(state, segment)?;
        if size < self.max_segment_size_bytes && count < self.max_segment_records {
            return Ok(());
        }

        Self::make_readonly(segment);
        info!(
            segment = %segment.display(),
            records = count,
            bytes = size,
            "segment sealed"
        );

        let ordinal = segment_ordinal(
            &segment
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        )
        .unwrap_or(0);
        let next = partition_dir.join(segment_file_name(ordinal + 1));
        File::create(&next)?;
        self.set_current(state, partition_dir, &next)?;
        state.record_counts.remove(segment);

        info!(next = %next.display(), "segment rollover");
        Ok(())
    }

    /// Record count for a segment, recovered by scanning frames when not
    /// cached (survives process restarts).
    fn record_count(&self, state: &mut WriterState, segment: &Path) -> Result<u64, LedgerError> {
        if let Some(count) = state.record_counts.get(segment) {
            return Ok(*count);
        }
        let count = Self::scan_record_count(segment);
        state.record_counts.insert(segment.to_path_buf(), count);
        Ok(count)
    }

    fn scan_record_count(segment: &Path) -> u64 {
        let Ok(mut file) = File::open(segment) else {
            return 0;
        };
        let mut count = 0u64;
        let mut header = [0u8; FRAME_HEADER_SIZE];
        loop {
            match read_exact_or_eof(&mut file, &mut header) {
                Ok(n) if n < FRAME_HEADER_SIZE => break,
                Err(_) => break,
                Ok(_) => {}
            }
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let mut payload = vec![0u8; length];
            match read_exact_or_eof(&mut file, &mut payload) {
                Ok(n) if n < length => break,
                Err(_) => break,
                Ok(_) => count += 1,
            }
        }
        count
    }

    fn make_readonly(path: &Path) {
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut permissions = metadata.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(true);
            if let Err(err) = std::fs::set_permissions(path, permissions) {
                warn!(path = %path.display(), error = %err, "could not set segment readonly");
            }
        }
    }

    fn is_sealed(partition_dir: &Path) -> bool {
        partition_dir.join("_SEALED").exists()
    }

    /// Seal a partition: freeze segments, write the manifest, touch
    /// `_SEALED` with the seal timestamp.
    pub fn seal_partition(&self, partition_name: &str) -> Result<(), LedgerError> {
        let partition_dir = self.base_path.join(partition_name);
        if !partition_dir.exists() {
            return Err(LedgerError::PartitionNotFound(partition_name.to_string()));
        }
        if Self::is_sealed(&partition_dir) {
            return Ok(());
        }

        for segment in list_segments(&partition_dir) {
            Self::make_readonly(&segment);
        }

        let manifest = self.build_manifest(&partition_dir, partition_name)?;
        atomic_write_text(
            &partition_dir.join("_manifest.json"),
            &serde_json::to_string_pretty(&manifest)
                .map_err(|e| LedgerError::Write(e.to_string()))?,
        )?;
        atomic_write_text(&partition_dir.join("_SEALED"), &Utc::now().to_rfc3339())?;

        self.state.lock().current_segments.remove(&partition_dir);
        info!(partition = %partition_name, "partition sealed");
        Ok(())
    }

    fn build_manifest(
        &self,
        partition_dir: &Path,
        partition_name: &str,
    ) -> Result<serde_json::Value, LedgerError> {
        let mut segments = Vec::new();
        let mut total_records = 0u64;
        let mut highwater_sequence = 0u64;

        for segment in list_segments(partition_dir) {
            let count = Self::scan_record_count(&segment);
            let size = std::fs::metadata(&segment)?.len();
            let mut content = Vec::new();
            File::open(&segment)?.read_to_end(&mut content)?;
            let checksum = format!("crc32:{:08x}", crc32fast::hash(&content));
            let name = segment
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if let Some(ordinal) = segment_ordinal(&name) {
                if count > 0 {
                    highwater_sequence = highwater_sequence.max((ordinal << 32) | count);
                }
            }
            segments.push(serde_json::json!({
                "file": name,
                "record_count": count,
                "size_bytes": size,
                "checksum": checksum,
            }));
            total_records += count;
        }

        Ok(serde_json::json!({
            "schema_version": MANIFEST_SCHEMA_VERSION,
            "partition_date": partition_name,
            "sealed_at": Utc::now().to_rfc3339(),
            "total_records": total_records,
            "highwater_sequence": highwater_sequence,
            "manifest_revision": 1,
            "segments": segments,
            "is_late_partition": is_late_partition(partition_name),
        }))
    }

    /// Partitions whose grace period has elapsed and are ready to seal.
    pub fn partitions_to_seal(&self) -> Vec<String> {
        let now = Utc::now();
        let mut ready = Vec::new();

        let Ok(entries) = std::fs::read_dir(&self.base_path) else {
            return ready;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('_') || Self::is_sealed(&path) {
                continue;
            }
            let Ok(base_date) = NaiveDate::parse_from_str(partition_base_date(&name), "%Y-%m-%d")
            else {
                continue;
            };

            let Some(partition_start) = Utc
                .with_ymd_and_hms(base_date.year(), base_date.month(), base_date.day(), 0, 0, 0)
                .single()
            else {
                continue;
            };
            let seal_after = if is_late_partition(&name) {
                partition_start + Duration::days(LATE_SEAL_GRACE_DAYS)
            } else {
                partition_start + Duration::days(1) + Duration::hours(SEAL_GRACE_PERIOD_HOURS)
            };

            if now >= seal_after {
                ready.push(name);
            }
        }
        ready.sort();
        ready
    }

    /// Graceful-shutdown hook. This writer keeps no file handles open
    /// between calls (every write is fsync'd and closed), so this only
    /// drops cached segment state.
    pub fn flush_and_close(&self) {
        let mut state = self.state.lock();
        state.current_segments.clear();
        state.record_counts.clear();
        info!("ledger writer flushed and closed");
    }
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::reader::LedgerReader;
    use crate::models::*;
    use std::collections::HashMap as StdHashMap;

    fn sample_event(signal_id: &str) -> SignalEvent {
        let signal = OmenSignal {
            signal_id: signal_id.to_string(),
            source_event_id: "evt-1".to_string(),
            trace_id: "0123456789abcdef".to_string(),
            title: "Test signal".to_string(),
            description: String::new(),
            probability: 0.5,
            probability_source: "polymarket".to_string(),
            confidence_score: 0.8,
            confidence_interval: ConfidenceInterval {
                point_estimate: 0.8,
                lower_bound: 0.7,
                upper_bound: 0.9,
                confidence_level: 0.95,
                method: "weighted_bayesian".to_string(),
            },
            confidence_level: ConfidenceLevel::High,
            category: SignalCategory::Geopolitical,
            signal_type: SignalType::GeopoliticalConflict,
            status: SignalStatus::Active,
            geographic: GeographicScope::default(),
            temporal: TemporalScope::default(),
            impact_hints: ImpactHints {
                domains: vec![],
                direction: ImpactDirection::Negative,
                affected_asset_types: vec![],
                keywords: vec![],
            },
            evidence: vec![],
            ruleset_version: "v1".to_string(),
            generated_at: Utc::now(),
            input_event_hash: "deadbeef".to_string(),
        };
        SignalEvent::from_omen_signal(signal, "deadbeef".to_string(), Utc::now())
    }

    #[test]
    fn write_assigns_partition_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();

        let written = writer.write(sample_event("OMEN-1")).unwrap();
        let partition = written.ledger_partition.clone().unwrap();
        assert_eq!(partition, Utc::now().format("%Y-%m-%d").to_string());
        assert_eq!(written.ledger_sequence, Some((1 << 32) | 1));
        assert!(written.ledger_written_at.is_some());

        let written = writer.write(sample_event("OMEN-2")).unwrap();
        assert_eq!(written.ledger_sequence, Some((1 << 32) | 2));
    }

    #[test]
    fn rollover_keeps_sequences_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap().with_limits(
            MAX_SEGMENT_SIZE_BYTES,
            3, // roll after 3 records
        );

        let mut sequences = Vec::new();
        for i in 0..7 {
            let written = writer.write(sample_event(&format!("OMEN-{}", i))).unwrap();
            sequences.push(written.ledger_sequence.unwrap());
        }
        for pair in sequences.windows(2) {
            assert!(pair[0] < pair[1], "sequences must strictly increase");
        }

        let partition = Utc::now().format("%Y-%m-%d").to_string();
        let segments = list_segments(&dir.path().join(&partition));
        assert!(segments.len() >= 3, "7 records over 3-record segments");

        // Restart: a fresh writer recovers counts by scanning.
        let writer2 = LedgerWriter::new(dir.path()).unwrap().with_limits(
            MAX_SEGMENT_SIZE_BYTES,
            3,
        );
        for i in 7..10 {
            let written = writer2
                .write(sample_event(&format!("OMEN-{}", i)))
                .unwrap();
            sequences.push(written.ledger_sequence.unwrap());
        }
        for pair in sequences.windows(2) {
            assert!(pair[0] < pair[1], "monotonic across restart");
        }
        assert_eq!(sequences.len(), 10);
    }

    #[test]
    fn seal_writes_manifest_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        writer.write(sample_event("OMEN-1")).unwrap();
        writer.write(sample_event("OMEN-2")).unwrap();

        let partition = Utc::now().format("%Y-%m-%d").to_string();
        writer.seal_partition(&partition).unwrap();

        let partition_dir = dir.path().join(&partition);
        assert!(partition_dir.join("_SEALED").exists());
        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(partition_dir.join("_manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["schema_version"], "1.0.0");
        assert_eq!(manifest["total_records"], 2);
        assert_eq!(manifest["highwater_sequence"], (1u64 << 32) | 2);
        assert_eq!(manifest["is_late_partition"], false);
        let checksum = manifest["segments"][0]["checksum"].as_str().unwrap();
        assert!(checksum.starts_with("crc32:"));

        // Sealing twice is a no-op.
        writer.seal_partition(&partition).unwrap();
    }

    #[test]
    fn late_arrival_lands_in_late_partition() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        writer.write(sample_event("OMEN-1")).unwrap();

        let partition = Utc::now().format("%Y-%m-%d").to_string();
        writer.seal_partition(&partition).unwrap();

        // Same emitted_at date, sealed main partition: goes to -late.
        let written = writer.write(sample_event("OMEN-LATE")).unwrap();
        assert_eq!(
            written.ledger_partition.as_deref(),
            Some(format!("{}-late", partition).as_str())
        );

        // The sealed partition itself holds only the original record.
        let reader = LedgerReader::new(dir.path());
        let main_only: Vec<_> = reader.read_partition(&partition, true, false).unwrap();
        assert_eq!(main_only.len(), 1);
        let with_late: Vec<_> = reader.read_partition(&partition, true, true).unwrap();
        assert_eq!(with_late.len(), 2);
    }

    #[test]
    fn sealed_late_partition_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        writer.write(sample_event("OMEN-1")).unwrap();
        let partition = Utc::now().format("%Y-%m-%d").to_string();
        writer.seal_partition(&partition).unwrap();
        writer.write(sample_event("OMEN-2")).unwrap();
        writer
            .seal_partition(&format!("{}-late", partition))
            .unwrap();

        let result = writer.write(sample_event("OMEN-3"));
        assert!(matches!(result, Err(LedgerError::PartitionSealed(_))));
    }

    #[test]
    fn seal_unknown_partition_errors() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        assert!(matches!(
            writer.seal_partition("2020-01-01"),
            Err(LedgerError::PartitionNotFound(_))
        ));
    }

    #[test]
    fn payload_is_canonical_frame() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        writer.write(sample_event("OMEN-1")).unwrap();

        let partition = Utc::now().format("%Y-%m-%d").to_string();
        let segment = dir.path().join(&partition).join("signals-001.wal");
        let bytes = std::fs::read(segment).unwrap();

        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let crc = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = &bytes[8..8 + length];
        assert_eq!(crc32fast::hash(payload), crc);

        let decoded: StdHashMap<String, serde_json::Value> =
            serde_json::from_slice(payload).unwrap();
        assert_eq!(decoded["signal_id"], "OMEN-1");
    }
}
