//! Ledger crash-recovery and rollover scenarios, end to end against real
//! files in a temp directory.

use chrono::Utc;
use omen_engine::models::*;
use omen_engine::{LedgerReader, LedgerWriter};

fn sample_event(signal_id: &str) -> SignalEvent {
    let signal = OmenSignal {
        signal_id: signal_id.to_string(),
        source_event_id: format!("evt-{}", signal_id),
        trace_id: "0123456789abcdef".to_string(),
        title: "Red Sea shipping disruption".to_string(),
        description: "integration fixture".to_string(),
        probability: 0.7,
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
            domains: vec![AffectedDomain::Shipping],
            direction: ImpactDirection::Negative,
            affected_asset_types: vec![],
            keywords: vec![],
        },
        evidence: vec![],
        ruleset_version: "v1".to_string(),
        generated_at: Utc::now(),
        input_event_hash: format!("hash-{}", signal_id),
    };
    SignalEvent::from_omen_signal(signal, format!("hash-{}", signal_id), Utc::now())
}

fn frame_boundary(bytes: &[u8], frames: usize) -> usize {
    let mut offset = 0usize;
    for _ in 0..frames {
        let length = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 8 + length;
    }
    offset
}

/// S3: write 3 events, truncate the last segment to 2 complete frames
/// plus a torn tail, read back exactly 2 signals.
#[test]
fn crash_recovery_truncates_to_complete_frames() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LedgerWriter::new(dir.path()).unwrap();

    writer.write(sample_event("OMEN-CRASH0")).unwrap();
    writer.write(sample_event("OMEN-CRASH1")).unwrap();
    writer.write(sample_event("OMEN-CRASH2")).unwrap();

    let partition = Utc::now().format("%Y-%m-%d").to_string();
    let segment = dir.path().join(&partition).join("signals-001.wal");
    let bytes = std::fs::read(&segment).unwrap();
    let keep = frame_boundary(&bytes, 2);
    // Simulated crash mid-frame: two complete frames plus a torn header.
    std::fs::write(&segment, &bytes[..keep + 3]).unwrap();

    let reader = LedgerReader::new(dir.path());
    let events = reader.read_partition(&partition, true, true).unwrap();
    let ids: Vec<&str> = events.iter().map(|e| e.signal_id.as_str()).collect();
    assert_eq!(ids, vec!["OMEN-CRASH0", "OMEN-CRASH1"]);
}

/// S4: with a 3-record segment cap, write 7 events, restart the writer,
/// write 3 more; all 10 sequences strictly increase.
#[test]
fn rollover_and_restart_keep_sequences_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let max_size = 10 * 1024 * 1024;

    let mut sequences = Vec::new();
    {
        let writer = LedgerWriter::new(dir.path()).unwrap().with_limits(max_size, 3);
        for i in 0..7 {
            let written = writer.write(sample_event(&format!("OMEN-ROLL{}", i))).unwrap();
            sequences.push(written.ledger_sequence.unwrap());
        }
        writer.flush_and_close();
    }
    {
        let writer = LedgerWriter::new(dir.path()).unwrap().with_limits(max_size, 3);
        for i in 7..10 {
            let written = writer.write(sample_event(&format!("OMEN-ROLL{}", i))).unwrap();
            sequences.push(written.ledger_sequence.unwrap());
        }
    }

    assert_eq!(sequences.len(), 10);
    for pair in sequences.windows(2) {
        assert!(
            pair[0] < pair[1],
            "sequence went backwards: {} then {}",
            pair[0],
            pair[1]
        );
    }

    // On-disk order matches sequence order.
    let reader = LedgerReader::new(dir.path());
    let partition = Utc::now().format("%Y-%m-%d").to_string();
    let events = reader.read_partition(&partition, true, true).unwrap();
    assert_eq!(events.len(), 10);
    let read_sequences: Vec<u64> = events.iter().filter_map(|e| e.ledger_sequence).collect();
    assert_eq!(read_sequences, sequences);
}

/// Invariant 9: sealing partition D sends later same-day writes to D-late
/// without mutating D.
#[test]
fn late_arrivals_never_mutate_sealed_partition() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LedgerWriter::new(dir.path()).unwrap();
    writer.write(sample_event("OMEN-MAIN")).unwrap();

    let partition = Utc::now().format("%Y-%m-%d").to_string();
    writer.seal_partition(&partition).unwrap();
    let sealed_bytes =
        std::fs::read(dir.path().join(&partition).join("signals-001.wal")).unwrap();

    let written = writer.write(sample_event("OMEN-TARDY")).unwrap();
    assert_eq!(
        written.ledger_partition.as_deref(),
        Some(format!("{}-late", partition).as_str())
    );

    // The sealed segment is byte-identical after the late write.
    let after = std::fs::read(dir.path().join(&partition).join("signals-001.wal")).unwrap();
    assert_eq!(sealed_bytes, after);

    let reader = LedgerReader::new(dir.path());
    assert!(reader.is_partition_sealed(&partition));
    let main_only = reader.read_partition(&partition, true, false).unwrap();
    assert_eq!(main_only.len(), 1);
    let with_late = reader.read_partition(&partition, true, true).unwrap();
    assert_eq!(with_late.len(), 2);

    // The late partition shows up in the listing as late.
    let partitions = reader.list_partitions();
    assert!(partitions
        .iter()
        .any(|p| p.partition_date.ends_with("-late") && p.is_late));
}

/// Manifest contents are exact: schema version, counts, highwater,
/// per-segment crc32 checksums.
#[test]
fn sealed_manifest_reports_counts_and_checksums() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LedgerWriter::new(dir.path()).unwrap().with_limits(10 * 1024 * 1024, 2);
    for i in 0..5 {
        writer.write(sample_event(&format!("OMEN-M{}", i))).unwrap();
    }

    let partition = Utc::now().format("%Y-%m-%d").to_string();
    writer.seal_partition(&partition).unwrap();

    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(&partition).join("_manifest.json")).unwrap(),
    )
    .unwrap();

    assert_eq!(manifest["schema_version"], "1.0.0");
    assert_eq!(manifest["partition_date"], partition);
    assert_eq!(manifest["total_records"], 5);
    assert_eq!(manifest["manifest_revision"], 1);
    assert_eq!(manifest["is_late_partition"], false);

    // 5 records over 2-record segments: 3 segments, highwater in the 3rd.
    let segments = manifest["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 3);
    assert_eq!(manifest["highwater_sequence"], (3u64 << 32) | 1);
    for segment in segments {
        let checksum = segment["checksum"].as_str().unwrap();
        assert!(checksum.starts_with("crc32:"));
        assert_eq!(checksum.len(), "crc32:".len() + 8);
    }

    let reader = LedgerReader::new(dir.path());
    let (highwater, revision) = reader.get_partition_highwater(&partition);
    assert_eq!(highwater, (3u64 << 32) | 1);
    assert_eq!(revision, 1);

    // _SEALED carries the seal timestamp.
    let sealed_at =
        std::fs::read_to_string(dir.path().join(&partition).join("_SEALED")).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(sealed_at.trim()).is_ok());
}
