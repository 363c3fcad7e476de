//! Ledger lifecycle management.
//!
//! Scheduled pass over the ledger directory, strictly ordered:
//! seal -> compress -> archive -> delete. Errors on one partition are
//! reported and do not abort the run.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{error, info, warn};

use crate::config::RetentionConfig;
use crate::errors::LedgerError;
use crate::ledger::writer::LedgerWriter;
use crate::ledger::{is_late_partition, partition_base_date};

/// Per-run summary of affected partitions.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LifecycleRunReport {
    pub sealed: Vec<String>,
    pub compressed: Vec<String>,
    pub archived: Vec<String>,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageStats {
    pub hot_partitions: u32,
    pub hot_size_bytes: u64,
    pub warm_partitions: u32,
    pub warm_size_bytes: u64,
    pub cold_partitions: u32,
    pub cold_size_bytes: u64,
    pub total_records: u64,
    pub oldest_partition: Option<String>,
    pub newest_partition: Option<String>,
}

#[derive(Debug, Clone)]
struct PartitionEntry {
    name: String,
    path: PathBuf,
    is_sealed: bool,
    is_late: bool,
    total_size_bytes: u64,
    record_count: u64,
}

pub struct LedgerLifecycleManager {
    base_path: PathBuf,
    archive_path: PathBuf,
    config: RetentionConfig,
}

impl LedgerLifecycleManager {
    pub fn new(base_path: impl Into<PathBuf>, config: RetentionConfig) -> Self {
        let base_path = base_path.into();
        let archive_path = base_path.join("_archive");
        Self {
            base_path,
            archive_path,
            config,
        }
    }

    pub fn with_archive_path(mut self, archive_path: impl Into<PathBuf>) -> Self {
        self.archive_path = archive_path.into();
        self
    }

    /// Run all lifecycle steps in order.
    pub fn run_lifecycle_tasks(&self, writer: &LedgerWriter) -> LifecycleRunReport {
        info!("starting ledger lifecycle tasks");
        let mut report = LifecycleRunReport::default();

        report.sealed = self.auto_seal_partitions(writer, &mut report.errors);
        report.compressed = self.compress_old_segments(&mut report.errors);
        report.archived = self.archive_cold_partitions(&mut report.errors);
        report.deleted = self.delete_expired_partitions(&mut report.errors);

        info!(
            sealed = report.sealed.len(),
            compressed = report.compressed.len(),
            archived = report.archived.len(),
            deleted = report.deleted.len(),
            errors = report.errors.len(),
            "lifecycle tasks completed"
        );
        report
    }

    /// Seal partitions past their grace window.
    fn auto_seal_partitions(
        &self,
        writer: &LedgerWriter,
        errors: &mut Vec<String>,
    ) -> Vec<String> {
        let now = Utc::now();
        let mut sealed = Vec::new();

        for partition in self.list_partitions() {
            if partition.is_sealed {
                continue;
            }
            let Some(partition_start) = partition_start(&partition.name) else {
                continue;
            };

            let should_seal = if partition.is_late {
                partition_start + Duration::days(self.config.late_seal_after_days) < now
            } else {
                partition_start
                    + Duration::hours(self.config.auto_seal_after_hours + self.config.seal_grace_hours)
                    < now
            };
            if !should_seal {
                continue;
            }

            match writer.seal_partition(&partition.name) {
                Ok(()) => {
                    info!(partition = %partition.name, "auto-sealed partition");
                    sealed.push(partition.name);
                }
                Err(err) => {
                    error!(partition = %partition.name, error = %err, "auto-seal failed");
                    errors.push(format!("seal {}: {}", partition.name, err));
                }
            }
        }
        sealed
    }

    /// Gzip sealed segments older than the compression threshold. The
    /// original is removed only after the compressed file verifies
    /// non-empty and readable.
    fn compress_old_segments(&self, errors: &mut Vec<String>) -> Vec<String> {
        let threshold = Utc::now() - Duration::days(self.config.compress_after_days);
        let mut compressed = Vec::new();

        for partition in self.list_partitions() {
            if !partition.is_sealed {
                continue;
            }
            let Some(start) = partition_start(&partition.name) else {
                continue;
            };
            if start >= threshold {
                continue;
            }

            for segment in crate::ledger::list_segments(&partition.path) {
                match self.compress_segment(&segment) {
                    Ok(()) => {
                        info!(segment = %segment.display(), "compressed segment");
                        compressed.push(segment.display().to_string());
                    }
                    Err(err) => {
                        error!(segment = %segment.display(), error = %err, "compression failed");
                        errors.push(format!("compress {}: {}", segment.display(), err));
                    }
                }
            }
        }
        compressed
    }

    fn compress_segment(&self, segment: &Path) -> Result<(), LedgerError> {
        let compressed_path = PathBuf::from(format!("{}.gz", segment.display()));
        let input = std::fs::read(segment)?;

        let out = File::create(&compressed_path)?;
        let mut encoder = GzEncoder::new(out, Compression::new(self.config.compression_level));
        std::io::Write::write_all(&mut encoder, &input)?;
        encoder.finish()?.sync_all()?;

        // Integrity gate before dropping the original.
        let verified = std::fs::metadata(&compressed_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false)
            && {
                let file = File::open(&compressed_path)?;
                let mut decoder = flate2::read::GzDecoder::new(file);
                let mut probe = [0u8; 64];
                std::io::Read::read(&mut decoder, &mut probe).is_ok()
            };
        if !verified {
            let _ = std::fs::remove_file(&compressed_path);
            return Err(LedgerError::Write(format!(
                "compression verification failed for {}",
                segment.display()
            )));
        }

        // Sealed segments are readonly; clear the bit to unlink.
        if let Ok(metadata) = std::fs::metadata(segment) {
            let mut permissions = metadata.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            let _ = std::fs::set_permissions(segment, permissions);
        }
        std::fs::remove_file(segment)?;
        Ok(())
    }

    /// Move sealed partitions past cold retention into the archive.
    fn archive_cold_partitions(&self, errors: &mut Vec<String>) -> Vec<String> {
        let threshold = Utc::now() - Duration::days(self.config.cold_retention_days);
        let mut archived = Vec::new();

        for partition in self.list_partitions() {
            if !partition.is_sealed {
                continue;
            }
            let Some(start) = partition_start(&partition.name) else {
                continue;
            };
            if start >= threshold {
                continue;
            }

            match self.archive_partition(&partition) {
                Ok(()) => {
                    info!(partition = %partition.name, "archived partition");
                    archived.push(partition.name);
                }
                Err(err) => {
                    error!(partition = %partition.name, error = %err, "archive failed");
                    errors.push(format!("archive {}: {}", partition.name, err));
                }
            }
        }
        archived
    }

    fn archive_partition(&self, partition: &PartitionEntry) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.archive_path)?;

        if self.config.archive_format == "tar.gz" {
            let tar_path = self.archive_path.join(format!("{}.tar.gz", partition.name));
            let file = File::create(&tar_path)?;
            let encoder = GzEncoder::new(file, Compression::new(self.config.compression_level));
            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(&partition.name, &partition.path)?;
            builder
                .into_inner()
                .and_then(|encoder| encoder.finish())?
                .sync_all()?;
        } else {
            let dest = self.archive_path.join(&partition.name);
            if dest.exists() {
                remove_dir_all_force(&dest)?;
            }
            copy_dir(&partition.path, &dest)?;
        }

        remove_dir_all_force(&partition.path)?;
        Ok(())
    }

    /// Delete anything past delete_after_days in base or archive.
    fn delete_expired_partitions(&self, errors: &mut Vec<String>) -> Vec<String> {
        let Some(delete_after_days) = self.config.delete_after_days else {
            return Vec::new();
        };
        let threshold = Utc::now() - Duration::days(delete_after_days);
        let mut deleted = Vec::new();

        for base in [&self.base_path, &self.archive_path] {
            let Ok(entries) = std::fs::read_dir(base) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('_') {
                    continue;
                }
                let date_name = name.trim_end_matches(".tar.gz");
                let Some(start) = partition_start(date_name) else {
                    continue;
                };
                if start >= threshold {
                    continue;
                }

                let result = if path.is_dir() {
                    remove_dir_all_force(&path)
                } else {
                    std::fs::remove_file(&path).map_err(LedgerError::Io)
                };
                match result {
                    Ok(()) => {
                        warn!(partition = %name, "deleted expired partition");
                        deleted.push(name);
                    }
                    Err(err) => errors.push(format!("delete {}: {}", name, err)),
                }
            }
        }
        deleted
    }

    pub fn storage_stats(&self) -> StorageStats {
        let now = Utc::now();
        let hot_threshold = now - Duration::days(self.config.hot_retention_days);
        let warm_threshold = now - Duration::days(self.config.warm_retention_days);
        let mut stats = StorageStats::default();
        let mut names = Vec::new();

        for partition in self.list_partitions() {
            let Some(start) = partition_start(&partition.name) else {
                continue;
            };
            names.push(partition.name.clone());
            if start >= hot_threshold {
                stats.hot_partitions += 1;
                stats.hot_size_bytes += partition.total_size_bytes;
            } else if start >= warm_threshold {
                stats.warm_partitions += 1;
                stats.warm_size_bytes += partition.total_size_bytes;
            } else {
                stats.cold_partitions += 1;
                stats.cold_size_bytes += partition.total_size_bytes;
            }
            stats.total_records += partition.record_count;
        }

        names.sort();
        stats.oldest_partition = names.first().cloned();
        stats.newest_partition = names.last().cloned();
        stats
    }

    fn list_partitions(&self) -> Vec<PartitionEntry> {
        let mut partitions = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.base_path) else {
            return partitions;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('_') {
                continue;
            }

            let mut total_size = 0u64;
            if let Ok(files) = std::fs::read_dir(&path) {
                for file in files.flatten() {
                    let file_name = file.file_name().to_string_lossy().to_string();
                    if file_name.starts_with("signals-") {
                        total_size += file.metadata().map(|m| m.len()).unwrap_or(0);
                    }
                }
            }

            let record_count = std::fs::read_to_string(path.join("_manifest.json"))
                .ok()
                .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
                .and_then(|manifest| manifest["total_records"].as_u64())
                .unwrap_or(0);

            partitions.push(PartitionEntry {
                is_sealed: path.join("_SEALED").exists(),
                is_late: is_late_partition(&name),
                name,
                path,
                total_size_bytes: total_size,
                record_count,
            });
        }
        partitions.sort_by(|a, b| a.name.cmp(&b.name));
        partitions
    }
}

fn partition_start(name: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(partition_base_date(name), "%Y-%m-%d").ok()?;
    Utc.with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
        .single()
}

/// Recursive delete that first clears readonly bits (sealed segments).
fn remove_dir_all_force(dir: &Path) -> Result<(), LedgerError> {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(metadata) = entry.metadata() {
                if metadata.permissions().readonly() {
                    let mut permissions = metadata.permissions();
                    #[allow(clippy::permissions_set_readonly_false)]
                    permissions.set_readonly(false);
                    let _ = std::fs::set_permissions(entry.path(), permissions);
                }
            }
        }
    }
    std::fs::remove_dir_all(dir).map_err(LedgerError::Io)
}

fn copy_dir(src: &Path, dest: &Path) -> Result<(), LedgerError> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)?.flatten() {
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir(&path, &target)?;
        } else {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::reader::LedgerReader;
    use crate::models::*;

    fn sample_event(signal_id: &str, emitted_at: DateTime<Utc>) -> SignalEvent {
        let signal = OmenSignal {
            signal_id: signal_id.to_string(),
            source_event_id: "evt".to_string(),
            trace_id: "abcdefabcdefabcd".to_string(),
            title: "t".to_string(),
            description: String::new(),
            probability: 0.5,
            probability_source: "news".to_string(),
            confidence_score: 0.5,
            confidence_interval: ConfidenceInterval {
                point_estimate: 0.5,
                lower_bound: 0.4,
                upper_bound: 0.6,
                confidence_level: 0.95,
                method: "weighted_bayesian".to_string(),
            },
            confidence_level: ConfidenceLevel::Medium,
            category: SignalCategory::Other,
            signal_type: SignalType::Unclassified,
            status: SignalStatus::Active,
            geographic: GeographicScope::default(),
            temporal: TemporalScope::default(),
            impact_hints: ImpactHints {
                domains: vec![],
                direction: ImpactDirection::Unknown,
                affected_asset_types: vec![],
                keywords: vec![],
            },
            evidence: vec![],
            ruleset_version: "v1".to_string(),
            generated_at: Utc::now(),
            input_event_hash: "hash".to_string(),
        };
        let mut event = SignalEvent::from_omen_signal(signal, "hash".to_string(), emitted_at);
        event.emitted_at = emitted_at;
        event
    }

    fn retention_for_tests() -> RetentionConfig {
        RetentionConfig {
            auto_seal_after_hours: 0,
            seal_grace_hours: 0,
            late_seal_after_days: 0,
            compress_after_days: 0,
            cold_retention_days: 10_000, // keep archive step quiet
            delete_after_days: None,
            ..Default::default()
        }
    }

    #[test]
    fn full_pass_seals_and_compresses_old_partition() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        let old_date = Utc::now() - Duration::days(3);
        writer.write(sample_event("OMEN-1", old_date)).unwrap();
        writer.write(sample_event("OMEN-2", old_date)).unwrap();

        let manager = LedgerLifecycleManager::new(dir.path(), retention_for_tests());
        let report = manager.run_lifecycle_tasks(&writer);

        let partition = old_date.format("%Y-%m-%d").to_string();
        assert_eq!(report.sealed, vec![partition.clone()]);
        assert_eq!(report.compressed.len(), 1);
        assert!(report.errors.is_empty());

        let partition_dir = dir.path().join(&partition);
        assert!(partition_dir.join("_SEALED").exists());
        assert!(partition_dir.join("signals-001.wal.gz").exists());
        assert!(!partition_dir.join("signals-001.wal").exists());
    }

    #[test]
    fn archive_moves_partition_out_of_base() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        let old_date = Utc::now() - Duration::days(40);
        writer.write(sample_event("OMEN-1", old_date)).unwrap();

        let config = RetentionConfig {
            auto_seal_after_hours: 0,
            seal_grace_hours: 0,
            compress_after_days: 10_000, // skip compression
            cold_retention_days: 30,
            ..Default::default()
        };
        let manager = LedgerLifecycleManager::new(dir.path(), config);
        let report = manager.run_lifecycle_tasks(&writer);

        let partition = old_date.format("%Y-%m-%d").to_string();
        assert!(report.archived.contains(&partition));
        assert!(!dir.path().join(&partition).exists());
        assert!(dir.path().join("_archive").join(&partition).exists());
    }

    #[test]
    fn delete_removes_expired_from_base_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        let ancient = Utc::now() - Duration::days(100);
        writer.write(sample_event("OMEN-1", ancient)).unwrap();

        let config = RetentionConfig {
            auto_seal_after_hours: 0,
            seal_grace_hours: 0,
            compress_after_days: 10_000,
            cold_retention_days: 10_000,
            delete_after_days: Some(90),
            ..Default::default()
        };
        let manager = LedgerLifecycleManager::new(dir.path(), config);
        let report = manager.run_lifecycle_tasks(&writer);

        let partition = ancient.format("%Y-%m-%d").to_string();
        assert!(report.deleted.contains(&partition));
        assert!(!dir.path().join(&partition).exists());
    }

    #[test]
    fn compressed_partition_remains_listable() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        let old_date = Utc::now() - Duration::days(3);
        writer.write(sample_event("OMEN-1", old_date)).unwrap();

        let manager = LedgerLifecycleManager::new(dir.path(), retention_for_tests());
        manager.run_lifecycle_tasks(&writer);

        let reader = LedgerReader::new(dir.path());
        let partitions = reader.list_partitions();
        assert_eq!(partitions.len(), 1);
        assert!(partitions[0].is_sealed);
        // Manifest preserves the pre-compression record count.
        assert_eq!(partitions[0].total_records, 1);
    }

    #[test]
    fn storage_stats_bucket_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LedgerWriter::new(dir.path()).unwrap();
        writer.write(sample_event("OMEN-NEW", Utc::now())).unwrap();
        writer
            .write(sample_event("OMEN-OLD", Utc::now() - Duration::days(15)))
            .unwrap();

        let manager = LedgerLifecycleManager::new(
            dir.path(),
            RetentionConfig {
                hot_retention_days: 7,
                warm_retention_days: 30,
                ..Default::default()
            },
        );
        let stats = manager.storage_stats();
        assert_eq!(stats.hot_partitions, 1);
        assert_eq!(stats.warm_partitions, 1);
        assert!(stats.oldest_partition < stats.newest_partition);
    }
}
