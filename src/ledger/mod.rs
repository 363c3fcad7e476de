//! Append-only ledger (WAL)
//!
//! Partition-per-UTC-date directories of framed segment files:
//!
//! ```text
//! <base>/
//!   YYYY-MM-DD/
//!     _LOCK                exclusive file lock (single writer)
//!     _CURRENT             name of the writable segment
//!     signals-001.wal      frames: [u32 BE len][u32 BE crc32][payload]
//!     _SEALED              written on seal; contents = sealed_at ISO-8601
//!     _manifest.json       written on seal
//!   YYYY-MM-DD-late/       arrivals after seal
//!   _archive/              cold partitions
//! ```
//!
//! Crash safety: a partial trailing frame is detectable by length mismatch
//! and silently truncated by the reader; a corrupted frame fails its CRC
//! and is skipped. No corrupted record is ever surfaced.

pub mod lifecycle;
pub mod reader;
pub mod writer;

pub use lifecycle::{LedgerLifecycleManager, LifecycleRunReport, StorageStats};
pub use reader::{LedgerReader, PartitionInfo};
pub use writer::LedgerWriter;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::errors::LedgerError;

/// 4 bytes length + 4 bytes crc32, both big-endian.
pub const FRAME_HEADER_SIZE: usize = 8;
pub const MAX_SEGMENT_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_SEGMENT_RECORDS: u64 = 10_000;
pub const MANIFEST_SCHEMA_VERSION: &str = "1.0.0";

/// Atomically write text with durability:
/// 1) write `name.tmp` in the same directory
/// 2) fsync the temp file
/// 3) rename over the target
/// 4) fsync the parent directory
///
/// On platforms that cannot fsync a directory the final step degrades to a
/// warning instead of failing.
pub fn atomic_write_text(path: &Path, text: &str) -> Result<(), LedgerError> {
    let parent = path
        .parent()
        .ok_or_else(|| LedgerError::Write(format!("no parent directory for {:?}", path)))?;
    let temp = parent.join(format!(
        "{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    ));

    {
        let mut file = File::create(&temp)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
    }
    std::fs::rename(&temp, path)?;

    match File::open(parent).and_then(|dir| dir.sync_all()) {
        Ok(()) => Ok(()),
        Err(err) => {
            if cfg!(windows) {
                warn!(
                    parent = %parent.display(),
                    "durability degraded: cannot fsync parent directory"
                );
                Ok(())
            } else {
                Err(LedgerError::Io(err))
            }
        }
    }
}

/// Partition directory name for a UTC date, optionally late.
pub fn is_late_partition(name: &str) -> bool {
    name.ends_with("-late")
}

/// Strip the `-late` suffix to recover the base date.
pub fn partition_base_date(name: &str) -> &str {
    name.strip_suffix("-late").unwrap_or(name)
}

/// Segment ordinal from `signals-NNN.wal`.
pub fn segment_ordinal(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("signals-")?
        .strip_suffix(".wal")?
        .parse()
        .ok()
}

pub fn segment_file_name(ordinal: u64) -> String {
    format!("signals-{:03}.wal", ordinal)
}

/// Sorted list of `.wal` segments in a partition directory.
pub fn list_segments(partition_dir: &Path) -> Vec<std::path::PathBuf> {
    let mut segments: Vec<std::path::PathBuf> = match std::fs::read_dir(partition_dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| {
                        let name = n.to_string_lossy();
                        name.starts_with("signals-") && name.ends_with(".wal")
                    })
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    segments.sort();
    segments
}
