//! Dead-letter queue.
//!
//! Bounded FIFO of events the pipeline could not process, each tagged with
//! the error kind and, when applicable, the rule that rejected it.
//! Reprocessing dequeues from the head; still-failing events re-enter at
//! the tail with an incremented retry count.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::errors::PipelineErrorKind;
use crate::models::RawEvent;

#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub event: RawEvent,
    pub error_kind: PipelineErrorKind,
    pub rule_name: Option<String>,
    pub reason: String,
    pub retry_count: u32,
    pub first_seen: DateTime<Utc>,
}

pub struct DeadLetterQueue {
    max_size: usize,
    entries: Mutex<VecDeque<DlqEntry>>,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue a fresh failure. When full, the oldest entry is dropped.
    pub fn push(
        &self,
        event: RawEvent,
        error_kind: PipelineErrorKind,
        rule_name: Option<String>,
        reason: impl Into<String>,
    ) {
        self.push_entry(DlqEntry {
            event,
            error_kind,
            rule_name,
            reason: reason.into(),
            retry_count: 0,
            first_seen: Utc::now(),
        });
    }

    /// Re-enqueue a failed reprocess at the tail with retry_count + 1.
    pub fn requeue(&self, mut entry: DlqEntry) {
        entry.retry_count += 1;
        self.push_entry(entry);
    }

    fn push_entry(&self, entry: DlqEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Dequeue up to `max_items` from the head for reprocessing.
    pub fn drain(&self, max_items: usize) -> Vec<DlqEntry> {
        let mut entries = self.entries.lock();
        let n = max_items.min(entries.len());
        entries.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries_snapshot(&self) -> Vec<DlqEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}
