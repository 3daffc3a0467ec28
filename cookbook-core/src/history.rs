//! In-process execution history.

use crate::types::{ExecutionRecord, ExecutionStats};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Execution records keyed by id.
///
/// Each record carries the sequence number it was completed with, so
/// [`records`](Self::records) returns completion order even though
/// concurrent executions insert at the same time.
#[derive(Debug, Default)]
pub struct ExecutionHistory {
    records: DashMap<String, (u64, ExecutionRecord)>,
    next_seq: AtomicU64,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finished execution
    pub fn record(&self, record: ExecutionRecord) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.records.insert(record.id.clone(), (seq, record));
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.records.get(id).map(|entry| entry.value().1.clone())
    }

    /// All records in completion order
    pub fn records(&self) -> Vec<ExecutionRecord> {
        let mut ordered: Vec<(u64, ExecutionRecord)> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    /// Fold the history into aggregate statistics.
    pub fn stats(&self) -> ExecutionStats {
        let mut total = 0usize;
        let mut successful = 0usize;
        let mut total_time = 0u64;
        let mut total_tokens = 0u64;

        for entry in self.records.iter() {
            let result = &entry.value().1.result;
            total += 1;
            if result.success {
                successful += 1;
            }
            total_time += result.execution_time_ms;
            total_tokens += result.tokens_used.map(u64::from).unwrap_or(0);
        }

        ExecutionStats {
            total_executions: total,
            successful_executions: successful,
            failed_executions: total - successful,
            average_execution_time_ms: if total == 0 {
                0.0
            } else {
                total_time as f64 / total as f64
            },
            total_tokens_used: total_tokens,
        }
    }
}
