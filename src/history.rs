use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::alert::{AlertCode, AlertState};

/// One row of the per-batch analysis log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub batch: u64,
    /// Headline value of the batch summary.
    pub summary: f64,
    /// `None` for the bootstrap batch.
    pub score: Option<f64>,
    pub mean: f64,
    pub std_dev: f64,
    pub warn_cutoff: Option<f64>,
    pub drift_cutoff: Option<f64>,
    pub state: AlertState,
    pub code: AlertCode,
}

/// Bounded log of the most recent batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl DriftLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that raised an alert.
    pub fn alerts(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.code != AlertCode::None)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }
}
