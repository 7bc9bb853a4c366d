//! Fixed-length commit windows and earliest-record extraction

use crate::usage::{PeriodRecord, UsageMap};

/// Default window length in seconds
pub const DEFAULT_PERIOD_SECS: i64 = 3600;

/// The window currently accumulating usage, covering `[start, end)`
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub start: i64,
    pub end: i64,
    pub usage: UsageMap,
    /// Sum of prices merged into this window only
    pub subtotal: f64,
}

impl Window {
    /// `None` when `start + period` does not fit in an `i64`
    pub fn new(start: i64, period: i64) -> Option<Self> {
        Some(Self {
            start,
            end: start.checked_add(period)?,
            usage: UsageMap::new(),
            subtotal: 0.0,
        })
    }

    /// True once a record starting at `begin` belongs to a later window
    pub fn is_crossed_by(&self, begin: i64) -> bool {
        begin >= self.end
    }

    /// Append every service's entries to the accumulated usage, returning the merged price sum
    pub fn merge(&mut self, usage: UsageMap) -> f64 {
        let mut merged = 0.0;
        for (service, entries) in usage {
            merged += entries.iter().filter_map(|e| e.price()).sum::<f64>();
            self.usage.entry(service).or_default().extend(entries);
        }
        self.subtotal += merged;
        merged
    }

    pub fn entry_count(&self) -> usize {
        self.usage.values().map(Vec::len).sum()
    }
}

/// Remove and return the record with the smallest `period.begin`.
///
/// Ties go to the earliest position in the batch. Linear scan per call.
pub fn take_earliest(batch: &mut Vec<PeriodRecord>) -> Option<PeriodRecord> {
    let mut candidate: Option<(usize, i64)> = None;
    for (idx, record) in batch.iter().enumerate() {
        let begin = record.begin();
        if candidate.map_or(true, |(_, best)| begin < best) {
            candidate = Some((idx, begin));
        }
    }
    candidate.map(|(idx, _)| batch.remove(idx))
}
