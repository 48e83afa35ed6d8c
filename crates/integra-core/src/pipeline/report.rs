use std::ops::AddAssign;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::math::stats::TwoSided;
use crate::noise::ChannelEvaluation;
use crate::stack::StackEntry;

/// Rejected pixel counts of one file in one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub low: u64,
    pub high: u64,
    pub range_low: u64,
    pub range_high: u64,
}

impl RejectionCounts {
    pub fn total(&self) -> u64 {
        self.low + self.high + self.range_low + self.range_high
    }

    /// Count the flags of one stack entry.
    pub fn record(&mut self, entry: &StackEntry) {
        self.low += u64::from(entry.reject_low);
        self.high += u64::from(entry.reject_high);
        self.range_low += u64::from(entry.reject_range_low);
        self.range_high += u64::from(entry.reject_range_high);
    }
}

impl AddAssign for RejectionCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.low += rhs.low;
        self.high += rhs.high;
        self.range_low += rhs.range_low;
        self.range_high += rhs.range_high;
    }
}

/// Per-file rejection counts accumulated by one worker for one channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RejectionCounters {
    pub files: Vec<RejectionCounts>,
}

impl RejectionCounters {
    pub fn new(files: usize) -> Self {
        Self {
            files: vec![RejectionCounts::default(); files],
        }
    }

    pub fn record(&mut self, entry: &StackEntry) {
        self.files[entry.index].record(entry);
    }

    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self.files.iter_mut().zip(&other.files) {
            *a += *b;
        }
    }
}

/// Integration outcome of one channel of one input file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileChannelReport {
    pub rejected: RejectionCounts,
    /// Weight relative to the reference file.
    pub weight: f64,
    pub location: f64,
    pub scale_factor: TwoSided,
    pub zero_offset: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub channels: Vec<FileChannelReport>,
}

/// Summary of an integration run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub files: Vec<FileReport>,
    /// Noise and signal evaluation of each output channel.
    pub evaluation: Vec<ChannelEvaluation>,
    /// Extreme output samples before range finalization.
    pub output_range: (f64, f64),
    /// Samples saturated when narrowing to the output sample type.
    pub overflow: bool,
    pub drizzle_failures: usize,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl IntegrationReport {
    /// Total rejected samples in `channel` over every file.
    pub fn total_rejected(&self, channel: usize) -> RejectionCounts {
        let mut total = RejectionCounts::default();
        for f in &self.files {
            if let Some(c) = f.channels.get(channel) {
                total += c.rejected;
            }
        }
        total
    }

    /// Fraction of all stack samples of `channel` that were rejected.
    pub fn rejected_fraction(&self, channel: usize) -> f64 {
        let samples = (self.width * self.height * self.files.len()) as f64;
        if samples == 0.0 {
            return 0.0;
        }
        self.total_rejected(channel).total() as f64 / samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_merge_per_file() {
        let mut a = RejectionCounters::new(2);
        let mut b = RejectionCounters::new(2);
        let mut e = StackEntry::new(1.0, 1);
        e.reject_high = true;
        a.record(&e);
        b.record(&e);
        e.reject_high = false;
        e.reject_range_low = true;
        e.index = 0;
        b.record(&e);
        a.merge(&b);
        assert_eq!(a.files[1].high, 2);
        assert_eq!(a.files[0].range_low, 1);
        assert_eq!(a.files[0].total(), 1);
    }
}
