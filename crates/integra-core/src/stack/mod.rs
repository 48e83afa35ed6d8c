pub mod combine;
pub mod large_scale;
pub mod loader;
pub mod normalize;
pub mod reject;

use std::cmp::Ordering;

use crate::consts::{MAP_HIGH, MAP_LOW, MAP_RANGE_HIGH, MAP_RANGE_LOW};

/// One file's sample at a pixel position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StackEntry {
    /// Output-normalized sample, used for combination.
    pub raw: f64,
    /// Rejection proxy, transformed by rejection normalization.
    pub value: f64,
    /// Index of the source file.
    pub index: usize,
    pub reject_low: bool,
    pub reject_high: bool,
    pub reject_range_low: bool,
    pub reject_range_high: bool,
}

impl StackEntry {
    pub fn new(sample: f64, index: usize) -> Self {
        Self {
            raw: sample,
            value: sample,
            index,
            ..Self::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.reject_low || self.reject_high || self.reject_range_low || self.reject_range_high
    }

    /// Rejection map bits of this entry.
    pub fn map_bits(&self) -> u8 {
        let mut bits = 0;
        if self.reject_high {
            bits |= MAP_HIGH;
        }
        if self.reject_low {
            bits |= MAP_LOW;
        }
        if self.reject_range_high {
            bits |= MAP_RANGE_HIGH;
        }
        if self.reject_range_low {
            bits |= MAP_RANGE_LOW;
        }
        bits
    }
}

fn stack_order(a: &StackEntry, b: &StackEntry) -> Ordering {
    match (a.is_rejected(), b.is_rejected()) {
        (false, false) => a.value.total_cmp(&b.value),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => Ordering::Equal,
    }
}

/// Stable sort: live entries ascending by proxy value, rejected entries last.
pub fn sort_stack(stack: &mut [StackEntry]) {
    stack.sort_by(stack_order);
}

/// Number of entries not rejected.
pub fn live_count(stack: &[StackEntry]) -> usize {
    stack.iter().filter(|e| !e.is_rejected()).count()
}

/// Stacks for all pixels of one image row.
///
/// Entries are stored column-major: the stack of column `x` is the
/// contiguous slice `x * files .. (x + 1) * files`.
#[derive(Clone, Debug)]
pub struct RejectionMatrix {
    width: usize,
    files: usize,
    entries: Vec<StackEntry>,
    counts: Vec<usize>,
    slopes: Option<Vec<f32>>,
}

impl RejectionMatrix {
    pub fn new(width: usize, files: usize, with_slopes: bool) -> Self {
        Self {
            width,
            files,
            entries: vec![StackEntry::default(); width * files],
            counts: vec![files; width],
            slopes: with_slopes.then(|| vec![0.0; width]),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn files(&self) -> usize {
        self.files
    }

    pub fn stack(&self, x: usize) -> &[StackEntry] {
        &self.entries[x * self.files..(x + 1) * self.files]
    }

    pub fn stack_mut(&mut self, x: usize) -> &mut [StackEntry] {
        &mut self.entries[x * self.files..(x + 1) * self.files]
    }

    /// Surviving entries in the stack of column `x`.
    pub fn count(&self, x: usize) -> usize {
        self.counts[x]
    }

    pub fn set_count(&mut self, x: usize, n: usize) {
        self.counts[x] = n;
    }

    pub fn slopes(&self) -> Option<&[f32]> {
        self.slopes.as_deref()
    }

    pub fn set_slope(&mut self, x: usize, slope: f32) {
        if let Some(s) = self.slopes.as_mut() {
            s[x] = slope;
        }
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [StackEntry] {
        &mut self.entries
    }

    /// Iterate over (column, stack, count) with mutable access.
    pub fn columns_mut(&mut self) -> impl Iterator<Item = (usize, &mut [StackEntry], &mut usize)> {
        self.entries
            .chunks_mut(self.files.max(1))
            .zip(self.counts.iter_mut())
            .enumerate()
            .map(|(x, (stack, count))| (x, stack, count))
    }
}
