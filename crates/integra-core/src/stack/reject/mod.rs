//! Pixel rejection over the stacks of one row.
//!
//! Every algorithm works on the live prefix of a stack sorted ascending by
//! proxy value, flags outliers, and leaves the stack re-sorted with
//! rejected entries last. The return value is the surviving count.

pub mod esd;
pub mod linear_fit;
pub mod minmax;
pub mod percentile;
pub mod range;
pub mod rcr;
pub mod sigma;
pub mod winsorized;

use std::ops::Range;

use crate::math::distributions::EsdLambdaCache;
use crate::math::stats::median_sorted;
use crate::pipeline::config::{IntegrationConfig, RangeRejection, Rejection};

use super::{sort_stack, RejectionMatrix, StackEntry};

/// Which tails of the distribution may be rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sides {
    pub low: bool,
    pub high: bool,
}

impl Sides {
    pub const BOTH: Self = Self { low: true, high: true };
}

/// Proxy values of a stack slice.
pub(crate) fn values_of(stack: &[StackEntry]) -> Vec<f64> {
    stack.iter().map(|e| e.value).collect()
}

/// Median of a slice of entries already sorted by value.
pub(crate) fn median_of(stack: &[StackEntry]) -> f64 {
    let n = stack.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        stack[n / 2].value
    } else {
        (stack[n / 2 - 1].value + stack[n / 2].value) / 2.0
    }
}

/// Shrink the sorted window from both ends, flagging entries farther than
/// `k_low` (`k_high`) sigmas below (above) `center`.
///
/// Returns the number of entries flagged.
#[allow(clippy::too_many_arguments)]
pub(crate) fn reject_inward(
    stack: &mut [StackEntry],
    window: &mut Range<usize>,
    center: f64,
    sigma_low: f64,
    sigma_high: f64,
    k_low: f64,
    k_high: f64,
    sides: Sides,
) -> usize {
    let mut nc = 0;
    if sides.low {
        while window.start < window.end && (center - stack[window.start].value) / sigma_low > k_low {
            stack[window.start].reject_low = true;
            window.start += 1;
            nc += 1;
        }
    }
    if sides.high {
        while window.end > window.start && (stack[window.end - 1].value - center) / sigma_high > k_high {
            stack[window.end - 1].reject_high = true;
            window.end -= 1;
            nc += 1;
        }
    }
    nc
}

/// Statistical rejection state of one worker.
///
/// Holds the per-thread caches some algorithms need, so it is created once
/// per worker and reused for every row it processes.
pub struct Rejector {
    algorithm: Rejection,
    sides: Sides,
    range: RangeRejection,
    esd_lambda: Option<EsdLambdaCache>,
}

impl Rejector {
    pub fn new(config: &IntegrationConfig) -> Self {
        let esd_lambda = match &config.rejection.algorithm {
            Rejection::Esd(p) => Some(EsdLambdaCache::new(p.alpha)),
            _ => None,
        };
        Self {
            algorithm: config.rejection.algorithm.clone(),
            sides: Sides {
                low: config.rejection.clip_low,
                high: config.rejection.clip_high,
            },
            range: config.range.clone(),
            esd_lambda,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.algorithm.is_enabled()
    }

    /// Range rejection of a whole row. Returns the number of samples flagged.
    pub fn range_reject(&self, matrix: &mut RejectionMatrix) -> usize {
        if !self.algorithm.is_enabled() || !self.range.is_enabled() {
            return 0;
        }
        range::range_reject(matrix, &self.range)
    }

    /// Statistical rejection of every stack of a row.
    ///
    /// Sorts each stack, runs the configured algorithm on its live entries,
    /// and records the surviving count (and slope for linear fit clipping).
    pub fn reject(&mut self, matrix: &mut RejectionMatrix) {
        for x in 0..matrix.width() {
            let n = matrix.count(x);
            let stack = matrix.stack_mut(x);
            sort_stack(stack);
            let (count, slope) = self.reject_stack(&mut stack[..n]);
            matrix.set_count(x, count);
            if let Some(slope) = slope {
                matrix.set_slope(x, slope);
            }
        }
    }

    /// Statistical rejection of one live, sorted stack.
    pub fn reject_stack(&mut self, stack: &mut [StackEntry]) -> (usize, Option<f32>) {
        let sides = self.sides;
        match &self.algorithm {
            Rejection::None => (stack.len(), None),
            Rejection::MinMax(p) => (minmax::min_max(stack, sides, p), None),
            Rejection::Percentile(p) => (percentile::percentile_clip(stack, sides, p), None),
            Rejection::Sigma(p) => (sigma::sigma_clip(stack, sides, p), None),
            Rejection::WinsorizedSigma(p) => (winsorized::winsorized_sigma_clip(stack, sides, p), None),
            Rejection::AveragedSigma(p) => (sigma::averaged_sigma_clip(stack, sides, p), None),
            Rejection::CcdClip(p) => (sigma::ccd_clip(stack, sides, p), None),
            Rejection::LinearFit(p) => {
                let (count, slope) = linear_fit::linear_fit_clip(stack, sides, p);
                (count, Some(slope))
            }
            Rejection::Esd(p) => match self.esd_lambda.as_mut() {
                Some(lambda) => (esd::esd_clip(stack, sides, p, lambda), None),
                None => (stack.len(), None),
            },
            Rejection::Rcr(p) => (rcr::rcr_clip(stack, sides, p), None),
        }
    }
}

/// Median of the proxy values of a sorted window.
pub(crate) fn window_median(stack: &[StackEntry], window: &Range<usize>) -> f64 {
    median_sorted(&values_of(&stack[window.clone()]))
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::stack::{sort_stack, StackEntry};

    /// A sorted stack built from proxy values.
    pub fn stack_of(values: &[f64]) -> Vec<StackEntry> {
        let mut stack: Vec<StackEntry> = values.iter().enumerate().map(|(i, &v)| StackEntry::new(v, i)).collect();
        sort_stack(&mut stack);
        stack
    }

    pub fn rejected_indices(stack: &[StackEntry]) -> Vec<usize> {
        let mut v: Vec<usize> = stack.iter().filter(|e| e.is_rejected()).map(|e| e.index).collect();
        v.sort_unstable();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::stack_of;
    use super::*;

    #[test]
    fn inward_rejection_stops_at_first_inlier() {
        let mut stack = stack_of(&[0.0, 5.0, 5.1, 4.9, 10.0]);
        let mut w = 0..5;
        let nc = reject_inward(&mut stack, &mut w, 5.0, 1.0, 1.0, 2.0, 2.0, Sides::BOTH);
        assert_eq!(nc, 2);
        assert_eq!(w, 1..4);
        assert!(stack[0].reject_low);
        assert!(stack[4].reject_high);
    }

    #[test]
    fn disabled_side_is_never_flagged() {
        let mut stack = stack_of(&[0.0, 5.0, 5.1, 4.9, 10.0]);
        let mut w = 0..5;
        let sides = Sides { low: false, high: true };
        reject_inward(&mut stack, &mut w, 5.0, 1.0, 1.0, 2.0, 2.0, sides);
        assert!(!stack[0].is_rejected());
        assert!(stack[4].reject_high);
    }
}
