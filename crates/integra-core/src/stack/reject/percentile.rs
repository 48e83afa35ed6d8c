use super::{median_of, Sides};
use crate::math::stats::is_insignificant;
use crate::pipeline::config::PercentileParams;
use crate::stack::{sort_stack, StackEntry};

/// Reject entries farther from the median than a fraction of it.
pub fn percentile_clip(stack: &mut [StackEntry], sides: Sides, p: &PercentileParams) -> usize {
    let n = stack.len();
    if n < 2 {
        return n;
    }
    let m = median_of(stack);
    if is_insignificant(m) {
        return n;
    }
    let mut nc = 0;
    if sides.low {
        for e in stack.iter_mut() {
            if (m - e.value) / m <= p.low {
                break;
            }
            e.reject_low = true;
            nc += 1;
        }
    }
    if sides.high {
        for e in stack.iter_mut().rev() {
            if e.reject_low || (e.value - m) / m <= p.high {
                break;
            }
            e.reject_high = true;
            nc += 1;
        }
    }
    if nc > 0 {
        sort_stack(stack);
    }
    n - nc
}
