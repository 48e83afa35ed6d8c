use super::Sides;
use crate::pipeline::config::MinMaxParams;
use crate::stack::{sort_stack, StackEntry};

/// Reject a fixed number of the lowest and highest entries.
pub fn min_max(stack: &mut [StackEntry], sides: Sides, p: &MinMaxParams) -> usize {
    let n = stack.len();
    let nl = if sides.low { p.low.min(n) } else { 0 };
    let nh = if sides.high { p.high.min(n - nl) } else { 0 };
    if nl == 0 && nh == 0 {
        return n;
    }
    for e in &mut stack[..nl] {
        e.reject_low = true;
    }
    for e in &mut stack[n - nh..] {
        e.reject_high = true;
    }
    sort_stack(stack);
    n - nl - nh
}
