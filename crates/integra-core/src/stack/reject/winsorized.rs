use super::{reject_inward, values_of, Sides};
use crate::consts::MAX_REJECTION_ITERATIONS;
use crate::math::stats::{is_insignificant, winsorized_mean_sigma};
use crate::pipeline::config::WinsorizedParams;
use crate::stack::{sort_stack, StackEntry};

/// Sigma clipping about a Huber-winsorized mean and sigma.
pub fn winsorized_sigma_clip(stack: &mut [StackEntry], sides: Sides, p: &WinsorizedParams) -> usize {
    let n0 = stack.len();
    let mut w = 0..n0;
    for it in 0..MAX_REJECTION_ITERATIONS {
        if w.len() < 3 {
            break;
        }
        let cutoff = (it == 0).then_some(p.cutoff);
        let (m, s) = winsorized_mean_sigma(&values_of(&stack[w.clone()]), cutoff);
        if is_insignificant(s) {
            break;
        }
        if reject_inward(stack, &mut w, m, s, s, p.low, p.high, sides) == 0 {
            break;
        }
    }
    if w.len() < n0 {
        sort_stack(stack);
    }
    w.len()
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{rejected_indices, stack_of};
    use super::*;

    #[test]
    fn rejects_both_tails() {
        let values = [0.30, 0.31, 0.29, 0.30, 0.32, 0.28, 0.30, 0.31, 0.29, 0.95, 0.01];
        let mut stack = stack_of(&values);
        let n = winsorized_sigma_clip(&mut stack, Sides::BOTH, &WinsorizedParams::default());
        assert_eq!(n, 9);
        assert_eq!(rejected_indices(&stack), vec![9, 10]);
    }
}
