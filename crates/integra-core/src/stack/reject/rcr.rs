use std::f64::consts::SQRT_2;

use super::{median_of, Sides};
use crate::math::distributions::erfc;
use crate::math::stats::is_insignificant;
use crate::pipeline::config::RcrParams;
use crate::stack::{sort_stack, StackEntry};

/// Fraction of a Gaussian population within one sigma of the mean.
const ONE_SIGMA_FRACTION: f64 = 0.6827;

/// 68.27th percentile of absolute deviations from `center`, scaled up for
/// small samples.
fn percentile_sigma(stack: &[StackEntry], center: f64) -> f64 {
    let n = stack.len();
    let mut d: Vec<f64> = stack.iter().map(|e| (e.value - center).abs()).collect();
    d.sort_by(|a, b| a.total_cmp(b));
    let k = ((ONE_SIGMA_FRACTION * n as f64).ceil() as usize).clamp(1, n) - 1;
    d[k] * (n as f64 / (n - 1) as f64).sqrt()
}

/// Robust Chauvenet rejection.
///
/// Removes the most deviant allowed sample while Chauvenet's criterion,
/// evaluated with a median center and a percentile sigma, says fewer than
/// `limit` samples that far out are expected.
pub fn rcr_clip(stack: &mut [StackEntry], sides: Sides, p: &RcrParams) -> usize {
    let n0 = stack.len();
    let mut w = 0..n0;
    while w.len() >= 3 {
        let window = &stack[w.clone()];
        let m = median_of(window);
        let sigma = percentile_sigma(window, m);
        if is_insignificant(sigma) {
            break;
        }
        let dl = if sides.low { m - window[0].value } else { f64::NEG_INFINITY };
        let dh = if sides.high { window[window.len() - 1].value - m } else { f64::NEG_INFINITY };
        let d = dl.max(dh);
        if d <= 0.0 {
            break;
        }
        let expected = w.len() as f64 * erfc(d / (sigma * SQRT_2));
        if expected >= p.limit {
            break;
        }
        if dh >= dl {
            stack[w.end - 1].reject_high = true;
            w.end -= 1;
        } else {
            stack[w.start].reject_low = true;
            w.start += 1;
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
    fn rejects_far_outliers_only() {
        let values = [0.50, 0.51, 0.49, 0.50, 0.52, 0.48, 0.50, 0.51, 0.49, 0.05, 0.99];
        let mut stack = stack_of(&values);
        let n = rcr_clip(&mut stack, Sides::BOTH, &RcrParams::default());
        assert_eq!(n, 9);
        assert_eq!(rejected_indices(&stack), vec![9, 10]);
    }
}
