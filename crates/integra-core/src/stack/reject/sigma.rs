use std::ops::Range;

use super::{median_of, reject_inward, values_of, window_median, Sides};
use crate::consts::CCD_CLIP_BITS;
use crate::math::stats::{is_insignificant, mean, stddev};
use crate::pipeline::config::{CcdParams, SigmaParams};
use crate::stack::{sort_stack, StackEntry};

/// Sample standard deviation of the proxy values of `stack`.
fn dispersion(stack: &[StackEntry]) -> f64 {
    let v = values_of(stack);
    stddev(&v, mean(&v))
}

/// Reject an extreme entry whose peers all share one value.
///
/// Sigma over the whole window is bounded by the sample size, so a lone
/// outlier among identical samples can never reach the threshold.
fn reject_lone_extreme(stack: &mut [StackEntry], w: &mut Range<usize>, m: f64, sides: Sides) -> usize {
    let window = &stack[w.clone()];
    let n = window.len();
    if sides.low && !is_insignificant(m - window[0].value) && is_insignificant(dispersion(&window[1..])) {
        stack[w.start].reject_low = true;
        w.start += 1;
        return 1;
    }
    if sides.high && !is_insignificant(window[n - 1].value - m) && is_insignificant(dispersion(&window[..n - 1])) {
        stack[w.end - 1].reject_high = true;
        w.end -= 1;
        return 1;
    }
    0
}

/// Iterative sigma clipping about the median.
///
/// Sigma is the standard deviation of every surviving entry; entries are
/// rejected inward from both ends until one falls within the thresholds.
pub fn sigma_clip(stack: &mut [StackEntry], sides: Sides, p: &SigmaParams) -> usize {
    let n0 = stack.len();
    let mut w = 0..n0;
    for _ in 0..p.max_iterations {
        if w.len() < 3 {
            break;
        }
        let sigma = dispersion(&stack[w.clone()]);
        if is_insignificant(sigma) {
            break;
        }
        let m = window_median(stack, &w);
        let mut nc = reject_inward(stack, &mut w, m, sigma, sigma, p.low, p.high, sides);
        if nc == 0 {
            nc = reject_lone_extreme(stack, &mut w, m, sides);
        }
        if nc == 0 {
            break;
        }
    }
    if w.len() < n0 {
        sort_stack(stack);
    }
    w.len()
}

/// Sigma clipping with a Poisson dispersion model fitted across the stack.
pub fn averaged_sigma_clip(stack: &mut [StackEntry], sides: Sides, p: &SigmaParams) -> usize {
    let n0 = stack.len();
    if n0 < 3 {
        return n0;
    }
    let mut w = 0..n0;
    let mut m = median_of(stack);
    if is_insignificant(m) {
        // no usable Poisson model; combination falls back to the full stack
        return 0;
    }
    let s = (stack.iter().map(|e| (e.value - m).powi(2)).sum::<f64>() / m / (n0 - 1) as f64).sqrt();
    for _ in 0..p.max_iterations {
        let sigma = s * m.sqrt();
        let nc = reject_inward(stack, &mut w, m, sigma, sigma, p.low, p.high, sides);
        if nc == 0 || w.len() < 3 {
            break;
        }
        m = window_median(stack, &w);
    }
    if w.len() < n0 {
        sort_stack(stack);
    }
    w.len()
}

/// Noise model of a CCD sensor in normalized [0, 1] units.
#[derive(Clone, Copy, Debug)]
struct CcdModel {
    read: f64,
    gain: f64,
    scale: f64,
}

impl CcdModel {
    fn new(p: &CcdParams) -> Self {
        let n = ((1u64 << CCD_CLIP_BITS) - 1) as f64;
        let r = p.read_noise / p.gain;
        Self {
            read: r * r / n,
            gain: 1.0 / p.gain / n,
            scale: p.scale_noise * p.scale_noise / n,
        }
    }

    fn sigma(&self, m: f64) -> f64 {
        (self.read + self.gain * m + self.scale * m * m).sqrt()
    }
}

/// Sigma clipping with sigma predicted from gain, read noise and scale noise.
pub fn ccd_clip(stack: &mut [StackEntry], sides: Sides, p: &CcdParams) -> usize {
    let n0 = stack.len();
    if n0 < 2 {
        return n0;
    }
    let model = CcdModel::new(p);
    let mut w = 0..n0;
    loop {
        let m = window_median(stack, &w);
        let sigma = model.sigma(m);
        let nc = reject_inward(stack, &mut w, m, sigma, sigma, p.low, p.high, sides);
        if nc == 0 || w.len() < 2 {
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
    fn single_outlier_in_flat_stack() {
        let mut stack = stack_of(&[0.5, 0.5, 0.5, 1.0, 0.5, 0.5]);
        let n = sigma_clip(&mut stack, Sides::BOTH, &SigmaParams::default());
        assert_eq!(n, 5);
        assert_eq!(rejected_indices(&stack), vec![3]);
        assert!(stack[5].reject_high);
    }

    #[test]
    fn small_gaussian_stacks_are_kept() {
        let mut stack = stack_of(&[0.485, 0.495, 0.505, 0.515]);
        assert_eq!(sigma_clip(&mut stack, Sides::BOTH, &SigmaParams::default()), 4);
        assert!(rejected_indices(&stack).is_empty());
    }

    #[test]
    fn constant_stack_is_untouched() {
        let mut stack = stack_of(&[0.2; 7]);
        assert_eq!(sigma_clip(&mut stack, Sides::BOTH, &SigmaParams::default()), 7);
        assert_eq!(averaged_sigma_clip(&mut stack, Sides::BOTH, &SigmaParams::default()), 7);
    }

    #[test]
    fn high_only_keeps_low_outlier() {
        let mut values = vec![0.0];
        for _ in 0..3 {
            values.extend([0.48, 0.49, 0.5, 0.51, 0.52]);
        }
        values.push(5.0);
        let mut stack = stack_of(&values);
        let sides = Sides { low: false, high: true };
        let n = sigma_clip(&mut stack, sides, &SigmaParams::default());
        assert_eq!(rejected_indices(&stack), vec![16]);
        assert_eq!(n, 16);
    }

    #[test]
    fn ccd_clip_rejects_cosmic_ray() {
        let p = CcdParams {
            gain: 1.0,
            read_noise: 5.0,
            ..CcdParams::default()
        };
        let mut stack = stack_of(&[0.100, 0.101, 0.099, 0.100, 0.9]);
        let n = ccd_clip(&mut stack, Sides::BOTH, &p);
        assert_eq!(n, 4);
        assert_eq!(rejected_indices(&stack), vec![4]);
    }
}
