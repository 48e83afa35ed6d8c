use std::f64::consts::FRAC_PI_4;

use super::{values_of, Sides};
use crate::math::fit::LinearFit;
use crate::math::stats::is_insignificant;
use crate::pipeline::config::LinearFitParams;
use crate::stack::{sort_stack, StackEntry};

/// Slope of a converged fit mapped to [0, 1], one for vertical lines.
fn normalized_slope(b: f64) -> f32 {
    if b > 0.0 {
        if b < 1.0e7 {
            (b.atan() / FRAC_PI_4) as f32
        } else {
            1.0
        }
    } else {
        // roundoff can leave a tiny negative slope on flat stacks
        0.0
    }
}

/// Reject entries far from a straight line fitted to the sorted stack.
///
/// Returns the surviving count and the normalized slope of the final fit,
/// zero when the iteration did not converge on an outlier-free fit.
pub fn linear_fit_clip(stack: &mut [StackEntry], sides: Sides, p: &LinearFitParams) -> (usize, f32) {
    let mut n = stack.len();
    if n < 5 {
        return (n, 0.0);
    }
    let mut slope = 0.0;
    loop {
        let x: Vec<f64> = (0..n).map(|j| j as f64).collect();
        let y = values_of(&stack[..n]);
        let Some(fit) = LinearFit::fit(&x, &y) else {
            for e in stack[..n].iter_mut() {
                e.reject_low = true;
                e.reject_high = true;
            }
            return (0, 0.0);
        };
        let s = 2.0 * fit.adev * (1.0 + fit.b * fit.b).sqrt();
        if is_insignificant(s) {
            break;
        }

        let mut nc = 0;
        for (j, e) in stack[..n].iter_mut().enumerate() {
            let yf = fit.at(j as f64);
            if e.value < yf {
                if sides.low && (yf - e.value) / s >= p.low {
                    e.reject_low = true;
                    nc += 1;
                }
            } else if sides.high && (e.value - yf) / s >= p.high {
                e.reject_high = true;
                nc += 1;
            }
        }
        if nc == 0 {
            slope = normalized_slope(fit.b);
            break;
        }
        sort_stack(stack);
        n -= nc;
        if n < 3 {
            break;
        }
    }
    (n, slope)
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{rejected_indices, stack_of};
    use super::*;

    #[test]
    fn gradient_stack_keeps_all_and_reports_slope() {
        let values: Vec<f64> = (0..8).map(|i| 0.1 + 0.01 * i as f64 + 0.0005 * ((i * 5) % 3) as f64).collect();
        let mut stack = stack_of(&values);
        let (n, slope) = linear_fit_clip(&mut stack, Sides::BOTH, &LinearFitParams::default());
        assert_eq!(n, 8);
        assert!(slope > 0.0 && slope < 0.02);
    }

    #[test]
    fn outlier_off_the_line_is_rejected() {
        let mut values: Vec<f64> = (0..9).map(|i| 0.2 + 0.001 * i as f64 + 0.0002 * ((i * 7) % 3) as f64).collect();
        values.push(0.9);
        let mut stack = stack_of(&values);
        let (n, _) = linear_fit_clip(&mut stack, Sides::BOTH, &LinearFitParams::default());
        assert_eq!(n, 9);
        assert_eq!(rejected_indices(&stack), vec![9]);
    }

    #[test]
    fn small_stack_is_skipped() {
        let mut stack = stack_of(&[0.1, 0.2, 0.9, 0.3]);
        assert_eq!(linear_fit_clip(&mut stack, Sides::BOTH, &LinearFitParams::default()), (4, 0.0));
    }
}
