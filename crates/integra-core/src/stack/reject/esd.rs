use super::{median_of, Sides};
use crate::math::distributions::EsdLambdaCache;
use crate::math::stats::{is_insignificant, median_sorted, stddev, trimmed_mean};
use crate::pipeline::config::EsdParams;
use crate::stack::{sort_stack, StackEntry};

/// Generalized extreme Studentized deviate rejection.
///
/// Computes up to `k` test statistics on a trimmed-mean center, removing the
/// most deviant sample after each one, then rejects the longest prefix of
/// statistics that exceed their critical values. Low deviations are divided
/// by a relaxed sigma.
pub fn esd_clip(stack: &mut [StackEntry], sides: Sides, p: &EsdParams, lambda: &mut EsdLambdaCache) -> usize {
    let n = stack.len();
    if n < 3 {
        return n;
    }
    let k = ((p.outliers_fraction * n as f64) as usize).clamp(1, n - 2);

    // (value, position in stack), kept ascending
    let mut x: Vec<(f64, usize)> = stack.iter().enumerate().map(|(i, e)| (e.value, i)).collect();
    let mut values: Vec<f64> = Vec::with_capacity(n);
    let mut tests: Vec<(f64, usize)> = Vec::with_capacity(k);
    for i in 0..k {
        let nx = x.len();
        values.clear();
        values.extend(x.iter().map(|t| t.0));
        let th = ((p.outliers_fraction * nx as f64) as usize).saturating_sub(i).max(1);
        let tl = ((p.outliers_fraction / p.low_relaxation * nx as f64) as usize)
            .saturating_sub(i)
            .max(1);
        let m = if th + tl + 2 < nx {
            trimmed_mean(&values, tl, th)
        } else {
            median_sorted(&values)
        };
        let sh = stddev(&values, m);
        if is_insignificant(sh) {
            break;
        }
        let sl = p.low_relaxation * sh;

        let mut imax = 0;
        let mut rmax = f64::NEG_INFINITY;
        for (j, &v) in values.iter().enumerate() {
            let d = v - m;
            let r = if d >= 0.0 { d / sh } else { -d / sl };
            if r > rmax {
                rmax = r;
                imax = j;
            }
        }
        tests.push((rmax, x[imax].1));
        x.remove(imax);
    }

    let nc = tests
        .iter()
        .enumerate()
        .take_while(|&(t, &(r, _))| r >= lambda.get(n, t))
        .count();
    if nc == 0 {
        return n;
    }

    let median = median_of(stack);
    let mut rejected = 0;
    for &(_, j) in &tests[..nc] {
        let e = &mut stack[j];
        if e.value > median {
            if sides.high {
                e.reject_high = true;
                rejected += 1;
            }
        } else if sides.low {
            e.reject_low = true;
            rejected += 1;
        }
    }
    if rejected > 0 {
        sort_stack(stack);
    }
    n - rejected
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{rejected_indices, stack_of};
    use super::*;

    fn params() -> EsdParams {
        EsdParams {
            outliers_fraction: 0.3,
            alpha: 0.05,
            low_relaxation: 1.0,
        }
    }

    #[test]
    fn detects_two_high_outliers() {
        let mut values = vec![0.400, 0.402, 0.398, 0.401, 0.399, 0.400, 0.403, 0.397, 0.401, 0.399];
        values.push(0.8);
        values.push(0.75);
        let mut stack = stack_of(&values);
        let mut lambda = EsdLambdaCache::new(0.05);
        let n = esd_clip(&mut stack, Sides::BOTH, &params(), &mut lambda);
        assert_eq!(n, 10);
        assert_eq!(rejected_indices(&stack), vec![10, 11]);
    }

    #[test]
    fn constant_stack_has_no_outliers() {
        let mut stack = stack_of(&[0.3; 9]);
        let mut lambda = EsdLambdaCache::new(0.05);
        assert_eq!(esd_clip(&mut stack, Sides::BOTH, &params(), &mut lambda), 9);
    }
}
