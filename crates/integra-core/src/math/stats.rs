use serde::{Deserialize, Serialize};

use crate::consts::{
    BWMV_K, EPSILON, IKSS_ACCURACY, IKSS_K, IKSS_NORMAL, SN_NORMAL, WINSORIZATION_ACCURACY,
    WINSORIZATION_CLAMP, WINSORIZED_SIGMA_NORMAL,
};

/// A dispersion estimate computed separately below and above the location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoSided {
    pub low: f64,
    pub high: f64,
}

impl TwoSided {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn splat(v: f64) -> Self {
        Self { low: v, high: v }
    }

    pub fn mean(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            low: f(self.low),
            high: f(self.high),
        }
    }

    pub fn is_significant(&self) -> bool {
        1.0 + self.low != 1.0 && 1.0 + self.high != 1.0
    }
}

/// True when `x` cannot be told apart from zero at unit scale.
pub fn is_insignificant(x: f64) -> bool {
    1.0 + x == 1.0
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation about `center`, two-pass corrected.
///
/// Returns zero for fewer than two values.
pub fn stddev(values: &[f64], center: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mut var = 0.0;
    let mut eps = 0.0;
    for &v in values {
        let d = v - center;
        var += d * d;
        eps += d;
    }
    ((var - eps * eps / n as f64) / (n - 1) as f64).max(0.0).sqrt()
}

/// Median of an ascending slice.
pub fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let mid = n / 2;
    if n % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Median computed in place with `select_nth_unstable`.
pub fn median(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return values[0];
    }
    let mid = n / 2;
    let upper = *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1;
    if n % 2 == 1 {
        upper
    } else {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        (lower + upper) / 2.0
    }
}

/// Median absolute deviation about `center` (not normalized).
pub fn mad(values: &[f64], center: f64) -> f64 {
    let mut d: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&mut d)
}

/// Average absolute deviation about `center`.
pub fn avg_dev(values: &[f64], center: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - center).abs()).sum::<f64>() / values.len() as f64
}

/// Split an ascending slice at `center` into (values <= center, values > center).
fn split_sides(sorted: &[f64], center: f64) -> (&[f64], &[f64]) {
    let k = sorted.partition_point(|&v| v <= center);
    (&sorted[..k], &sorted[k..])
}

pub fn two_sided_avg_dev(sorted: &[f64], center: f64) -> TwoSided {
    let (lo, hi) = split_sides(sorted, center);
    TwoSided::new(avg_dev(lo, center), avg_dev(hi, center))
}

pub fn two_sided_mad(sorted: &[f64], center: f64) -> TwoSided {
    let (lo, hi) = split_sides(sorted, center);
    TwoSided::new(mad(lo, center), mad(hi, center))
}

/// Biweight midvariance about `center` with MAD scale `mad`.
pub fn bwmv(values: &[f64], center: f64, mad: f64) -> f64 {
    let kd = BWMV_K * mad;
    if is_insignificant(kd) {
        return 0.0;
    }
    let mut num = 0.0;
    let mut den = 0.0;
    for &x in values {
        let d = x - center;
        let y = d / kd;
        let y2 = y * y;
        if y2 < 1.0 {
            let y21 = 1.0 - y2;
            num += d * d * y21 * y21 * y21 * y21;
            den += y21 * (1.0 - 5.0 * y2);
        }
    }
    den *= den;
    if is_insignificant(den) {
        return 0.0;
    }
    values.len() as f64 * num / den
}

pub fn two_sided_bwmv(sorted: &[f64], center: f64, mad: TwoSided) -> TwoSided {
    let (lo, hi) = split_sides(sorted, center);
    TwoSided::new(bwmv(lo, center, mad.low), bwmv(hi, center, mad.high))
}

/// Rousseeuw-Croux Sn scale estimator, normalized to a Gaussian sigma.
///
/// Quadratic in the sample size; meant for pixel stacks.
pub fn sn(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mut inner = Vec::with_capacity(n);
    let mut outer = Vec::with_capacity(n);
    for &xi in values {
        inner.clear();
        inner.extend(values.iter().map(|&xj| (xi - xj).abs()));
        // high median
        let k = n / 2;
        let hm = *inner.select_nth_unstable_by(k, |a, b| a.total_cmp(b)).1;
        outer.push(hm);
    }
    // low median
    let k = (n + 1) / 2 - 1;
    let lm = *outer.select_nth_unstable_by(k, |a, b| a.total_cmp(b)).1;
    SN_NORMAL * lm
}

/// Huber winsorization of a stack.
///
/// Returns the robust (mean, sigma). With `cutoff`, samples farther than
/// `cutoff` sigmas from the current mean are replaced by the mean in the first
/// iteration instead of being clamped.
pub fn winsorized_mean_sigma(values: &[f64], cutoff: Option<f64>) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut m = median_sorted(&sorted);
    let mut s = sn(&sorted);
    let mut w = vec![0.0; sorted.len()];

    for it in 0..crate::consts::MAX_REJECTION_ITERATIONS {
        if s < EPSILON {
            break;
        }
        let t0 = m - WINSORIZATION_CLAMP * s;
        let t1 = m + WINSORIZATION_CLAMP * s;
        let (c0, c1) = match cutoff {
            Some(c) if it == 0 => (m - c * s, m + c * s),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        };
        for (wi, &x) in w.iter_mut().zip(&sorted) {
            *wi = if x < c0 || x > c1 { m } else { x.clamp(t0, t1) };
        }
        let s0 = s;
        m = mean(&w);
        s = WINSORIZED_SIGMA_NORMAL * stddev(&w, m);
        if it > 0 && ((s - s0) / s0).abs() < WINSORIZATION_ACCURACY {
            break;
        }
    }
    (m, s)
}

/// Iterative k-sigma estimator of scale and location.
///
/// `sorted` must be ascending. Returns (location, scale).
pub fn ikss(sorted: &[f64]) -> (f64, f64) {
    let mut i = 0;
    let mut j = sorted.len();
    let mut s0 = 1.0;
    loop {
        let window = &sorted[i..j];
        if window.is_empty() {
            return (0.0, 0.0);
        }
        let m = median_sorted(window);
        let s = bwmv(window, m, mad(window, m)).sqrt();
        if is_insignificant(s) {
            return (m, 0.0);
        }
        if (s0 - s) / s0 < IKSS_ACCURACY {
            return (m, IKSS_NORMAL * s);
        }
        s0 = s;
        let v0 = m - IKSS_K * s;
        let v1 = m + IKSS_K * s;
        while i < j && sorted[i] < v0 {
            i += 1;
        }
        while j > i && sorted[j - 1] > v1 {
            j -= 1;
        }
    }
}

/// Mean of an ascending slice after dropping `low` samples from the bottom and
/// `high` samples from the top.
pub fn trimmed_mean(sorted: &[f64], low: usize, high: usize) -> f64 {
    let n = sorted.len();
    if low + high >= n {
        return median_sorted(sorted);
    }
    mean(&sorted[low..n - high])
}
