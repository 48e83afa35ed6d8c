use super::stats::median;

/// Straight line `y = a + b·x` fitted by least absolute deviation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub a: f64,
    pub b: f64,
    /// Mean absolute deviation of the residuals.
    pub adev: f64,
}

impl LinearFit {
    /// Fit a line minimizing Σ|y − a − b·x|.
    ///
    /// Starts from the least squares solution and brackets the root of the
    /// L1 normal equation in `b`. Returns `None` when the fit is degenerate or
    /// not finite.
    pub fn fit(x: &[f64], y: &[f64]) -> Option<Self> {
        let n = x.len();
        if n < 2 || y.len() != n {
            return None;
        }
        let nf = n as f64;
        let (mut sx, mut sy, mut sxy, mut sxx) = (0.0, 0.0, 0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            sx += xi;
            sy += yi;
            sxy += xi * yi;
            sxx += xi * xi;
        }
        let del = nf * sxx - sx * sx;
        if del == 0.0 {
            return None;
        }
        let a_ls = (sxx * sy - sx * sxy) / del;
        let b_ls = (nf * sxy - sx * sy) / del;
        let chisq: f64 = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| {
                let r = yi - (a_ls + b_ls * xi);
                r * r
            })
            .sum();
        let mut sigb = (chisq / del).sqrt();

        let mut scratch = vec![0.0; n];
        let mut b1 = b_ls;
        let mut f1 = l1_slope_residual(x, y, b1, &mut scratch);
        let mut best = f1;

        if sigb > 0.0 {
            let mut b2 = b_ls + (3.0 * sigb).copysign(f1.0);
            let mut f2 = l1_slope_residual(x, y, b2, &mut scratch);
            if b2 == b1 {
                return Self::finish(f1.1, b1, f1.2, nf);
            }
            let mut guard = 0;
            while f1.0 * f2.0 > 0.0 {
                let bb = b2 + 1.6 * (b2 - b1);
                b1 = b2;
                f1 = f2;
                b2 = bb;
                f2 = l1_slope_residual(x, y, b2, &mut scratch);
                guard += 1;
                if guard > 64 {
                    return None;
                }
            }
            sigb *= 0.01;
            best = f2;
            let mut bb = b2;
            while (b2 - b1).abs() > sigb {
                bb = b1 + 0.5 * (b2 - b1);
                if bb == b1 || bb == b2 {
                    break;
                }
                let f = l1_slope_residual(x, y, bb, &mut scratch);
                if f.0 * f1.0 >= 0.0 {
                    f1 = f;
                    b1 = bb;
                } else {
                    b2 = bb;
                }
                best = f;
            }
            return Self::finish(best.1, bb, best.2, nf);
        }
        Self::finish(best.1, b1, best.2, nf)
    }

    fn finish(a: f64, b: f64, abdev: f64, n: f64) -> Option<Self> {
        let fit = Self {
            a,
            b,
            adev: abdev / n,
        };
        (fit.a.is_finite() && fit.b.is_finite() && fit.adev.is_finite()).then_some(fit)
    }

    pub fn at(&self, x: f64) -> f64 {
        self.a + self.b * x
    }
}

/// For slope `b`: (Σ x·sign(residual), intercept, Σ|residual|).
fn l1_slope_residual(x: &[f64], y: &[f64], b: f64, scratch: &mut [f64]) -> (f64, f64, f64) {
    for ((s, &xi), &yi) in scratch.iter_mut().zip(x).zip(y) {
        *s = yi - b * xi;
    }
    let a = median(scratch);
    let mut sum = 0.0;
    let mut abdev = 0.0;
    for (&xi, &yi) in x.iter().zip(y) {
        let d = yi - (b * xi + a);
        abdev += d.abs();
        if d > 0.0 {
            sum += xi;
        } else if d < 0.0 {
            sum -= xi;
        }
    }
    (sum, a, abdev)
}
