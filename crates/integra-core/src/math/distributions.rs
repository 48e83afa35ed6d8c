use std::collections::HashMap;

/// Natural logarithm of the gamma function (Lanczos approximation).
pub fn ln_gamma(x: f64) -> f64 {
    const COF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

/// Continued fraction of the incomplete beta function (modified Lentz).
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    const MAX_IT: usize = 300;
    const EPS: f64 = 3.0e-14;
    const FPMIN: f64 = 1.0e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < FPMIN {
        d = FPMIN;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=MAX_IT {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = 1.0 + aa / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Regularized incomplete beta function I_x(a, b).
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let bt = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        bt * beta_cf(a, b, x) / a
    } else {
        1.0 - bt * beta_cf(b, a, 1.0 - x) / b
    }
}

/// Cumulative distribution function of Student's t with `nu` degrees of freedom.
pub fn t_cdf(nu: f64, t: f64) -> f64 {
    let p = incomplete_beta(nu / 2.0, 0.5, nu / (nu + t * t)) / 2.0;
    if t < 0.0 {
        p
    } else {
        1.0 - p
    }
}

/// Upper percentile of Student's t: the `t` such that P(T > t) = `x`.
///
/// Adaptive bisection on the CDF; `x` outside [0, 0.5) yields zero.
pub fn t_upper_percentile(nu: f64, x: f64) -> f64 {
    const EPS: f64 = 1.0e-9;
    const MAX_IT: usize = 1000;

    let x = x.abs();
    if x >= 0.5 {
        return 0.0;
    }
    let mut l = 0.0;
    let mut h = 50.0;
    let mut p = 0.0;
    for _ in 0..MAX_IT {
        p = (l + h) / 2.0;
        let c = 1.0 - t_cdf(nu, p);
        if (c - x).abs() < EPS {
            return p;
        }
        if c < x {
            h = p;
            if h - l < 2.0 * f64::EPSILON {
                return 0.0;
            }
        } else {
            l = p;
            if h - l < 1.0e-8 {
                h *= 2.0;
            }
        }
    }
    p
}

/// Critical value of the generalized ESD test for test index `i` (0-based)
/// on a sample of length `n` at significance `alpha`, two-tailed.
pub fn esd_lambda(n: usize, i: usize, alpha: f64) -> f64 {
    let ni = (n - i) as f64;
    let p = alpha / 2.0 / ni;
    let t = t_upper_percentile(ni - 2.0, p);
    t * (ni - 1.0) / ((ni - 2.0 + t * t) * ni).sqrt()
}

/// Memoized ESD critical values for one significance level.
///
/// One cache lives per worker; the values only depend on (n, i).
#[derive(Debug)]
pub struct EsdLambdaCache {
    alpha: f64,
    cache: HashMap<(usize, usize), f64>,
}

impl EsdLambdaCache {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, n: usize, i: usize) -> f64 {
        let alpha = self.alpha;
        *self
            .cache
            .entry((n, i))
            .or_insert_with(|| esd_lambda(n, i, alpha))
    }
}

/// Complementary error function, fractional error below 1.2e-7.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
            .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}
