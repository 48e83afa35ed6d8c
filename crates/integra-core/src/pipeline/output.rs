use ndarray::Array2;
use num_traits::{Float, FromPrimitive};
use tracing::info;

use crate::pipeline::config::OutputRange;

/// Sample types the integrated image can be stored as.
pub trait OutputSample: Float + FromPrimitive + Send + Sync + 'static {}
impl OutputSample for f32 {}
impl OutputSample for f64 {}

/// Narrow an accumulated f64 to the output sample type, saturating at the
/// representable range. The flag is set when saturation happened.
pub fn narrow<T: OutputSample>(v: f64) -> (T, bool) {
    let max = T::max_value().to_f64().unwrap_or(f64::MAX);
    if v > max {
        (T::max_value(), true)
    } else if v < -max {
        (T::min_value(), true)
    } else {
        (T::from_f64(v).unwrap_or_else(T::nan), false)
    }
}

fn extremes<T: OutputSample>(planes: &[Array2<T>]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for v in planes.iter().flat_map(|p| p.iter()) {
        let v = v.to_f64().unwrap_or(f64::NAN);
        if v.is_finite() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if lo > hi {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

fn finalize_planes<T: OutputSample>(planes: &mut [Array2<T>], mode: OutputRange) -> (f64, f64) {
    let (lo, hi) = extremes(planes);
    if lo >= 0.0 && hi <= 1.0 {
        return (lo, hi);
    }
    let zero = T::zero();
    let one = T::one();
    let cast = |v: f64| T::from_f64(v).unwrap_or(one);
    let rescale = mode == OutputRange::Rescale && lo < 0.0;
    info!(low = lo, high = hi, mode = %mode, "output out of range");
    for p in planes.iter_mut() {
        match mode {
            OutputRange::Truncate => p.mapv_inplace(|v| v.max(zero).min(one)),
            _ if rescale => {
                let (l, d) = (cast(lo), cast(hi - lo));
                p.mapv_inplace(|v| (v - l) / d)
            }
            _ => {
                let h = cast(hi);
                p.mapv_inplace(|v| (v / h).max(zero))
            }
        }
    }
    (lo, hi)
}

/// The integrated image, stored at 32 or 64 bits for the whole run.
#[derive(Clone, Debug, PartialEq)]
pub enum IntegratedImage {
    F32(Vec<Array2<f32>>),
    F64(Vec<Array2<f64>>),
}

impl IntegratedImage {
    pub fn new(channels: usize, height: usize, width: usize, wide: bool) -> Self {
        if wide {
            Self::F64(vec![Array2::zeros((height, width)); channels])
        } else {
            Self::F32(vec![Array2::zeros((height, width)); channels])
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::F32(p) => p.len(),
            Self::F64(p) => p.len(),
        }
    }

    /// (height, width) of each channel.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::F32(p) => p.first().map_or((0, 0), |a| a.dim()),
            Self::F64(p) => p.first().map_or((0, 0), |a| a.dim()),
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Self::F64(_))
    }

    /// Store one row. Returns true when a sample saturated.
    pub fn write_row(&mut self, channel: usize, y: usize, values: &[f64]) -> bool {
        fn store<T: OutputSample>(plane: &mut Array2<T>, y: usize, values: &[f64]) -> bool {
            let mut overflow = false;
            for (dst, &v) in plane.row_mut(y).iter_mut().zip(values) {
                let (s, o) = narrow::<T>(v);
                *dst = s;
                overflow |= o;
            }
            overflow
        }
        match self {
            Self::F32(p) => store(&mut p[channel], y, values),
            Self::F64(p) => store(&mut p[channel], y, values),
        }
    }

    pub fn get(&self, channel: usize, y: usize, x: usize) -> f64 {
        match self {
            Self::F32(p) => p[channel][[y, x]] as f64,
            Self::F64(p) => p[channel][[y, x]],
        }
    }

    /// Bring samples outside [0, 1] back into range.
    ///
    /// Returns the extreme samples found before the adjustment.
    pub fn finalize(&mut self, mode: OutputRange) -> (f64, f64) {
        match self {
            Self::F32(p) => finalize_planes(p, mode),
            Self::F64(p) => finalize_planes(p, mode),
        }
    }

    /// One channel as f32, for evaluation and writing.
    pub fn channel_f32(&self, channel: usize) -> Array2<f32> {
        match self {
            Self::F32(p) => p[channel].clone(),
            Self::F64(p) => p[channel].mapv(|v| v as f32),
        }
    }

    /// Every channel as f32.
    pub fn to_f32_planes(&self) -> Vec<Array2<f32>> {
        (0..self.channels()).map(|c| self.channel_f32(c)).collect()
    }
}

/// Fraction of rejected samples per pixel, one plane per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct RejectionFractionMaps {
    pub low: Vec<Array2<f32>>,
    pub high: Vec<Array2<f32>>,
}

impl RejectionFractionMaps {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            low: vec![Array2::zeros((height, width)); channels],
            high: vec![Array2::zeros((height, width)); channels],
        }
    }
}
