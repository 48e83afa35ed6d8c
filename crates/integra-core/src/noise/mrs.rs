use ndarray::Array2;

use crate::consts::{
    B3_NOISE_KJ, MRS_ACCURACY, MRS_MAX_ITERATIONS, NOISE_K, NOISE_RANGE_HIGH, NOISE_RANGE_LOW,
};
use crate::math::stats::{mean, stddev};
use crate::transform::atrous::decompose;

/// Result of one multiresolution support noise evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MrsEstimate {
    pub sigma: f64,
    /// Number of pixels classified as pure noise.
    pub noise_pixels: usize,
}

/// Multiresolution support noise estimate with `num_layers` wavelet layers.
///
/// A pixel belongs to the noise set when none of its wavelet coefficients is
/// significant at `NOISE_K` times the expected noise of its layer. The noise
/// is the standard deviation of the detail (image minus residual) over that
/// set, iterated from `seed` until it stabilizes.
pub fn mrs_noise(image: &Array2<f32>, num_layers: usize, seed: f64) -> MrsEstimate {
    let num_layers = num_layers.clamp(1, B3_NOISE_KJ.len());
    let (layers, residual) = decompose(image, num_layers);
    let detail = image - &residual;

    let mut sigma = seed;
    let mut noise_pixels = 0;
    let mut samples = Vec::with_capacity(image.len());
    for _ in 0..MRS_MAX_ITERATIONS {
        samples.clear();
        for ((idx, &v), &d) in image.indexed_iter().zip(detail.iter()) {
            let v = v as f64;
            if v <= NOISE_RANGE_LOW || v >= NOISE_RANGE_HIGH {
                continue;
            }
            let significant = layers
                .iter()
                .zip(B3_NOISE_KJ.iter())
                .any(|(layer, &kj)| (layer[idx] as f64).abs() >= NOISE_K * sigma * kj);
            if !significant {
                samples.push(d as f64);
            }
        }
        noise_pixels = samples.len();
        if noise_pixels < 2 {
            return MrsEstimate {
                sigma: 0.0,
                noise_pixels,
            };
        }
        let s = stddev(&samples, mean(&samples));
        if s <= 0.0 {
            return MrsEstimate {
                sigma: 0.0,
                noise_pixels,
            };
        }
        let converged = ((sigma - s) / s).abs() < MRS_ACCURACY;
        sigma = s;
        if converged {
            break;
        }
    }
    MrsEstimate { sigma, noise_pixels }
}
