use ndarray::Array2;

use crate::consts::{
    B3_NOISE_KJ, KSIGMA_ACCURACY, KSIGMA_MAX_ITERATIONS, NOISE_K, NOISE_RANGE_HIGH, NOISE_RANGE_LOW,
};
use crate::math::stats::{is_insignificant, mean, stddev};
use crate::transform::atrous::atrous_convolve;

fn in_noise_range(v: f32) -> bool {
    let v = v as f64;
    v > NOISE_RANGE_LOW && v < NOISE_RANGE_HIGH
}

/// Iterative k-sigma clipped standard deviation of a wavelet layer, using
/// only pixels whose image value lies inside the noise evaluation range.
pub fn ksigma_layer_sigma(layer: &Array2<f32>, image: &Array2<f32>, k: f64) -> f64 {
    let mut coeffs: Vec<f64> = layer
        .iter()
        .zip(image.iter())
        .filter(|&(_, &v)| in_noise_range(v))
        .map(|(&w, _)| w as f64)
        .collect();

    let mut sigma = 0.0;
    for _ in 0..KSIGMA_MAX_ITERATIONS {
        if coeffs.len() < 2 {
            break;
        }
        let s = stddev(&coeffs, mean(&coeffs));
        if is_insignificant(s) {
            return 0.0;
        }
        let converged = sigma > 0.0 && ((sigma - s) / s).abs() < KSIGMA_ACCURACY;
        sigma = s;
        if converged {
            break;
        }
        let limit = k * s;
        coeffs.retain(|w| w.abs() < limit);
    }
    sigma
}

/// K-sigma noise estimate of an image: clipped standard deviation of the
/// first B3 spline wavelet layer, scaled to image units.
pub fn ksigma_noise(image: &Array2<f32>) -> f64 {
    let layer0 = image - &atrous_convolve(image, 0);
    ksigma_layer_sigma(&layer0, image, NOISE_K) / B3_NOISE_KJ[0]
}
