pub mod ksigma;
pub mod mrs;
pub mod psf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consts::{MRS_MAX_LAYERS, MRS_MIN_LAYERS, SNR_HIGH, STATS_RANGE_HIGH, STATS_RANGE_LOW};
use crate::math::stats::{ikss, is_insignificant, median};
use crate::pipeline::config::{NoiseAlgorithm, OutputConfig};

pub use ksigma::ksigma_noise;
pub use mrs::{mrs_noise, MrsEstimate};
pub use psf::{estimate_psf_signal, PsfSignal};

/// Noise estimate of one channel and how it was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseEstimate {
    pub sigma: f64,
    /// Fraction of pixels in the noise set (MRS only, 0 otherwise).
    pub fraction: f64,
    pub algorithm: NoiseAlgorithm,
    /// Wavelet layers at which MRS converged.
    pub layers: Option<usize>,
}

/// MRS noise evaluation with automatic layer selection.
///
/// Tries 4 down to 2 layers, accepting the first estimate that is positive
/// and backed by at least `min_data_fraction` of the pixels. Falls back to
/// the k-sigma estimate otherwise.
pub fn evaluate_noise_mrs(image: &Array2<f32>, min_data_fraction: f64) -> NoiseEstimate {
    let seed = ksigma_noise(image);
    let pixels = image.len().max(1);
    let min_pixels = (min_data_fraction * pixels as f64) as usize;
    for layers in (MRS_MIN_LAYERS..=MRS_MAX_LAYERS).rev() {
        let est = mrs_noise(image, layers, seed);
        if est.sigma > 0.0 && est.noise_pixels >= min_pixels {
            return NoiseEstimate {
                sigma: est.sigma,
                fraction: est.noise_pixels as f64 / pixels as f64,
                algorithm: NoiseAlgorithm::Mrs,
                layers: Some(layers),
            };
        }
    }
    NoiseEstimate {
        sigma: seed,
        fraction: 0.0,
        algorithm: NoiseAlgorithm::KSigma,
        layers: None,
    }
}

/// Signal-to-noise ratio: mean square of samples in (0, 0.85) over the
/// noise variance.
pub fn snr(image: &Array2<f32>, noise: f64) -> f64 {
    if noise <= 0.0 {
        return 0.0;
    }
    let (sum, n) = image
        .iter()
        .map(|&v| v as f64)
        .filter(|&v| v > 0.0 && v < SNR_HIGH)
        .fold((0.0, 0usize), |(s, n), v| (s + v * v, n + 1));
    if n == 0 {
        return 0.0;
    }
    sum / n as f64 / (noise * noise)
}

/// IKSS location and scale of an image over the statistics sample range.
pub fn ikss_estimates(image: &Array2<f32>) -> (f64, f64) {
    let mut samples: Vec<f64> = image
        .iter()
        .map(|&v| v as f64)
        .filter(|&v| v > STATS_RANGE_LOW && v < STATS_RANGE_HIGH)
        .collect();
    samples.sort_by(|a, b| a.total_cmp(b));
    ikss(&samples)
}

/// Input noise over result noise, with each input brought to the scale of
/// the result through its IKSS scale estimate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseReduction {
    /// Reduction relative to the reference (first) frame.
    pub reference: f64,
    /// Median of the reductions relative to every frame.
    pub median: f64,
}

/// Noise reduction of a result with `noise` and IKSS `scale`, given the
/// (noise, IKSS scale) pair of each input frame in file order.
pub fn noise_reduction(noise: f64, scale: f64, inputs: &[(f64, f64)]) -> Option<NoiseReduction> {
    if inputs.is_empty() || noise <= 0.0 || is_insignificant(scale) {
        return None;
    }
    let mut ratios: Vec<f64> = inputs
        .iter()
        .map(|&(input_noise, input_scale)| input_noise / (noise * input_scale / scale))
        .collect();
    let reference = ratios[0];
    Some(NoiseReduction {
        reference,
        median: median(&mut ratios),
    })
}

/// Noise and signal evaluation of one channel of an integrated image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvaluation {
    pub noise: NoiseEstimate,
    pub snr: f64,
    pub ikss_location: f64,
    pub ikss_scale: f64,
    pub psf: Option<PsfSignal>,
    pub noise_reduction: Option<NoiseReduction>,
    /// Set when the selected algorithm did not produce an estimate and a
    /// fallback was used.
    pub fallback: bool,
}

/// Evaluate noise, SNR, IKSS estimates and (for N*) PSF signal of one channel.
pub fn evaluate_channel(image: &Array2<f32>, channel: usize, output: &OutputConfig) -> ChannelEvaluation {
    let mut psf = None;
    let mut fallback = false;
    let noise = match output.noise_algorithm {
        NoiseAlgorithm::KSigma => NoiseEstimate {
            sigma: ksigma_noise(image),
            fraction: 0.0,
            algorithm: NoiseAlgorithm::KSigma,
            layers: None,
        },
        NoiseAlgorithm::Mrs => {
            let est = evaluate_noise_mrs(image, output.mrs_min_data_fraction);
            if est.algorithm != NoiseAlgorithm::Mrs {
                warn!(channel, "no convergence in MRS noise evaluation, using k-sigma noise estimate");
                fallback = true;
            }
            est
        }
        NoiseAlgorithm::NStar => {
            let signal = estimate_psf_signal(image, output.psf_type, output.structure_layers);
            psf = Some(signal);
            if signal.stars > 0 && signal.n_star > 0.0 {
                NoiseEstimate {
                    sigma: signal.n_star,
                    fraction: 0.0,
                    algorithm: NoiseAlgorithm::NStar,
                    layers: None,
                }
            } else {
                warn!(channel, "no stars measured for N* noise, using MRS noise estimate");
                fallback = true;
                evaluate_noise_mrs(image, output.mrs_min_data_fraction)
            }
        }
    };

    let (ikss_location, ikss_scale) = ikss_estimates(image);
    ChannelEvaluation {
        noise,
        snr: snr(image, noise.sigma),
        ikss_location,
        ikss_scale,
        psf,
        noise_reduction: None,
        fallback,
    }
}
