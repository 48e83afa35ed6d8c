mod common;

use std::sync::Arc;

use ndarray::Array2;

use common::{frames, noisy_plane, plain_config, Rng};
use integra_core::cancel::CancelToken;
use integra_core::noise::{evaluate_channel, evaluate_noise_mrs, ksigma_noise, snr};
use integra_core::pipeline::config::{NoiseAlgorithm, OutputConfig};
use integra_core::pipeline::{integrate_frames, ProgressReporter};

struct Silent;
impl ProgressReporter for Silent {}

#[test]
fn test_ksigma_recovers_white_noise() {
    let mut rng = Rng::new(17);
    let image = noisy_plane(256, 256, 0.3, 0.01, &mut rng);
    let sigma = ksigma_noise(&image);
    assert!((sigma - 0.01).abs() / 0.01 < 0.15, "{sigma}");
}

#[test]
fn test_mrs_recovers_white_noise() {
    let mut rng = Rng::new(19);
    let image = noisy_plane(256, 256, 0.3, 0.02, &mut rng);
    let est = evaluate_noise_mrs(&image, 0.01);
    assert_eq!(est.algorithm, NoiseAlgorithm::Mrs);
    assert!((est.sigma - 0.02).abs() / 0.02 < 0.15, "{}", est.sigma);
    assert!(est.fraction > 0.5);
}

#[test]
fn test_snr_scales_with_noise() {
    let mut rng = Rng::new(23);
    let image = noisy_plane(64, 64, 0.4, 0.01, &mut rng);
    let a = snr(&image, 0.01);
    let b = snr(&image, 0.02);
    assert!((a / b - 4.0).abs() < 1e-9);
    assert_eq!(snr(&image, 0.0), 0.0);
}

#[test]
fn test_channel_evaluation_with_ksigma() {
    let mut rng = Rng::new(29);
    let image = noisy_plane(128, 128, 0.25, 0.01, &mut rng);
    let output = OutputConfig {
        noise_algorithm: NoiseAlgorithm::KSigma,
        ..OutputConfig::default()
    };
    let eval = evaluate_channel(&image, 0, &output);
    assert!(!eval.fallback);
    assert!(eval.psf.is_none());
    assert!((eval.ikss_location - 0.25).abs() < 1e-3);
    assert!((eval.ikss_scale - 0.01).abs() / 0.01 < 0.1);
}

#[test]
fn test_averaging_nine_frames_reduces_noise_threefold() {
    let mut rng = Rng::new(31);
    let planes: Vec<Array2<f32>> = (0..9)
        .map(|_| {
            let noise = noisy_plane(128, 128, 0.0, 0.01, &mut rng);
            Array2::from_shape_fn((128, 128), |(y, x)| 0.2 + 0.5 * x as f32 / 127.0 + noise[[y, x]])
        })
        .collect();

    let mut config = plain_config();
    config.output.evaluate_noise = true;
    config.output.noise_algorithm = NoiseAlgorithm::KSigma;
    let result = integrate_frames(frames(planes), &config, &CancelToken::new(), Arc::new(Silent)).unwrap();

    let eval = &result.report.evaluation[0];
    let reduction = eval.noise_reduction.unwrap();
    assert!((2.3..3.8).contains(&reduction.reference), "{reduction:?}");
    assert!((2.3..3.8).contains(&reduction.median), "{reduction:?}");
}
