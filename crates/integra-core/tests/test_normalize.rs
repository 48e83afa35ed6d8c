mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use common::{frames, make_plane, noisy_plane, plain_config, Rng};
use integra_core::cancel::CancelToken;
use integra_core::error::IntegraError;
use integra_core::fileset::local_norm::{LocalNormalizationChannel, LocalNormalizationData};
use integra_core::fileset::surface::GridSurface;
use integra_core::pipeline::config::{
    IntegrationConfig, Normalization, Rejection, RejectionNormalization, ScaleEstimator, SigmaParams,
};
use integra_core::pipeline::{integrate_frames, IntegratedImage, ProgressReporter};

struct Silent;
impl ProgressReporter for Silent {}

fn integrate(planes: Vec<Array2<f32>>, config: &IntegrationConfig) -> IntegratedImage {
    integrate_frames(frames(planes), config, &CancelToken::new(), Arc::new(Silent))
        .unwrap()
        .image
        .unwrap()
}

fn mean_of(image: &IntegratedImage) -> f64 {
    let plane = image.channel_f32(0);
    plane.iter().map(|&v| v as f64).sum::<f64>() / plane.len() as f64
}

fn stddev_of(image: &IntegratedImage) -> f64 {
    let m = mean_of(image);
    let plane = image.channel_f32(0);
    (plane.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / plane.len() as f64).sqrt()
}

/// Frames with pedestals 0.20, 0.25, 0.30, 0.35.
fn offset_frames(rng: &mut Rng) -> Vec<Array2<f32>> {
    (0..4)
        .map(|i| noisy_plane(48, 48, 0.2 + 0.05 * i as f64, 0.005, rng))
        .collect()
}

#[test]
fn test_additive_matches_reference_level() {
    let mut rng = Rng::new(21);
    let image = integrate(offset_frames(&mut rng), &plain_config());
    assert_abs_diff_eq!(mean_of(&image), 0.2, epsilon = 1e-3);
}

#[test]
fn test_no_normalization_averages_levels() {
    let mut rng = Rng::new(21);
    let mut config = plain_config();
    config.normalization.mode = Normalization::None;
    let image = integrate(offset_frames(&mut rng), &config);
    assert_abs_diff_eq!(mean_of(&image), 0.275, epsilon = 1e-3);
}

#[test]
fn test_multiplicative_matches_reference_level() {
    let mut rng = Rng::new(4);
    let planes: Vec<Array2<f32>> = [1.0, 1.5, 2.0]
        .iter()
        .map(|&k| noisy_plane(48, 48, 0.2 * k, 0.002, &mut rng))
        .collect();
    let mut config = plain_config();
    config.normalization.mode = Normalization::Multiplicative;
    let image = integrate(planes, &config);
    assert_abs_diff_eq!(mean_of(&image), 0.2, epsilon = 1e-3);
}

#[test]
fn test_scaling_equalizes_dispersion() {
    let mut rng = Rng::new(8);
    // same level, frame 1 has twice the spread of the reference
    let planes = vec![
        noisy_plane(64, 64, 0.3, 0.01, &mut rng),
        noisy_plane(64, 64, 0.3, 0.02, &mut rng),
        noisy_plane(64, 64, 0.3, 0.01, &mut rng),
    ];
    for estimator in [ScaleEstimator::AvgDev, ScaleEstimator::Mad, ScaleEstimator::Bwmv] {
        let mut config = plain_config();
        config.normalization.mode = Normalization::AdditiveWithScaling;
        config.weights.scale_estimator = estimator;
        let image = integrate(planes.clone(), &config);
        assert_abs_diff_eq!(mean_of(&image), 0.3, epsilon = 1e-3);
        // 0.01 / sqrt(3) once frame 1 is rescaled, 0.0082 without scaling
        assert!(stddev_of(&image) < 0.0068, "{estimator}: {}", stddev_of(&image));
    }
}

// ---------------------------------------------------------------------------
// Adaptive normalization
// ---------------------------------------------------------------------------

/// Noisy horizontal gradient 0.2..0.5.
fn gradient_plane(size: usize, rng: &mut Rng) -> Array2<f64> {
    Array2::from_shape_fn((size, size), |(_, x)| {
        0.2 + 0.3 * x as f64 / (size - 1) as f64 + 0.01 * rng.gaussian()
    })
}

#[test]
fn test_adaptive_maps_affine_frames_onto_reference() {
    let mut rng = Rng::new(17);
    let base = gradient_plane(48, &mut rng);
    let planes: Vec<Array2<f32>> = [(1.0, 0.0), (1.5, -0.05), (0.8, 0.1)]
        .iter()
        .map(|&(a, b)| base.mapv(|u| (a * u + b) as f32))
        .collect();
    let mut config = plain_config();
    config.normalization.mode = Normalization::Adaptive;
    config.normalization.adaptive_grid_size = 4;
    let image = integrate(planes, &config);
    for y in (0..48).step_by(5) {
        for x in (0..48).step_by(5) {
            assert_abs_diff_eq!(image.get(0, y, x), base[[y, x]], epsilon = 1e-5);
        }
    }
}

#[test]
fn test_adaptive_without_scale_only_shifts_locations() {
    let mut rng = Rng::new(17);
    let base = gradient_plane(48, &mut rng);
    let planes: Vec<Array2<f32>> = [(1.0, 0.0), (1.5, -0.05), (1.5, -0.05)]
        .iter()
        .map(|&(a, b)| base.mapv(|u| (a * u + b) as f32))
        .collect();
    let mut config = plain_config();
    config.normalization.mode = Normalization::Adaptive;
    config.normalization.adaptive_grid_size = 4;
    config.normalization.adaptive_no_scale = true;
    let image = integrate(planes, &config);
    // locations follow the reference, so the result keeps a third of the
    // unscaled excess (u - m) of the two wider frames
    assert_abs_diff_eq!(mean_of(&image), 0.35, epsilon = 2e-3);
    let mut sum = 0.0;
    let mut n = 0;
    for y in 6..42 {
        for x in 6..42 {
            sum += (image.get(0, y, x) - base[[y, x]]).powi(2);
            n += 1;
        }
    }
    let residual = (sum / n as f64).sqrt();
    assert!((0.0025..0.0045).contains(&residual), "{residual}");
}

#[test]
fn test_adaptive_scales_each_side_separately() {
    let mut rng = Rng::new(29);
    let reference = noisy_plane(128, 128, 0.3, 0.01, &mut rng);
    // twice the spread below the background, half of it above
    let skewed = Array2::from_shape_fn((128, 128), |_| {
        let g = 0.01 * rng.gaussian();
        (0.3 + if g < 0.0 { 2.0 * g } else { 0.5 * g }) as f32
    });
    let third = noisy_plane(128, 128, 0.3, 0.01, &mut rng);
    let planes = vec![reference, skewed, third];

    let mut config = plain_config();
    config.normalization.mode = Normalization::Adaptive;
    config.normalization.adaptive_grid_size = 2;
    let split = stddev_of(&integrate(planes.clone(), &config));
    config.normalization.adaptive_no_scale = true;
    let unscaled = stddev_of(&integrate(planes, &config));
    // 0.01 / sqrt(3) when both sides are restored, 0.0064 when left as is
    assert!(split < 0.0059, "{split}");
    assert!(unscaled > 0.0062, "{unscaled}");
}

// ---------------------------------------------------------------------------
// Rejection normalization
// ---------------------------------------------------------------------------

/// Sixteen frames scaled by 1, 1/2 and 2 in turn from one dyadic pattern, so
/// every normalization recovers identical proxies. Frame 7 carries a
/// saturated pixel at (10, 10).
fn scaled_frames() -> Vec<Array2<f32>> {
    let base = Array2::from_shape_fn((48, 48), |(y, x)| 0.25 + ((7 * x + 13 * y) % 64) as f32 / 512.0);
    (0..16)
        .map(|i| {
            let mut plane = base.mapv(|u| u * [1.0, 0.5, 2.0][i % 3]);
            if i == 7 {
                plane[[10, 10]] = 1.0;
            }
            plane
        })
        .collect()
}

fn reject_scaled_frames(normalization: RejectionNormalization) {
    let mut config = plain_config();
    config.normalization.mode = Normalization::None;
    config.normalization.adaptive_grid_size = 4;
    config.rejection.normalization = normalization;
    config.rejection.algorithm = Rejection::Sigma(SigmaParams {
        low: 3.0,
        high: 3.0,
        ..SigmaParams::default()
    });
    let result = integrate_frames(frames(scaled_frames()), &config, &CancelToken::new(), Arc::new(Silent)).unwrap();
    let total = result.report.total_rejected(0);
    assert_eq!((total.low, total.high), (0, 1), "{normalization:?}");
    assert_eq!(result.report.files[7].channels[0].rejected.high, 1, "{normalization:?}");
    let high = result.high_rejection_map.unwrap();
    assert!(high[0][[10, 10]] > 0.0, "{normalization:?}");
}

#[test]
fn test_scale_rejection_normalization_isolates_saturated_pixel() {
    reject_scaled_frames(RejectionNormalization::Scale);
}

#[test]
fn test_equalized_fluxes_isolate_saturated_pixel() {
    reject_scaled_frames(RejectionNormalization::EqualizeFluxes);
}

#[test]
fn test_adaptive_rejection_normalization_isolates_saturated_pixel() {
    reject_scaled_frames(RejectionNormalization::Adaptive);
}

// ---------------------------------------------------------------------------
// Local normalization
// ---------------------------------------------------------------------------

fn flat_local(width: usize, height: usize, scale: f64, offset: f64) -> LocalNormalizationData {
    let surface = |v: f64| GridSurface::new(width, height, 2, 2, vec![v; 4]).unwrap();
    LocalNormalizationData {
        channels: vec![LocalNormalizationChannel {
            scale: surface(scale),
            offset: surface(offset),
        }],
    }
}

#[test]
fn test_local_normalization_applies_sidecar_functions() {
    let levels = [0.3f32, 0.4, 0.5];
    let inputs = frames(levels.iter().map(|&v| make_plane(10, 12, v)).collect())
        .into_iter()
        .zip(levels)
        .map(|(f, v)| f.with_local_normalization(flat_local(12, 10, 1.0, 0.3 - v as f64)))
        .collect();
    let mut config = plain_config();
    config.normalization.mode = Normalization::Local;
    let image = integrate_frames(inputs, &config, &CancelToken::new(), Arc::new(Silent))
        .unwrap()
        .image
        .unwrap();
    assert_abs_diff_eq!(image.get(0, 5, 5), 0.3, epsilon = 1e-6);
}

#[test]
fn test_local_normalization_without_data_fails() {
    let inputs = frames(vec![make_plane(4, 4, 0.3); 3]);
    let mut config = plain_config();
    config.normalization.mode = Normalization::Local;
    let err = integrate_frames(inputs, &config, &CancelToken::new(), Arc::new(Silent)).unwrap_err();
    assert!(matches!(err, IntegraError::MissingLocalNormalization { .. }));
}

#[test]
fn test_local_normalization_geometry_is_checked() {
    let inputs = frames(vec![make_plane(4, 4, 0.3); 3])
        .into_iter()
        .map(|f| f.with_local_normalization(flat_local(8, 8, 1.0, 0.0)))
        .collect();
    let mut config = plain_config();
    config.normalization.mode = Normalization::Local;
    let err = integrate_frames(inputs, &config, &CancelToken::new(), Arc::new(Silent)).unwrap_err();
    assert!(matches!(err, IntegraError::IncompatibleGeometry { .. }));
}
