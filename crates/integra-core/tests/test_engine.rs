mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::Array2;

use common::{frames, make_plane, noisy_plane, plain_config, Rng};
use integra_core::cancel::CancelToken;
use integra_core::error::IntegraError;
use integra_core::fileset::source::MemorySource;
use integra_core::fileset::FrameInput;
use integra_core::pipeline::config::{
    Combination, IntegrationConfig, LinearFitParams, Normalization, Rejection, Roi, SigmaParams,
};
use integra_core::pipeline::{integrate_frames, IntegrationResult, IntegrationStage, ProgressReporter};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Silent;
impl ProgressReporter for Silent {}

/// Records stage starts and the number of advanced items.
#[derive(Default)]
struct Recorder {
    stages: Mutex<Vec<(IntegrationStage, Option<usize>)>>,
    advanced: AtomicUsize,
}

impl ProgressReporter for Recorder {
    fn begin_stage(&self, stage: IntegrationStage, total_items: Option<usize>) {
        self.stages.lock().unwrap().push((stage, total_items));
    }

    fn advance(&self, items_done: usize) {
        self.advanced.fetch_add(items_done, Ordering::Relaxed);
    }
}

fn run(inputs: Vec<FrameInput>, config: &IntegrationConfig) -> integra_core::error::Result<IntegrationResult> {
    integrate_frames(inputs, config, &CancelToken::new(), Arc::new(Silent))
}

fn sigma(low: f64, high: f64) -> Rejection {
    Rejection::Sigma(SigmaParams {
        low,
        high,
        ..SigmaParams::default()
    })
}

/// Five flat frames at 0.5 plus one with a hot pixel at (50, 50).
fn hot_pixel_frames() -> Vec<FrameInput> {
    let mut planes = vec![make_plane(100, 100, 0.5); 5];
    let mut hot = make_plane(100, 100, 0.5);
    hot[[50, 50]] = 1.0;
    planes.push(hot);
    frames(planes)
}

// ---------------------------------------------------------------------------
// Rejection and combination
// ---------------------------------------------------------------------------

#[test]
fn test_hot_pixel_rejected_high() {
    let mut config = plain_config();
    config.rejection.algorithm = sigma(3.0, 3.0);
    let result = run(hot_pixel_frames(), &config).unwrap();

    let image = result.image.unwrap();
    for y in 0..100 {
        for x in 0..100 {
            assert!((image.get(0, y, x) - 0.5).abs() < 1e-6, "({x}, {y})");
        }
    }
    let total = result.report.total_rejected(0);
    assert_eq!(total.high, 1);
    assert_eq!(total.low, 0);
    assert_eq!(result.report.files[5].channels[0].rejected.high, 1);

    let high = result.high_rejection_map.unwrap();
    assert!((high[0][[50, 50]] - 1.0 / 6.0).abs() < 1e-6);
    assert_eq!(high[0][[50, 51]], 0.0);
    assert!(result.low_rejection_map.unwrap()[0].iter().all(|&v| v == 0.0));
}

#[test]
fn test_report_serializes() {
    let mut config = plain_config();
    config.rejection.algorithm = sigma(3.0, 3.0);
    let report = run(hot_pixel_frames(), &config).unwrap().report;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["files"].as_array().unwrap().len(), 6);
    assert_eq!(json["files"][5]["channels"][0]["rejected"]["high"], 1);
}

#[test]
fn test_no_rejection_averages_outlier_in() {
    let result = run(hot_pixel_frames(), &plain_config()).unwrap();
    let image = result.image.unwrap();
    assert!((image.get(0, 50, 50) - (0.5 * 5.0 + 1.0) / 6.0).abs() < 1e-6);
    assert!(result.low_rejection_map.is_none());
    assert_eq!(result.report.total_rejected(0).total(), 0);
}

#[test]
fn test_range_rejection_before_statistics() {
    let mut planes = vec![make_plane(16, 16, 0.5); 5];
    let mut dead = make_plane(16, 16, 0.5);
    dead[[3, 3]] = 0.0;
    planes.push(dead);

    let mut config = plain_config();
    config.rejection.algorithm = sigma(3.0, 3.0);
    let result = run(frames(planes), &config).unwrap();

    let total = result.report.total_rejected(0);
    assert_eq!(total.range_low, 1);
    assert_eq!(total.low, 0);
    assert!((result.image.unwrap().get(0, 3, 3) - 0.5).abs() < 1e-6);
    // range rejections count toward the low fraction map by default
    assert!((result.low_rejection_map.unwrap()[0][[3, 3]] - 1.0 / 6.0).abs() < 1e-6);
}

#[test]
fn test_median_of_odd_stack_is_exact() {
    let planes = [0.1f32, 0.7, 0.3]
        .iter()
        .map(|&v| make_plane(8, 8, v))
        .collect();
    let mut config = plain_config();
    config.combination = Combination::Median;
    config.normalization.mode = Normalization::None;
    let result = run(frames(planes), &config).unwrap();
    let image = result.image.unwrap();
    assert!(!image.is_wide());
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(image.get(0, y, x), 0.3f32 as f64);
        }
    }
}

#[test]
fn test_median_ignores_frame_order() {
    let mut rng = Rng::new(17);
    let planes: Vec<Array2<f32>> = (0..7).map(|_| noisy_plane(12, 12, 0.4, 0.05, &mut rng)).collect();
    let mut reversed = planes.clone();
    reversed.reverse();

    let mut config = plain_config();
    config.combination = Combination::Median;
    config.normalization.mode = Normalization::None;
    config.rejection.algorithm = Rejection::None;
    let forward = run(frames(planes), &config).unwrap().image.unwrap();
    let backward = run(frames(reversed), &config).unwrap().image.unwrap();
    assert_eq!(forward, backward);
}

#[test]
fn test_minimum_and_maximum() {
    let values = [0.2f32, 0.6, 0.4];
    for (combination, expected) in [(Combination::Minimum, 0.2f32), (Combination::Maximum, 0.6f32)] {
        let planes = values.iter().map(|&v| make_plane(4, 4, v)).collect();
        let mut config = plain_config();
        config.combination = combination;
        config.normalization.mode = Normalization::None;
        let image = run(frames(planes), &config).unwrap().image.unwrap();
        assert_eq!(image.get(0, 2, 2), expected as f64, "{combination}");
    }
}

#[test]
fn test_color_channels_integrate_independently() {
    let inputs = (0..3)
        .map(|_| {
            let planes = vec![make_plane(6, 6, 0.2), make_plane(6, 6, 0.4), make_plane(6, 6, 0.6)];
            FrameInput::new(MemorySource::new("rgb.tif", planes).unwrap())
        })
        .collect();
    let result = run(inputs, &plain_config()).unwrap();
    let image = result.image.unwrap();
    assert_eq!(image.channels(), 3);
    assert_eq!(result.report.channels, 3);
    for (c, expected) in [0.2f32, 0.4, 0.6].iter().enumerate() {
        assert!((image.get(c, 1, 1) - *expected as f64).abs() < 1e-6);
    }
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

#[test]
fn test_three_frames_are_enough() {
    let planes = vec![make_plane(4, 4, 0.5); 3];
    assert!(run(frames(planes), &plain_config()).is_ok());
}

#[test]
fn test_two_frames_are_too_few() {
    let planes = vec![make_plane(4, 4, 0.5); 2];
    let err = run(frames(planes), &plain_config()).unwrap_err();
    assert!(matches!(err, IntegraError::TooFewFrames { required: 3, found: 2 }));
}

#[test]
fn test_linear_fit_needs_five_frames() {
    let planes = vec![make_plane(4, 4, 0.5); 4];
    let mut config = plain_config();
    config.rejection.algorithm = Rejection::LinearFit(LinearFitParams::default());
    assert!(matches!(run(frames(planes), &config), Err(IntegraError::Config(_))));
}

#[test]
fn test_geometry_mismatch_is_rejected() {
    let planes = vec![make_plane(4, 4, 0.5), make_plane(4, 4, 0.5), make_plane(4, 5, 0.5)];
    let err = run(frames(planes), &plain_config()).unwrap_err();
    assert!(matches!(err, IntegraError::IncompatibleGeometry { .. }));
}

#[test]
fn test_invalid_roi_is_rejected() {
    let planes = vec![make_plane(10, 10, 0.5); 3];
    let mut config = plain_config();
    config.roi = Some(Roi { x0: 5, y0: 0, x1: 12, y1: 4 });
    let err = run(frames(planes), &config).unwrap_err();
    assert!(matches!(err, IntegraError::InvalidRoi(_)));
}

#[test]
fn test_cancelled_run_is_aborted() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let planes = vec![make_plane(4, 4, 0.5); 3];
    let err = integrate_frames(frames(planes), &plain_config(), &cancel, Arc::new(Silent)).unwrap_err();
    assert!(err.is_abort());
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[test]
fn test_roi_limits_output() {
    let planes = vec![make_plane(80, 60, 0.5); 3];
    let mut config = plain_config();
    config.roi = Some(Roi { x0: 10, y0: 20, x1: 40, y1: 60 });
    let result = run(frames(planes), &config).unwrap();
    assert_eq!(result.image.unwrap().dim(), (40, 30));
    assert_eq!((result.report.width, result.report.height), (30, 40));
}

#[test]
fn test_wide_result() {
    let planes = vec![make_plane(4, 4, 0.25); 3];
    let mut config = plain_config();
    config.output.generate_64bit_result = true;
    let image = run(frames(planes), &config).unwrap().image.unwrap();
    assert!(image.is_wide());
    assert_eq!(image.get(0, 0, 0), 0.25);
}

#[test]
fn test_out_of_range_output_is_rescaled() {
    let mut planes = vec![make_plane(4, 4, 0.75); 3];
    for p in &mut planes {
        p[[0, 0]] = 1.5;
    }
    let mut config = plain_config();
    config.normalization.mode = Normalization::None;
    let result = run(frames(planes), &config).unwrap();
    assert_eq!(result.report.output_range, (0.75, 1.5));
    let image = result.image.unwrap();
    assert!((image.get(0, 0, 0) - 1.0).abs() < 1e-6);
    assert!((image.get(0, 1, 1) - 0.5).abs() < 1e-6);
}

#[test]
fn test_slope_map_only_for_linear_fit() {
    let mut rng = Rng::new(7);
    let planes: Vec<Array2<f32>> = (0..6).map(|_| noisy_plane(12, 12, 0.4, 0.01, &mut rng)).collect();

    let mut config = plain_config();
    config.rejection.algorithm = Rejection::LinearFit(LinearFitParams::default());
    let result = run(frames(planes.clone()), &config).unwrap();
    let slopes = result.slope_map.unwrap();
    assert_eq!(slopes[0].dim(), (12, 12));
    assert!(slopes[0].iter().all(|&s| (0.0..=1.0).contains(&s)));

    config.rejection.algorithm = sigma(3.0, 3.0);
    assert!(run(frames(planes), &config).unwrap().slope_map.is_none());
}

#[test]
fn test_maps_only_run() {
    let mut config = plain_config();
    config.rejection.algorithm = sigma(3.0, 3.0);
    config.output.generate_integrated_image = false;
    let result = run(hot_pixel_frames(), &config).unwrap();
    assert!(result.image.is_none());
    assert!(result.high_rejection_map.unwrap()[0][[50, 50]] > 0.0);
}

#[test]
fn test_progress_covers_every_row() {
    let planes = vec![make_plane(37, 9, 0.5); 3];
    let recorder = Arc::new(Recorder::default());
    integrate_frames(frames(planes), &plain_config(), &CancelToken::new(), recorder.clone()).unwrap();

    let stages = recorder.stages.lock().unwrap().clone();
    assert_eq!(stages[0], (IntegrationStage::OpeningFiles, Some(3)));
    assert!(stages.contains(&(IntegrationStage::Integrating { channel: 0 }, Some(37))));
    // 3 opened files plus 37 rows
    assert_eq!(recorder.advanced.load(Ordering::Relaxed), 40);
}

// ---------------------------------------------------------------------------
// Large-scale rejection
// ---------------------------------------------------------------------------

fn blob_frames(rng: &mut Rng) -> Vec<Array2<f32>> {
    let mut planes: Vec<Array2<f32>> = (0..16).map(|_| noisy_plane(64, 64, 0.3, 0.005, rng)).collect();
    for y in 24..40 {
        for x in 24..40 {
            planes[3][[y, x]] += 0.4;
        }
    }
    planes
}

#[test]
fn test_large_scale_rejection_only_adds() {
    let mut rng = Rng::new(11);
    let planes = blob_frames(&mut rng);

    let mut config = plain_config();
    config.rejection.algorithm = sigma(4.0, 3.0);
    let without = run(frames(planes.clone()), &config).unwrap();

    config.large_scale.high.enabled = true;
    let with = run(frames(planes), &config).unwrap();

    let (a, b) = (without.report.total_rejected(0), with.report.total_rejected(0));
    assert!(b.high >= a.high);
    assert_eq!(b.low, a.low);

    let image = with.image.unwrap();
    assert!((image.get(0, 32, 32) - 0.3).abs() < 0.02);
    assert!(with.high_rejection_map.unwrap()[0][[32, 32]] > 0.0);
}
