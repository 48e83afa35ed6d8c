use std::sync::Arc;
use std::time::Instant;

use ndarray::Array2;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fileset::cache::StatisticsCache;
use crate::fileset::drizzle::{sidecar_path, write_drizzle_data, DrizzleChannel, DrizzleData};
use crate::fileset::{FileSet, FrameInput, InputFile};
use crate::noise::{evaluate_channel, noise_reduction};

use super::config::{IntegrationConfig, Rejection};
use super::engine::{integrate_channel, Outputs};
use super::output::{IntegratedImage, RejectionFractionMaps};
use super::report::{FileChannelReport, FileReport, IntegrationReport, RejectionCounters};
use super::types::{IntegrationStage, NoOpReporter, ProgressReporter};

/// Everything an integration run produces.
#[derive(Clone, Debug)]
pub struct IntegrationResult {
    pub image: Option<IntegratedImage>,
    /// Fraction of low-rejected samples per pixel, one plane per channel.
    pub low_rejection_map: Option<Vec<Array2<f32>>>,
    pub high_rejection_map: Option<Vec<Array2<f32>>>,
    /// Normalized slope of the linear fit per pixel (linear fit clipping only).
    pub slope_map: Option<Vec<Array2<f32>>>,
    pub report: IntegrationReport,
}

/// Integrate image files with a thread-safe progress reporter.
pub fn run_integration_reported(
    inputs: &[InputFile],
    config: &IntegrationConfig,
    cancel: &CancelToken,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<IntegrationResult> {
    let frames = inputs.iter().map(FrameInput::open).collect::<Result<Vec<_>>>()?;
    integrate_frames(frames, config, cancel, reporter)
}

/// Integrate image files.
pub fn run_integration(inputs: &[InputFile], config: &IntegrationConfig, cancel: &CancelToken) -> Result<IntegrationResult> {
    run_integration_reported(inputs, config, cancel, Arc::new(NoOpReporter))
}

/// Integrate already opened frames.
pub fn integrate_frames(
    frames: Vec<FrameInput>,
    config: &IntegrationConfig,
    cancel: &CancelToken,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<IntegrationResult> {
    let started = Instant::now();
    let mut warnings = Vec::new();

    reporter.begin_stage(IntegrationStage::OpeningFiles, Some(frames.len()));
    let mut cache = match &config.cache {
        Some(path) => StatisticsCache::open(path),
        None => StatisticsCache::in_memory(),
    };
    let mut set = FileSet::open(frames, config, &mut cache, cancel)?;
    if let Err(e) = cache.save() {
        warn!(error = %e, "statistics cache not saved");
        warnings.push(e.to_string());
    }
    reporter.advance(set.len());
    reporter.finish_stage();

    let (channels, height, width) = (set.channels(), set.height(), set.width());
    info!(
        files = set.len(),
        channels,
        width,
        height,
        combination = %config.combination,
        normalization = %config.normalization.mode,
        rejection = %config.rejection.algorithm,
        "integrating"
    );

    let maps = config.output.generate_rejection_maps && config.rejection.algorithm.is_enabled();
    let mut outputs = Outputs {
        image: config
            .output
            .generate_integrated_image
            .then(|| IntegratedImage::new(channels, height, width, config.output.generate_64bit_result)),
        fractions: maps.then(|| RejectionFractionMaps::new(channels, height, width)),
        slopes: (maps && matches!(config.rejection.algorithm, Rejection::LinearFit(_)))
            .then(|| vec![Array2::zeros((height, width)); channels]),
    };

    let mut counters: Vec<RejectionCounters> = Vec::with_capacity(channels);
    let mut overflow = false;
    for channel in 0..channels {
        let run = integrate_channel(&mut set, config, channel, &mut outputs, cancel, &reporter)?;
        overflow |= run.overflow;
        counters.push(run.counters);
    }
    if overflow {
        warn!("numeric overflow in the integrated image, samples saturated");
        warnings.push("numeric overflow: saturated output samples".into());
    }

    let mut report = IntegrationReport {
        width,
        height,
        channels,
        overflow,
        ..IntegrationReport::default()
    };

    if let Some(image) = outputs.image.as_mut() {
        report.output_range = image.finalize(config.output.range);
        if config.output.evaluate_noise {
            reporter.begin_stage(IntegrationStage::NoiseEvaluation, Some(channels));
            for c in 0..channels {
                cancel.check()?;
                let mut evaluation = evaluate_channel(&image.channel_f32(c), c, &config.output);
                evaluation.noise_reduction = input_noise(&set, c)
                    .and_then(|inputs| noise_reduction(evaluation.noise.sigma, evaluation.ikss_scale, &inputs));
                if evaluation.fallback {
                    warnings.push(format!(
                        "channel {c}: {} noise evaluation fell back to {}",
                        config.output.noise_algorithm, evaluation.noise.algorithm
                    ));
                }
                info!(
                    channel = c,
                    noise = evaluation.noise.sigma,
                    snr = evaluation.snr,
                    reference_noise_reduction = evaluation.noise_reduction.map(|r| r.reference),
                    algorithm = %evaluation.noise.algorithm,
                    "noise evaluation"
                );
                report.evaluation.push(evaluation);
                reporter.advance(1);
            }
            reporter.finish_stage();
        }
    }

    if config.output.generate_drizzle_data {
        report.drizzle_failures = write_drizzle_sidecars(&set, &reporter, &mut warnings);
    }

    report.files = set
        .files()
        .iter()
        .enumerate()
        .map(|(i, file)| FileReport {
            path: file.path().to_path_buf(),
            channels: file
                .estimates
                .iter()
                .enumerate()
                .map(|(c, e)| FileChannelReport {
                    rejected: counters[c].files[i],
                    weight: e.relative_weight,
                    location: e.location,
                    scale_factor: e.scale_factor,
                    zero_offset: e.zero_offset,
                })
                .collect(),
        })
        .collect();
    report.warnings = warnings;
    report.elapsed = started.elapsed();
    info!(elapsed_ms = report.elapsed.as_millis() as u64, "integration complete");

    Ok(IntegrationResult {
        image: outputs.image,
        low_rejection_map: outputs.fractions.as_ref().map(|f| f.low.clone()),
        high_rejection_map: outputs.fractions.map(|f| f.high),
        slope_map: outputs.slopes,
        report,
    })
}

/// (noise, IKSS scale) of `channel` for every file, when all are known.
fn input_noise(set: &FileSet, channel: usize) -> Option<Vec<(f64, f64)>> {
    set.files()
        .iter()
        .map(|file| {
            let stats = file.statistics.get(channel)?;
            Some((stats.noise?, stats.ikss_scale?))
        })
        .collect()
}

/// Write one drizzle data sidecar per file. A failure is a warning; returns
/// the number of files that failed.
fn write_drizzle_sidecars(set: &FileSet, reporter: &Arc<dyn ProgressReporter>, warnings: &mut Vec<String>) -> usize {
    reporter.begin_stage(IntegrationStage::DrizzleData, Some(set.len()));
    let geometry = set.geometry();
    let mut failures = 0;
    for (i, file) in set.files().iter().enumerate() {
        let path = file.drizzle_path.clone().unwrap_or_else(|| sidecar_path(file.path()));
        let data = DrizzleData {
            width: geometry.width,
            height: geometry.height,
            channels: file.estimates.iter().map(DrizzleChannel::from).collect(),
            rejection_maps: (0..geometry.channels).filter_map(|c| set.full_frame_map(i, c)).collect(),
        };
        if let Err(e) = write_drizzle_data(&path, &data) {
            warn!(path = %path.display(), error = %e, "drizzle data not written");
            warnings.push(format!("{}: drizzle data not written: {e}", path.display()));
            failures += 1;
        }
        reporter.advance(1);
    }
    reporter.finish_stage();
    if failures > 0 {
        warn!(failures, "drizzle data failures");
    }
    failures
}
