use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{STATS_RANGE_HIGH, STATS_RANGE_LOW};
use crate::error::{IntegraError, Result};
use crate::math::stats::{
    ikss, is_insignificant, mad, mean, median_sorted, two_sided_avg_dev, two_sided_bwmv, two_sided_mad,
    TwoSided,
};
use crate::noise::evaluate_noise_mrs;
use crate::pipeline::config::{IntegrationConfig, ScaleEstimator, WeightMode};

/// Statistics of one channel of one input frame.
///
/// Only samples in the open interval (1/65535, 1 - 1/65535) take part, which
/// excludes black borders and saturated pixels.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub ikss_location: Option<f64>,
    pub ikss_scale: Option<f64>,
    pub noise: Option<f64>,
    pub avg_dev: TwoSided,
    pub mad: TwoSided,
    /// Square root of the two-sided biweight midvariance.
    pub bwmv: TwoSided,
}

/// Which optional statistics a run needs.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatisticsRequest {
    pub ikss: bool,
    /// Minimum MRS data fraction when noise is needed.
    pub noise: Option<f64>,
}

impl StatisticsRequest {
    pub fn for_config(config: &IntegrationConfig) -> Self {
        let noise_weights = config.needs_weights() && config.weights.mode == WeightMode::NoiseEvaluation;
        Self {
            // output noise evaluation reports noise reductions against IKSS-scaled inputs
            ikss: config.weights.scale_estimator == ScaleEstimator::Ikss || config.output.evaluate_noise,
            noise: (noise_weights || config.output.evaluate_noise).then_some(config.output.mrs_min_data_fraction),
        }
    }
}

impl ChannelStatistics {
    pub fn compute(plane: &Array2<f32>, request: StatisticsRequest) -> Self {
        let mut samples: Vec<f64> = plane
            .iter()
            .map(|&v| v as f64)
            .filter(|&v| v > STATS_RANGE_LOW && v < STATS_RANGE_HIGH)
            .collect();
        samples.sort_by(|a, b| a.total_cmp(b));

        let median = median_sorted(&samples);
        let mut two_mad = two_sided_mad(&samples, median);
        if !two_mad.is_significant() {
            let symmetric = mad(&samples, median);
            if is_insignificant(two_mad.low) {
                two_mad.low = symmetric;
            }
            if is_insignificant(two_mad.high) {
                two_mad.high = symmetric;
            }
        }
        let bwmv = two_sided_bwmv(&samples, median, two_mad).map(f64::sqrt);

        let (ikss_location, ikss_scale) = if request.ikss {
            let (l, s) = ikss(&samples);
            (Some(l), Some(s))
        } else {
            (None, None)
        };
        let noise = request
            .noise
            .map(|fraction| evaluate_noise_mrs(plane, fraction).sigma);

        Self {
            count: samples.len(),
            mean: mean(&samples),
            median,
            ikss_location,
            ikss_scale,
            noise,
            avg_dev: two_sided_avg_dev(&samples, median),
            mad: two_mad,
            bwmv,
        }
    }

    /// True when every statistic asked for is present.
    pub fn satisfies(&self, request: StatisticsRequest) -> bool {
        (!request.ikss || self.ikss_scale.is_some()) && (request.noise.is_none() || self.noise.is_some())
    }

    pub fn location(&self, estimator: ScaleEstimator) -> f64 {
        match (estimator, self.ikss_location) {
            (ScaleEstimator::Ikss, Some(l)) => l,
            _ => self.median,
        }
    }

    pub fn scale(&self, estimator: ScaleEstimator) -> TwoSided {
        match estimator {
            ScaleEstimator::AvgDev => self.avg_dev,
            ScaleEstimator::Mad => self.mad,
            ScaleEstimator::Bwmv => self.bwmv,
            ScaleEstimator::Ikss => TwoSided::splat(self.ikss_scale.unwrap_or(0.0)),
        }
    }
}

/// Normalization and weighting parameters of one channel of one frame,
/// relative to the reference (first) frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelEstimates {
    pub location: f64,
    pub scale: TwoSided,
    /// Reference scale over this frame's scale, per side.
    pub scale_factor: TwoSided,
    /// Same ratio for the mean of both sides.
    pub overall_scale_factor: f64,
    /// Reference location minus this frame's location.
    pub zero_offset: f64,
    pub noise: f64,
    /// Absolute weight used in combination.
    pub weight: f64,
    /// Weight relative to the reference frame, for reporting.
    pub relative_weight: f64,
}

/// Explicit per-frame values that some weighting modes take from the input
/// manifest.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeightKeywords {
    pub weight: Option<f64>,
    pub exposure: Option<f64>,
}

fn ratio(reference: f64, value: f64) -> f64 {
    if is_insignificant(reference) || is_insignificant(value) {
        1.0
    } else {
        reference / value
    }
}

fn raw_weight(
    path: &Path,
    mode: WeightMode,
    stats: &ChannelStatistics,
    scale_factor: TwoSided,
    keywords: WeightKeywords,
) -> Result<f64> {
    let invalid = |reason: String| IntegraError::InvalidWeight {
        path: path.to_path_buf(),
        reason,
    };
    let w = match mode {
        WeightMode::DontCare => 1.0,
        WeightMode::Keyword => keywords
            .weight
            .ok_or_else(|| invalid("no explicit weight given".into()))?,
        WeightMode::Exposure => keywords
            .exposure
            .ok_or_else(|| invalid("no exposure time given".into()))?,
        WeightMode::NoiseEvaluation => {
            let noise = stats.noise.unwrap_or(0.0);
            let k = scale_factor.low * noise;
            1.0 / (k * k)
        }
        WeightMode::Signal => stats.avg_dev.mean(),
        WeightMode::Median => stats.median,
        WeightMode::Average => stats.mean,
    };
    if !w.is_finite() || is_insignificant(w) || w < 0.0 {
        return Err(invalid(format!("zero or insignificant {mode} weight ({w})")));
    }
    Ok(w)
}

/// Derive per-file estimates from per-file statistics.
///
/// `stats[i][c]` belongs to file `i`, channel `c`; file 0 is the reference.
/// Weights are computed only when `config.needs_weights()`, else they are 1.
pub fn derive_estimates(
    paths: &[&Path],
    stats: &[Vec<ChannelStatistics>],
    keywords: &[WeightKeywords],
    config: &IntegrationConfig,
) -> Result<Vec<Vec<ChannelEstimates>>> {
    let estimator = config.weights.scale_estimator;
    let Some(reference) = stats.first() else {
        return Ok(Vec::new());
    };
    let mut all = Vec::with_capacity(stats.len());
    let mut reference_weights: Vec<f64> = Vec::new();

    for (i, file_stats) in stats.iter().enumerate() {
        let mut channels = Vec::with_capacity(file_stats.len());
        for (c, s) in file_stats.iter().enumerate() {
            let r = &reference[c];
            let location = s.location(estimator);
            let scale = s.scale(estimator);
            let r_scale = r.scale(estimator);
            let scale_factor = TwoSided::new(ratio(r_scale.low, scale.low), ratio(r_scale.high, scale.high));
            let weight = if config.needs_weights() {
                raw_weight(paths[i], config.weights.mode, s, scale_factor, keywords[i])?
            } else {
                1.0
            };
            if i == 0 {
                reference_weights.push(weight);
            }
            channels.push(ChannelEstimates {
                location,
                scale,
                scale_factor,
                overall_scale_factor: ratio(r_scale.mean(), scale.mean()),
                zero_offset: r.location(estimator) - location,
                noise: s.noise.unwrap_or(0.0),
                weight,
                relative_weight: weight / reference_weights[c],
            });
        }
        all.push(channels);
    }
    Ok(all)
}
