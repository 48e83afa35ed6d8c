use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_BUFFER_SIZE_MB, DEFAULT_STACK_SIZE_MB, MAX_FILE_READ_THREADS, MAX_REJECTION_ITERATIONS,
};
use crate::error::{IntegraError, Result};

/// Full set of integration options.
///
/// Scalar fields come before sub-tables so the struct serializes to TOML.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub combination: Combination,
    /// Statistics cache file, consulted read-through and updated write-through.
    pub cache: Option<PathBuf>,
    pub normalization: NormalizationConfig,
    pub weights: WeightConfig,
    pub rejection: RejectionConfig,
    pub range: RangeRejection,
    pub large_scale: LargeScaleConfig,
    pub roi: Option<Roi>,
    pub memory: MemoryConfig,
    pub output: OutputConfig,
}

impl IntegrationConfig {
    /// Checks option consistency that does not depend on the input files.
    pub fn validate(&self) -> Result<()> {
        let r = &self.range;
        if r.clip_low && r.clip_high && r.low >= r.high {
            return Err(IntegraError::Config(format!(
                "range rejection bounds are inverted ({} >= {})",
                r.low, r.high
            )));
        }
        if !(0.0..=1.0).contains(&self.memory.auto_memory_limit) || self.memory.auto_memory_limit == 0.0 {
            return Err(IntegraError::Config(format!(
                "auto_memory_limit must be in (0, 1], got {}",
                self.memory.auto_memory_limit
            )));
        }
        if !self.output.generate_integrated_image && !self.output.generate_rejection_maps {
            return Err(IntegraError::Config(
                "nothing to generate: both the integrated image and rejection maps are disabled".into(),
            ));
        }
        self.rejection.algorithm.validate()
    }

    /// Large-scale rejection is active for the low side.
    pub fn large_scale_low(&self) -> bool {
        self.rejection.algorithm.is_enabled() && self.rejection.clip_low && self.large_scale.low.enabled
    }

    /// Large-scale rejection is active for the high side.
    pub fn large_scale_high(&self) -> bool {
        self.rejection.algorithm.is_enabled() && self.rejection.clip_high && self.large_scale.high.enabled
    }

    /// Weights take part in the result only for average combination or drizzle data.
    pub fn needs_weights(&self) -> bool {
        self.combination == Combination::Average || self.output.generate_drizzle_data
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combination {
    #[default]
    Average,
    Median,
    Minimum,
    Maximum,
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "Average"),
            Self::Median => write!(f, "Median"),
            Self::Minimum => write!(f, "Minimum"),
            Self::Maximum => write!(f, "Maximum"),
        }
    }
}

/// Output normalization applied to every sample before rejection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    #[default]
    Additive,
    Multiplicative,
    AdditiveWithScaling,
    MultiplicativeWithScaling,
    Local,
    Adaptive,
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Additive => write!(f, "Additive"),
            Self::Multiplicative => write!(f, "Multiplicative"),
            Self::AdditiveWithScaling => write!(f, "Additive + scaling"),
            Self::MultiplicativeWithScaling => write!(f, "Multiplicative + scaling"),
            Self::Local => write!(f, "Local"),
            Self::Adaptive => write!(f, "Adaptive"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub mode: Normalization,
    /// Adaptive normalization shifts locations without rescaling.
    pub adaptive_no_scale: bool,
    /// Cells along each axis of the adaptive normalization grid (2..=16).
    pub adaptive_grid_size: usize,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            mode: Normalization::Additive,
            adaptive_no_scale: false,
            adaptive_grid_size: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightMode {
    /// Every file weighs 1.
    DontCare,
    /// Explicit per-file weight given with the input.
    Keyword,
    /// Exposure time given with the input.
    Exposure,
    /// Inverse scaled noise variance.
    #[default]
    NoiseEvaluation,
    /// Average absolute deviation.
    Signal,
    Median,
    Average,
}

impl std::fmt::Display for WeightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DontCare => write!(f, "Don't care"),
            Self::Keyword => write!(f, "Explicit weight"),
            Self::Exposure => write!(f, "Exposure time"),
            Self::NoiseEvaluation => write!(f, "Noise evaluation"),
            Self::Signal => write!(f, "Average signal strength"),
            Self::Median => write!(f, "Median value"),
            Self::Average => write!(f, "Average value"),
        }
    }
}

/// Estimator used for per-file scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleEstimator {
    AvgDev,
    Mad,
    #[default]
    Bwmv,
    Ikss,
}

impl std::fmt::Display for ScaleEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AvgDev => write!(f, "Average absolute deviation"),
            Self::Mad => write!(f, "MAD"),
            Self::Bwmv => write!(f, "Biweight midvariance"),
            Self::Ikss => write!(f, "IKSS"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub mode: WeightMode,
    pub scale_estimator: ScaleEstimator,
}

/// Statistical rejection algorithm with its parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Rejection {
    #[default]
    None,
    MinMax(MinMaxParams),
    Percentile(PercentileParams),
    Sigma(SigmaParams),
    WinsorizedSigma(WinsorizedParams),
    AveragedSigma(SigmaParams),
    LinearFit(LinearFitParams),
    Esd(EsdParams),
    Rcr(RcrParams),
    CcdClip(CcdParams),
}

impl Rejection {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Minimum number of input frames the algorithm can work with.
    pub fn min_frames(&self) -> usize {
        match self {
            Self::LinearFit(_) => crate::consts::MIN_FRAMES_LINEAR_FIT,
            _ => crate::consts::MIN_FRAMES,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(IntegraError::Config(format!("{name} must be positive, got {v}")))
            }
        };
        match self {
            Self::None | Self::MinMax(_) => Ok(()),
            Self::Percentile(p) => {
                positive("percentile low", p.low)?;
                positive("percentile high", p.high)
            }
            Self::Sigma(p) | Self::AveragedSigma(p) => {
                positive("sigma low", p.low)?;
                positive("sigma high", p.high)
            }
            Self::WinsorizedSigma(p) => {
                positive("sigma low", p.low)?;
                positive("sigma high", p.high)?;
                positive("winsorization cutoff", p.cutoff)
            }
            Self::LinearFit(p) => {
                positive("linear fit low", p.low)?;
                positive("linear fit high", p.high)
            }
            Self::Esd(p) => {
                if !(0.0..1.0).contains(&p.outliers_fraction) {
                    return Err(IntegraError::Config(format!(
                        "ESD outliers fraction must be in [0, 1), got {}",
                        p.outliers_fraction
                    )));
                }
                positive("ESD significance", p.alpha)?;
                positive("ESD low relaxation", p.low_relaxation)
            }
            Self::Rcr(p) => positive("RCR limit", p.limit),
            Self::CcdClip(p) => {
                positive("CCD gain", p.gain)?;
                positive("sigma low", p.low)?;
                positive("sigma high", p.high)
            }
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::MinMax(_) => write!(f, "Min/Max"),
            Self::Percentile(_) => write!(f, "Percentile clipping"),
            Self::Sigma(_) => write!(f, "Sigma clipping"),
            Self::WinsorizedSigma(_) => write!(f, "Winsorized sigma clipping"),
            Self::AveragedSigma(_) => write!(f, "Averaged sigma clipping"),
            Self::LinearFit(_) => write!(f, "Linear fit clipping"),
            Self::Esd(_) => write!(f, "Generalized ESD"),
            Self::Rcr(_) => write!(f, "Robust Chauvenet rejection"),
            Self::CcdClip(_) => write!(f, "CCD noise model"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinMaxParams {
    pub low: usize,
    pub high: usize,
}

impl Default for MinMaxParams {
    fn default() -> Self {
        Self { low: 1, high: 1 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PercentileParams {
    /// Fraction of the median below which values are rejected.
    pub low: f64,
    /// Fraction of the median above which values are rejected.
    pub high: f64,
}

impl Default for PercentileParams {
    fn default() -> Self {
        Self { low: 0.2, high: 0.1 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmaParams {
    pub low: f64,
    pub high: f64,
    pub max_iterations: usize,
}

impl Default for SigmaParams {
    fn default() -> Self {
        Self {
            low: 4.0,
            high: 3.0,
            max_iterations: MAX_REJECTION_ITERATIONS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinsorizedParams {
    pub low: f64,
    pub high: f64,
    /// Values beyond this many sigmas are replaced by the mean before
    /// winsorization (first iteration only).
    pub cutoff: f64,
}

impl Default for WinsorizedParams {
    fn default() -> Self {
        Self {
            low: 4.0,
            high: 3.0,
            cutoff: 5.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearFitParams {
    pub low: f64,
    pub high: f64,
}

impl Default for LinearFitParams {
    fn default() -> Self {
        Self { low: 5.0, high: 4.0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsdParams {
    /// Maximum fraction of outliers per stack.
    pub outliers_fraction: f64,
    /// Significance level of the test.
    pub alpha: f64,
    /// Relaxation factor for low pixels (>1 rejects dark outliers less readily).
    pub low_relaxation: f64,
}

impl Default for EsdParams {
    fn default() -> Self {
        Self {
            outliers_fraction: 0.3,
            alpha: 0.05,
            low_relaxation: 1.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcrParams {
    /// Chauvenet criterion limit.
    pub limit: f64,
}

impl Default for RcrParams {
    fn default() -> Self {
        Self { limit: 0.1 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CcdParams {
    pub low: f64,
    pub high: f64,
    /// Camera gain in e-/ADU.
    pub gain: f64,
    /// Read noise in electrons.
    pub read_noise: f64,
    /// Multiplicative (flat field) noise fraction.
    pub scale_noise: f64,
}

impl Default for CcdParams {
    fn default() -> Self {
        Self {
            low: 4.0,
            high: 3.0,
            gain: 1.0,
            read_noise: 10.0,
            scale_noise: 0.0,
        }
    }
}

/// Normalization of rejection proxies, independent of output normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionNormalization {
    None,
    #[default]
    Scale,
    EqualizeFluxes,
    Local,
    Adaptive,
}

impl std::fmt::Display for RejectionNormalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Scale => write!(f, "Scale + zero offset"),
            Self::EqualizeFluxes => write!(f, "Equalize fluxes"),
            Self::Local => write!(f, "Local"),
            Self::Adaptive => write!(f, "Adaptive"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectionConfig {
    pub normalization: RejectionNormalization,
    pub clip_low: bool,
    pub clip_high: bool,
    pub algorithm: Rejection,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            normalization: RejectionNormalization::Scale,
            clip_low: true,
            clip_high: true,
            algorithm: Rejection::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeRejection {
    pub clip_low: bool,
    /// Samples <= this value are rejected.
    pub low: f64,
    pub clip_high: bool,
    /// Samples >= this value are rejected.
    pub high: f64,
    /// Count range-rejected samples in the rejection fraction maps.
    pub map_range_rejection: bool,
}

impl Default for RangeRejection {
    fn default() -> Self {
        Self {
            clip_low: true,
            low: 0.0,
            clip_high: false,
            high: 0.98,
            map_range_rejection: true,
        }
    }
}

impl RangeRejection {
    pub fn is_enabled(&self) -> bool {
        self.clip_low || self.clip_high
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeScaleSide {
    pub enabled: bool,
    /// Small-scale wavelet layers excluded from the large-scale mask.
    pub protected_layers: usize,
    /// Radius of the circular dilation in pixels.
    pub growth: usize,
}

impl Default for LargeScaleSide {
    fn default() -> Self {
        Self {
            enabled: false,
            protected_layers: 2,
            growth: 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LargeScaleConfig {
    pub low: LargeScaleSide,
    pub high: LargeScaleSide,
}

/// Region of interest, half-open in both axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Roi {
    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    /// Checks the rectangle against an image geometry.
    pub fn validate(&self, width: usize, height: usize) -> Result<()> {
        if self.width() == 0 || self.height() == 0 {
            return Err(IntegraError::InvalidRoi(format!(
                "empty rectangle ({}, {}) - ({}, {})",
                self.x0, self.y0, self.x1, self.y1
            )));
        }
        if self.x1 > width || self.y1 > height {
            return Err(IntegraError::InvalidRoi(format!(
                "rectangle ({}, {}) - ({}, {}) exceeds image bounds {}x{}",
                self.x0, self.y0, self.x1, self.y1, width, height
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Per-file row buffer size when automatic sizing is off.
    pub buffer_size_mb: usize,
    /// Size of the rejection stack buffer.
    pub stack_size_mb: usize,
    /// Derive buffer sizes from available physical memory.
    pub auto_memory_size: bool,
    /// Fraction of available physical memory usable by the engine.
    pub auto_memory_limit: f64,
    /// Overrides the system query of available memory.
    pub available_memory_mb: Option<usize>,
    pub max_file_read_threads: usize,
    /// Read the next row strip while the current one is processed.
    pub prefetch: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            buffer_size_mb: DEFAULT_BUFFER_SIZE_MB,
            stack_size_mb: DEFAULT_STACK_SIZE_MB,
            auto_memory_size: true,
            auto_memory_limit: 0.75,
            available_memory_mb: None,
            max_file_read_threads: MAX_FILE_READ_THREADS,
            prefetch: false,
        }
    }
}

/// Handling of output samples outside [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRange {
    /// Clamp to [0, 1].
    Truncate,
    /// Map [min, max] linearly to [0, 1] when negative samples exist,
    /// otherwise divide by the maximum.
    #[default]
    Rescale,
    /// Divide by the maximum; negative samples are clamped to zero.
    Normalize,
}

impl std::fmt::Display for OutputRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncate => write!(f, "Truncate"),
            Self::Rescale => write!(f, "Rescale"),
            Self::Normalize => write!(f, "Normalize"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseAlgorithm {
    KSigma,
    #[default]
    Mrs,
    NStar,
}

impl std::fmt::Display for NoiseAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KSigma => write!(f, "K-sigma"),
            Self::Mrs => write!(f, "MRS"),
            Self::NStar => write!(f, "N*"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsfType {
    Gaussian,
    #[default]
    Moffat,
}

impl std::fmt::Display for PsfType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gaussian => write!(f, "Gaussian"),
            Self::Moffat => write!(f, "Moffat"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub generate_integrated_image: bool,
    pub generate_rejection_maps: bool,
    pub generate_64bit_result: bool,
    pub generate_drizzle_data: bool,
    pub range: OutputRange,
    pub evaluate_noise: bool,
    pub noise_algorithm: NoiseAlgorithm,
    pub psf_type: PsfType,
    /// Wavelet layers used for star detection in PSF signal evaluation.
    pub structure_layers: usize,
    /// Minimum fraction of noise pixels for MRS convergence.
    pub mrs_min_data_fraction: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            generate_integrated_image: true,
            generate_rejection_maps: true,
            generate_64bit_result: false,
            generate_drizzle_data: false,
            range: OutputRange::Rescale,
            evaluate_noise: true,
            noise_algorithm: NoiseAlgorithm::Mrs,
            psf_type: PsfType::Moffat,
            structure_layers: 5,
            mrs_min_data_fraction: 0.01,
        }
    }
}
