use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use integra_core::cancel::CancelToken;
use integra_core::fileset::InputFile;
use integra_core::io::image_io::save_image;
use integra_core::pipeline::config::{
    CcdParams, Combination, EsdParams, IntegrationConfig, LinearFitParams, MinMaxParams, Normalization,
    OutputRange, PercentileParams, RcrParams, Rejection, RejectionNormalization, Roi, SigmaParams,
    WeightMode, WinsorizedParams,
};
use integra_core::pipeline::{run_integration_reported, IntegrationResult};
use serde::Deserialize;

use crate::progress::BarReporter;
use crate::summary::{print_integration_summary, print_report};

#[derive(Clone, Copy, ValueEnum)]
pub enum CombinationArg {
    Average,
    Median,
    Minimum,
    Maximum,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RejectionArg {
    None,
    MinMax,
    Percentile,
    Sigma,
    Winsorized,
    AveragedSigma,
    LinearFit,
    Esd,
    Rcr,
    Ccd,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum NormalizationArg {
    None,
    Additive,
    Multiplicative,
    AdditiveScaling,
    MultiplicativeScaling,
    Local,
    Adaptive,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RejectionNormalizationArg {
    None,
    Scale,
    EqualizeFluxes,
    Local,
    Adaptive,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum WeightArg {
    DontCare,
    Keyword,
    Exposure,
    Noise,
    Signal,
    Median,
    Average,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RangeArg {
    Truncate,
    Rescale,
    Normalize,
}

#[derive(Args)]
pub struct IntegrateArgs {
    /// Input image files
    pub files: Vec<PathBuf>,

    /// Input manifest (TOML, a `[[files]]` table per frame)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Integration config file (TOML); flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pixel combination operation
    #[arg(long, value_enum)]
    pub combination: Option<CombinationArg>,

    /// Output normalization
    #[arg(long, value_enum)]
    pub normalization: Option<NormalizationArg>,

    /// Per-file weighting
    #[arg(long, value_enum)]
    pub weights: Option<WeightArg>,

    /// Pixel rejection algorithm
    #[arg(long, value_enum)]
    pub rejection: Option<RejectionArg>,

    /// Normalization used for rejection
    #[arg(long, value_enum)]
    pub rejection_normalization: Option<RejectionNormalizationArg>,

    /// Low rejection threshold (sigma units, or count for min/max)
    #[arg(long)]
    pub low: Option<f64>,

    /// High rejection threshold (sigma units, or count for min/max)
    #[arg(long)]
    pub high: Option<f64>,

    /// Reject samples at or below this value before statistical rejection
    #[arg(long)]
    pub range_low: Option<f64>,

    /// Reject samples at or above this value before statistical rejection
    #[arg(long)]
    pub range_high: Option<f64>,

    /// Enable large-scale rejection of low (dark) structures
    #[arg(long)]
    pub large_scale_low: bool,

    /// Enable large-scale rejection of high (bright) structures
    #[arg(long)]
    pub large_scale_high: bool,

    /// Region of interest as x0,y0,x1,y1
    #[arg(long)]
    pub roi: Option<String>,

    /// Handling of output samples outside [0, 1]
    #[arg(long, value_enum)]
    pub range: Option<RangeArg>,

    /// Statistics cache file
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Store the result with 64-bit samples
    #[arg(long)]
    pub wide: bool,

    /// Write drizzle data next to each input file
    #[arg(long)]
    pub drizzle: bool,

    /// Do not write rejection maps
    #[arg(long)]
    pub no_maps: bool,

    /// Skip noise evaluation of the result
    #[arg(long)]
    pub no_noise: bool,

    /// Print per-file rejection and weight details
    #[arg(long)]
    pub details: bool,

    /// Worker threads (defaults to one per logical CPU)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Output file path
    #[arg(short, long, default_value = "integration.tiff")]
    pub output: PathBuf,
}

#[derive(Deserialize)]
struct Manifest {
    files: Vec<InputFile>,
}

pub fn run(args: &IntegrateArgs) -> Result<()> {
    let config = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid integration config")?
    } else {
        IntegrationConfig::default()
    };
    let config = apply_overrides(config, args)?;
    let inputs = collect_inputs(args)?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker threads")?;
    }

    print_integration_summary(&config, inputs.len(), &args.output);

    let reporter = Arc::new(BarReporter::new()?);
    let cancel = CancelToken::new();
    let result = match run_integration_reported(&inputs, &config, &cancel, reporter.clone()) {
        Ok(result) => result,
        Err(e) if e.is_abort() => {
            reporter.abandon();
            println!("\n{e}");
            return Ok(());
        }
        Err(e) => {
            reporter.abandon();
            return Err(e.into());
        }
    };
    reporter.finish();

    save_outputs(&result, &args.output)?;
    print_report(&result.report, args.details);
    Ok(())
}

fn collect_inputs(args: &IntegrateArgs) -> Result<Vec<InputFile>> {
    let mut inputs: Vec<InputFile> = args.files.iter().map(InputFile::new).collect();
    if let Some(ref path) = args.manifest {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest: Manifest = toml::from_str(&contents).context("Invalid input manifest")?;
        inputs.extend(manifest.files);
    }
    if inputs.is_empty() {
        bail!("No input files given");
    }
    Ok(inputs)
}

fn apply_overrides(mut config: IntegrationConfig, args: &IntegrateArgs) -> Result<IntegrationConfig> {
    if let Some(c) = args.combination {
        config.combination = match c {
            CombinationArg::Average => Combination::Average,
            CombinationArg::Median => Combination::Median,
            CombinationArg::Minimum => Combination::Minimum,
            CombinationArg::Maximum => Combination::Maximum,
        };
    }
    if let Some(n) = args.normalization {
        config.normalization.mode = match n {
            NormalizationArg::None => Normalization::None,
            NormalizationArg::Additive => Normalization::Additive,
            NormalizationArg::Multiplicative => Normalization::Multiplicative,
            NormalizationArg::AdditiveScaling => Normalization::AdditiveWithScaling,
            NormalizationArg::MultiplicativeScaling => Normalization::MultiplicativeWithScaling,
            NormalizationArg::Local => Normalization::Local,
            NormalizationArg::Adaptive => Normalization::Adaptive,
        };
    }
    if let Some(w) = args.weights {
        config.weights.mode = match w {
            WeightArg::DontCare => WeightMode::DontCare,
            WeightArg::Keyword => WeightMode::Keyword,
            WeightArg::Exposure => WeightMode::Exposure,
            WeightArg::Noise => WeightMode::NoiseEvaluation,
            WeightArg::Signal => WeightMode::Signal,
            WeightArg::Median => WeightMode::Median,
            WeightArg::Average => WeightMode::Average,
        };
    }
    if let Some(r) = args.rejection {
        config.rejection.algorithm = rejection_from_args(r, args.low, args.high);
    } else if args.low.is_some() || args.high.is_some() {
        bail!("--low/--high need --rejection");
    }
    if let Some(n) = args.rejection_normalization {
        config.rejection.normalization = match n {
            RejectionNormalizationArg::None => RejectionNormalization::None,
            RejectionNormalizationArg::Scale => RejectionNormalization::Scale,
            RejectionNormalizationArg::EqualizeFluxes => RejectionNormalization::EqualizeFluxes,
            RejectionNormalizationArg::Local => RejectionNormalization::Local,
            RejectionNormalizationArg::Adaptive => RejectionNormalization::Adaptive,
        };
    }
    if let Some(low) = args.range_low {
        config.range.clip_low = true;
        config.range.low = low;
    }
    if let Some(high) = args.range_high {
        config.range.clip_high = true;
        config.range.high = high;
    }
    config.large_scale.low.enabled |= args.large_scale_low;
    config.large_scale.high.enabled |= args.large_scale_high;
    if let Some(ref roi) = args.roi {
        config.roi = Some(parse_roi(roi)?);
    }
    if let Some(r) = args.range {
        config.output.range = match r {
            RangeArg::Truncate => OutputRange::Truncate,
            RangeArg::Rescale => OutputRange::Rescale,
            RangeArg::Normalize => OutputRange::Normalize,
        };
    }
    if args.cache.is_some() {
        config.cache = args.cache.clone();
    }
    config.output.generate_64bit_result |= args.wide;
    config.output.generate_drizzle_data |= args.drizzle;
    if args.no_maps {
        config.output.generate_rejection_maps = false;
    }
    if args.no_noise {
        config.output.evaluate_noise = false;
    }
    Ok(config)
}

/// Default parameters for the chosen algorithm with the thresholds replaced.
fn rejection_from_args(arg: RejectionArg, low: Option<f64>, high: Option<f64>) -> Rejection {
    fn pick(v: Option<f64>, default: f64) -> f64 {
        v.unwrap_or(default)
    }
    match arg {
        RejectionArg::None => Rejection::None,
        RejectionArg::MinMax => {
            let d = MinMaxParams::default();
            Rejection::MinMax(MinMaxParams {
                low: low.map_or(d.low, |v| v.max(0.0) as usize),
                high: high.map_or(d.high, |v| v.max(0.0) as usize),
            })
        }
        RejectionArg::Percentile => {
            let d = PercentileParams::default();
            Rejection::Percentile(PercentileParams {
                low: pick(low, d.low),
                high: pick(high, d.high),
            })
        }
        RejectionArg::Sigma | RejectionArg::AveragedSigma => {
            let d = SigmaParams::default();
            let p = SigmaParams {
                low: pick(low, d.low),
                high: pick(high, d.high),
                ..d
            };
            if matches!(arg, RejectionArg::Sigma) {
                Rejection::Sigma(p)
            } else {
                Rejection::AveragedSigma(p)
            }
        }
        RejectionArg::Winsorized => {
            let d = WinsorizedParams::default();
            Rejection::WinsorizedSigma(WinsorizedParams {
                low: pick(low, d.low),
                high: pick(high, d.high),
                ..d
            })
        }
        RejectionArg::LinearFit => {
            let d = LinearFitParams::default();
            Rejection::LinearFit(LinearFitParams {
                low: pick(low, d.low),
                high: pick(high, d.high),
            })
        }
        RejectionArg::Esd => Rejection::Esd(EsdParams::default()),
        RejectionArg::Rcr => Rejection::Rcr(RcrParams::default()),
        RejectionArg::Ccd => {
            let d = CcdParams::default();
            Rejection::CcdClip(CcdParams {
                low: pick(low, d.low),
                high: pick(high, d.high),
                ..d
            })
        }
    }
}

fn parse_roi(s: &str) -> Result<Roi> {
    let parts: Vec<usize> = s
        .split(',')
        .map(|p| p.trim().parse::<usize>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Invalid ROI '{s}'"))?;
    let &[x0, y0, x1, y1] = parts.as_slice() else {
        bail!("ROI needs four values x0,y0,x1,y1, got '{s}'");
    };
    Ok(Roi { x0, y0, x1, y1 })
}

/// `<stem>_<suffix>.<ext>` next to the main output.
fn sibling_path(output: &Path, suffix: &str) -> PathBuf {
    let stem = output.file_stem().and_then(|s| s.to_str()).unwrap_or("integration");
    let ext = output.extension().and_then(|s| s.to_str()).unwrap_or("tiff");
    output.with_file_name(format!("{stem}_{suffix}.{ext}"))
}

fn save_outputs(result: &IntegrationResult, output: &Path) -> Result<()> {
    if let Some(ref image) = result.image {
        save_image(&image.to_f32_planes(), output)
            .with_context(|| format!("Failed to save {}", output.display()))?;
        println!("\nOutput saved to {}", output.display());
    }
    let maps = [
        ("rejection_low", &result.low_rejection_map),
        ("rejection_high", &result.high_rejection_map),
        ("slope", &result.slope_map),
    ];
    for (suffix, map) in maps {
        if let Some(planes) = map {
            let path = sibling_path(output, suffix);
            save_image(planes, &path).with_context(|| format!("Failed to save {}", path.display()))?;
            println!("Map saved to {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_parsing() {
        let roi = parse_roi("1, 2,30,40").unwrap();
        assert_eq!((roi.x0, roi.y0, roi.x1, roi.y1), (1, 2, 30, 40));
        assert!(parse_roi("1,2,3").is_err());
        assert!(parse_roi("a,b,c,d").is_err());
    }

    #[test]
    fn map_paths_follow_output() {
        let p = sibling_path(Path::new("out/m31.tiff"), "rejection_low");
        assert_eq!(p, PathBuf::from("out/m31_rejection_low.tiff"));
    }

    #[test]
    fn thresholds_override_defaults() {
        match rejection_from_args(RejectionArg::Sigma, Some(2.5), None) {
            Rejection::Sigma(p) => {
                assert_eq!(p.low, 2.5);
                assert_eq!(p.high, SigmaParams::default().high);
            }
            other => panic!("unexpected {other}"),
        }
    }
}
