pub mod adaptive;
pub mod cache;
pub mod drizzle;
pub mod estimates;
pub mod local_norm;
pub mod source;
pub mod surface;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{s, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{IntegraError, Result};
use crate::io::image_io::ImageGeometry;
use crate::pipeline::config::{IntegrationConfig, Normalization, Rejection, RejectionNormalization, Roi};
use crate::pipeline::memory;

use adaptive::AdaptiveNormalization;
use cache::StatisticsCache;
use estimates::{derive_estimates, ChannelEstimates, ChannelStatistics, StatisticsRequest, WeightKeywords};
use local_norm::LocalNormalizationData;
use source::{FrameSource, ImageFileSource};

/// One entry of an input manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFile {
    pub path: PathBuf,
    /// Local normalization data sidecar (TOML).
    pub local_normalization: Option<PathBuf>,
    /// Drizzle data output path; defaults to `<path>.idd`.
    pub drizzle: Option<PathBuf>,
    /// Explicit weight for keyword weighting.
    pub weight: Option<f64>,
    /// Exposure time for exposure weighting.
    pub exposure: Option<f64>,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// An opened input frame plus its manifest data.
pub struct FrameInput {
    pub source: Box<dyn FrameSource>,
    pub keywords: WeightKeywords,
    pub local_normalization: Option<LocalNormalizationData>,
    pub drizzle_path: Option<PathBuf>,
}

impl FrameInput {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            keywords: WeightKeywords::default(),
            local_normalization: None,
            drizzle_path: None,
        }
    }

    /// Open an image file and load its local normalization sidecar, if any.
    pub fn open(input: &InputFile) -> Result<Self> {
        let source = ImageFileSource::open(&input.path)?;
        let local_normalization = input
            .local_normalization
            .as_deref()
            .map(LocalNormalizationData::load)
            .transpose()?;
        Ok(Self {
            source: Box::new(source),
            keywords: WeightKeywords {
                weight: input.weight,
                exposure: input.exposure,
            },
            local_normalization,
            drizzle_path: input.drizzle.clone(),
        })
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.keywords.weight = Some(weight);
        self
    }

    pub fn with_exposure(mut self, exposure: f64) -> Self {
        self.keywords.exposure = Some(exposure);
        self
    }

    pub fn with_local_normalization(mut self, data: LocalNormalizationData) -> Self {
        self.local_normalization = Some(data);
        self
    }

    pub fn with_drizzle_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.drizzle_path = Some(path.into());
        self
    }
}

/// An input frame taking part in an integration.
pub struct IntegrationFile {
    path: PathBuf,
    source: Mutex<Box<dyn FrameSource>>,
    pub statistics: Vec<ChannelStatistics>,
    pub estimates: Vec<ChannelEstimates>,
    pub local: Option<LocalNormalizationData>,
    pub adaptive: Option<AdaptiveNormalization>,
    pub drizzle_path: Option<PathBuf>,
    /// One map per channel covering the region of interest; empty until
    /// allocated.
    pub rejection_maps: Vec<Array2<u8>>,
}

impl IntegrationFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self, channel: usize, y0: usize, x0: usize, out: &mut Array2<f32>) -> Result<()> {
        let mut source = self
            .source
            .lock()
            .map_err(|_| IntegraError::Config(format!("{}: frame source poisoned", self.path.display())))?;
        source.read_rows(channel, y0, x0, out.view_mut())
    }
}

#[cfg(test)]
impl IntegrationFile {
    /// A placeholder frame carrying only the given estimates.
    pub(crate) fn with_estimates(estimates: Vec<ChannelEstimates>) -> Self {
        let source: Box<dyn FrameSource> =
            Box::new(source::MemorySource::mono("estimates", Array2::zeros((1, 1))).unwrap());
        Self {
            path: PathBuf::from("estimates"),
            source: Mutex::new(source),
            statistics: Vec::new(),
            estimates,
            local: None,
            adaptive: None,
            drizzle_path: None,
            rejection_maps: Vec::new(),
        }
    }
}

/// Rows `y0..y0 + rows` (relative to the region of interest) of one channel
/// of every file.
#[derive(Debug)]
pub struct Strip {
    pub channel: usize,
    pub y0: usize,
    pub rows: usize,
    /// `data[file]` is `rows` x ROI width.
    pub data: Vec<Array2<f32>>,
}

/// The set of frames being integrated.
pub struct FileSet {
    files: Vec<IntegrationFile>,
    geometry: ImageGeometry,
    roi: Roi,
    buffer_rows: usize,
    available_memory: u64,
    read_pool: rayon::ThreadPool,
}

fn needs_local(config: &IntegrationConfig) -> bool {
    config.normalization.mode == Normalization::Local
        || (config.rejection.algorithm.is_enabled() && config.rejection.normalization == RejectionNormalization::Local)
}

fn needs_adaptive(config: &IntegrationConfig) -> bool {
    config.normalization.mode == Normalization::Adaptive
        || (config.rejection.algorithm.is_enabled()
            && config.rejection.normalization == RejectionNormalization::Adaptive)
}

impl FileSet {
    /// Open and validate all frames, then compute per-file statistics,
    /// normalization data and weights.
    pub fn open(
        inputs: Vec<FrameInput>,
        config: &IntegrationConfig,
        cache: &mut StatisticsCache,
        cancel: &CancelToken,
    ) -> Result<Self> {
        config.validate()?;
        let found = inputs.len();
        if found < crate::consts::MIN_FRAMES {
            return Err(IntegraError::TooFewFrames {
                required: crate::consts::MIN_FRAMES,
                found,
            });
        }
        if let Rejection::LinearFit(_) = config.rejection.algorithm {
            let required = config.rejection.algorithm.min_frames();
            if found < required {
                return Err(IntegraError::Config(format!(
                    "linear fit clipping requires at least {required} images ({found} given)"
                )));
            }
        }

        let geometry = inputs[0].source.geometry();
        for input in &inputs[1..] {
            if input.source.geometry() != geometry {
                return Err(IntegraError::IncompatibleGeometry {
                    path: input.source.path().to_path_buf(),
                });
            }
        }

        let roi = match config.roi {
            Some(roi) => {
                roi.validate(geometry.width, geometry.height)?;
                roi
            }
            None => Roi {
                x0: 0,
                y0: 0,
                x1: geometry.width,
                y1: geometry.height,
            },
        };

        let want_local = needs_local(config);
        let want_adaptive = needs_adaptive(config);
        let request = StatisticsRequest::for_config(config);

        let mut files = Vec::with_capacity(found);
        let mut all_stats = Vec::with_capacity(found);
        let mut keywords = Vec::with_capacity(found);
        for (i, input) in inputs.into_iter().enumerate() {
            cancel.check()?;
            let FrameInput {
                mut source,
                keywords: kw,
                local_normalization,
                drizzle_path,
            } = input;
            let path = source.path().to_path_buf();

            let local = match local_normalization {
                Some(data) => {
                    data.validate(&path, geometry.width, geometry.height, geometry.channels)?;
                    Some(data)
                }
                None if want_local => return Err(IntegraError::MissingLocalNormalization { path }),
                None => None,
            };

            let (statistics, adaptive) = file_statistics(source.as_mut(), geometry, request, cache, want_adaptive, config)?;
            debug!(
                file = i,
                path = %path.display(),
                median = statistics.first().map(|s| s.median),
                "file statistics"
            );
            all_stats.push(statistics.clone());
            keywords.push(kw);
            files.push(IntegrationFile {
                path,
                source: Mutex::new(source),
                statistics,
                estimates: Vec::new(),
                local,
                adaptive,
                drizzle_path,
                rejection_maps: Vec::new(),
            });
        }

        let paths: Vec<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        let estimates = derive_estimates(&paths, &all_stats, &keywords, config)?;
        for (file, est) in files.iter_mut().zip(estimates) {
            file.estimates = est;
        }

        let available_memory = memory::available_memory(&config.memory);
        let buffer_rows = memory::buffer_rows(&config.memory, available_memory, found, roi.width(), roi.height());
        let read_threads = config.memory.max_file_read_threads.clamp(1, found);
        let read_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(read_threads)
            .build()
            .map_err(|e| IntegraError::ResourceExhausted(format!("file reader threads: {e}")))?;

        info!(
            files = found,
            width = geometry.width,
            height = geometry.height,
            channels = geometry.channels,
            buffer_rows,
            available_mb = available_memory / (1024 * 1024),
            "file set opened"
        );

        Ok(Self {
            files,
            geometry,
            roi,
            buffer_rows,
            available_memory,
            read_pool,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[IntegrationFile] {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut [IntegrationFile] {
        &mut self.files
    }

    pub fn file(&self, i: usize) -> &IntegrationFile {
        &self.files[i]
    }

    /// Geometry of the input frames.
    pub fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    /// Width of the integrated region.
    pub fn width(&self) -> usize {
        self.roi.width()
    }

    /// Height of the integrated region.
    pub fn height(&self) -> usize {
        self.roi.height()
    }

    pub fn channels(&self) -> usize {
        self.geometry.channels
    }

    pub fn buffer_rows(&self) -> usize {
        self.buffer_rows
    }

    pub fn available_memory(&self) -> u64 {
        self.available_memory
    }

    /// Read rows `y0..y0 + rows` of the region of interest for all files,
    /// in parallel over files.
    pub fn read_strip(&self, channel: usize, y0: usize, rows: usize) -> Result<Strip> {
        let width = self.width();
        let (x0, abs_y0) = (self.roi.x0, self.roi.y0 + y0);
        let data = self.read_pool.install(|| {
            self.files
                .par_iter()
                .map(|file| {
                    let mut buf = Array2::<f32>::zeros((rows, width));
                    file.read_rows(channel, abs_y0, x0, &mut buf)?;
                    Ok(buf)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(Strip {
            channel,
            y0,
            rows,
            data,
        })
    }

    /// Allocate zeroed rejection maps for every file and channel, once.
    pub fn ensure_rejection_maps(&mut self) {
        let (h, w, channels) = (self.height(), self.width(), self.channels());
        for file in &mut self.files {
            if file.rejection_maps.len() != channels {
                file.rejection_maps = vec![Array2::zeros((h, w)); channels];
            }
        }
    }

    /// Rejection map of `file` for `channel` embedded in a full-frame map.
    pub fn full_frame_map(&self, file: usize, channel: usize) -> Option<Array2<u8>> {
        let map = self.files[file].rejection_maps.get(channel)?;
        let mut full = Array2::<u8>::zeros((self.geometry.height, self.geometry.width));
        full.slice_mut(s![self.roi.y0..self.roi.y1, self.roi.x0..self.roi.x1])
            .assign(map);
        Some(full)
    }
}

/// Statistics of all channels of one frame, through the cache, plus adaptive
/// normalization data when requested.
fn file_statistics(
    source: &mut dyn FrameSource,
    geometry: ImageGeometry,
    request: StatisticsRequest,
    cache: &mut StatisticsCache,
    want_adaptive: bool,
    config: &IntegrationConfig,
) -> Result<(Vec<ChannelStatistics>, Option<AdaptiveNormalization>)> {
    let path = source.path().to_path_buf();
    let signature = source.signature();
    let cached = signature
        .and_then(|sig| cache.get(&path, sig))
        .filter(|channels| channels.len() == geometry.channels && channels.iter().all(|c| c.satisfies(request)))
        .map(<[ChannelStatistics]>::to_vec);

    if let (Some(statistics), false) = (&cached, want_adaptive) {
        debug!(path = %path.display(), "statistics cache hit");
        return Ok((statistics.clone(), None));
    }

    let mut planes = Vec::with_capacity(geometry.channels);
    for c in 0..geometry.channels {
        planes.push(source.read_channel(c)?);
    }
    let statistics = match cached {
        Some(statistics) => statistics,
        None => {
            let statistics: Vec<ChannelStatistics> = planes
                .par_iter()
                .map(|plane| ChannelStatistics::compute(plane, request))
                .collect();
            if let Some(sig) = signature {
                cache.insert(&path, sig, statistics.clone());
            }
            statistics
        }
    };
    let adaptive = if want_adaptive {
        Some(AdaptiveNormalization::compute(
            &path,
            &planes,
            config.normalization.adaptive_grid_size,
        )?)
    } else {
        None
    };
    Ok((statistics, adaptive))
}
