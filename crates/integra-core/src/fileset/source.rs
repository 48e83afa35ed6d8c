use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ndarray::{s, Array2, ArrayViewMut2};
use serde::{Deserialize, Serialize};

use crate::error::{IntegraError, Result};
use crate::io::image_io::{load_planes, read_geometry, ImageGeometry};

/// Identifies the version of a file on disk for the statistics cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub size: u64,
    pub modified_ns: u64,
}

impl FileSignature {
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        let modified = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
        Some(Self {
            size: meta.len(),
            modified_ns: u64::try_from(modified.as_nanos()).ok()?,
        })
    }
}

/// Pixel provider for one input frame.
///
/// The engine only needs the geometry and rectangular row reads of a single
/// channel; decoding, scaling and format details stay behind this trait.
pub trait FrameSource: Send {
    fn path(&self) -> &Path;
    fn geometry(&self) -> ImageGeometry;

    /// Fill `out` with rows `y0..y0 + out.nrows()` and columns
    /// `x0..x0 + out.ncols()` of `channel`.
    fn read_rows(&mut self, channel: usize, y0: usize, x0: usize, out: ArrayViewMut2<f32>) -> Result<()>;

    /// Whole channel, used for statistics.
    fn read_channel(&mut self, channel: usize) -> Result<Array2<f32>> {
        let g = self.geometry();
        let mut out = Array2::<f32>::zeros((g.height, g.width));
        self.read_rows(channel, 0, 0, out.view_mut())?;
        Ok(out)
    }

    fn signature(&self) -> Option<FileSignature> {
        None
    }
}

fn check_window(path: &Path, g: ImageGeometry, channel: usize, y0: usize, x0: usize, out: &ArrayViewMut2<f32>) -> Result<()> {
    let (h, w) = out.dim();
    if channel >= g.channels || y0 + h > g.height || x0 + w > g.width {
        return Err(IntegraError::Config(format!(
            "{}: read outside the image (channel {channel}, rows {y0}..{}, columns {x0}..{})",
            path.display(),
            y0 + h,
            x0 + w
        )));
    }
    Ok(())
}

/// Frame held in memory, one plane per channel.
#[derive(Clone, Debug)]
pub struct MemorySource {
    path: PathBuf,
    planes: Vec<Array2<f32>>,
}

impl MemorySource {
    pub fn new(path: impl Into<PathBuf>, planes: Vec<Array2<f32>>) -> Result<Self> {
        let path = path.into();
        let first = planes.first().ok_or_else(|| {
            IntegraError::Config(format!("{}: frame without channels", path.display()))
        })?;
        if first.is_empty() || planes.iter().any(|p| p.dim() != first.dim()) {
            return Err(IntegraError::IncompatibleGeometry { path });
        }
        Ok(Self { path, planes })
    }

    pub fn mono(path: impl Into<PathBuf>, plane: Array2<f32>) -> Result<Self> {
        Self::new(path, vec![plane])
    }
}

impl FrameSource for MemorySource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn geometry(&self) -> ImageGeometry {
        let (h, w) = self.planes[0].dim();
        ImageGeometry {
            width: w,
            height: h,
            channels: self.planes.len(),
        }
    }

    fn read_rows(&mut self, channel: usize, y0: usize, x0: usize, mut out: ArrayViewMut2<f32>) -> Result<()> {
        check_window(&self.path, self.geometry(), channel, y0, x0, &out)?;
        let (h, w) = out.dim();
        out.assign(&self.planes[channel].slice(s![y0..y0 + h, x0..x0 + w]));
        Ok(())
    }

    fn read_channel(&mut self, channel: usize) -> Result<Array2<f32>> {
        self.planes
            .get(channel)
            .cloned()
            .ok_or_else(|| IntegraError::Config(format!("{}: no channel {channel}", self.path.display())))
    }
}

/// Image file decoded through the `image` crate.
///
/// The header is read on open; pixels are decoded on first access and kept
/// until the source is dropped.
pub struct ImageFileSource {
    path: PathBuf,
    geometry: ImageGeometry,
    planes: Option<Vec<Array2<f32>>>,
}

impl ImageFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let geometry = read_geometry(path)?;
        if geometry.width == 0 || geometry.height == 0 {
            return Err(IntegraError::IncompatibleGeometry {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            geometry,
            planes: None,
        })
    }

    fn planes(&mut self) -> Result<&[Array2<f32>]> {
        if self.planes.is_none() {
            tracing::debug!(path = %self.path.display(), "decoding frame");
            self.planes = Some(load_planes(&self.path)?);
        }
        Ok(self.planes.as_deref().unwrap_or_default())
    }
}

impl FrameSource for ImageFileSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    fn read_rows(&mut self, channel: usize, y0: usize, x0: usize, mut out: ArrayViewMut2<f32>) -> Result<()> {
        check_window(&self.path, self.geometry, channel, y0, x0, &out)?;
        let (h, w) = out.dim();
        let planes = self.planes()?;
        out.assign(&planes[channel].slice(s![y0..y0 + h, x0..x0 + w]));
        Ok(())
    }

    fn signature(&self) -> Option<FileSignature> {
        FileSignature::of(&self.path)
    }
}
