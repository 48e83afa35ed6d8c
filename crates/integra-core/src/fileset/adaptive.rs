use std::path::Path;

use ndarray::{s, Array2};

use super::surface::GridSurface;
use crate::consts::{STATS_RANGE_HIGH, STATS_RANGE_LOW};
use crate::error::{IntegraError, Result};
use crate::math::stats::{median, two_sided_mad, TwoSided};

/// Interpolated location and two-sided scale surfaces of one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptiveChannel {
    pub location: GridSurface,
    pub scale_low: GridSurface,
    pub scale_high: GridSurface,
}

impl AdaptiveChannel {
    pub fn location(&self, x: usize, y: usize) -> f64 {
        self.location.at(x, y)
    }

    pub fn scale(&self, x: usize, y: usize) -> TwoSided {
        TwoSided::new(self.scale_low.at(x, y), self.scale_high.at(x, y))
    }
}

/// Adaptive normalization data of one frame: median and two-sided MAD over a
/// grid of cells, one set of surfaces per channel.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct AdaptiveNormalization {
    pub channels: Vec<AdaptiveChannel>,
}

/// Grid dimensions for a frame: `grid_size` cells along the larger axis,
/// proportionally fewer along the other, both clamped to [2, 16].
pub fn grid_dimensions(width: usize, height: usize, grid_size: usize) -> (usize, usize) {
    let g = grid_size.clamp(2, 16);
    if width >= height {
        let ny = (g as f64 * height as f64 / width as f64).round() as usize;
        (g, ny.clamp(2, 16))
    } else {
        let nx = (g as f64 * width as f64 / height as f64).round() as usize;
        (nx.clamp(2, 16), g)
    }
}

impl AdaptiveNormalization {
    pub fn compute(path: &Path, planes: &[Array2<f32>], grid_size: usize) -> Result<Self> {
        let mut channels = Vec::with_capacity(planes.len());
        for (c, plane) in planes.iter().enumerate() {
            let (h, w) = plane.dim();
            if h == 0 || w == 0 {
                return Err(IntegraError::Config(format!(
                    "{}: adaptive normalization of an empty image (c={c})",
                    path.display()
                )));
            }
            let (nx, ny) = grid_dimensions(w, h, grid_size);
            let dx = (w / nx).max(1);
            let dy = (h / ny).max(1);
            let mut loc = Vec::with_capacity(nx * ny);
            let mut s0 = Vec::with_capacity(nx * ny);
            let mut s1 = Vec::with_capacity(nx * ny);
            for i in 0..ny {
                let y0 = (i * dy).min(h - 1);
                let y1 = if i + 1 == ny { h } else { (y0 + dy).min(h) };
                for j in 0..nx {
                    let x0 = (j * dx).min(w - 1);
                    let x1 = if j + 1 == nx { w } else { (x0 + dx).min(w) };
                    let mut cell: Vec<f64> = plane
                        .slice(s![y0..y1, x0..x1])
                        .iter()
                        .map(|&v| v as f64)
                        .filter(|&v| v > STATS_RANGE_LOW && v < STATS_RANGE_HIGH)
                        .collect();
                    let m = median(&mut cell);
                    cell.sort_by(|a, b| a.total_cmp(b));
                    let mad = two_sided_mad(&cell, m);
                    if cell.is_empty() || !mad.is_significant() {
                        return Err(IntegraError::Config(format!(
                            "{}: adaptive normalization: zero or insignificant signal detected \
                             (x0={x0} y0={y0} x1={x1} y1={y1} c={c})",
                            path.display()
                        )));
                    }
                    loc.push(m);
                    s0.push(mad.low);
                    s1.push(mad.high);
                }
            }
            let surface = |v: Vec<f64>| {
                GridSurface::new(w, h, nx, ny, v).ok_or_else(|| {
                    IntegraError::Config(format!("{}: invalid adaptive normalization grid", path.display()))
                })
            };
            channels.push(AdaptiveChannel {
                location: surface(loc)?,
                scale_low: surface(s0)?,
                scale_high: surface(s1)?,
            });
        }
        Ok(Self { channels })
    }
}
