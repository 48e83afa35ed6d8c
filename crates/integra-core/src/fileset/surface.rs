use serde::{Deserialize, Serialize};

/// A smooth function over the image plane sampled on a regular grid of cell
/// centers and evaluated by bilinear interpolation.
///
/// Outside the outermost centers the nearest edge value is extended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSurface {
    pub width: usize,
    pub height: usize,
    pub cols: usize,
    pub rows: usize,
    /// Row-major, `rows * cols` samples.
    pub values: Vec<f64>,
}

impl GridSurface {
    pub fn new(width: usize, height: usize, cols: usize, rows: usize, values: Vec<f64>) -> Option<Self> {
        (cols > 0 && rows > 0 && values.len() == cols * rows && width > 0 && height > 0).then_some(Self {
            width,
            height,
            cols,
            rows,
            values,
        })
    }

    /// Map an image coordinate to fractional grid coordinates.
    fn grid_coord(pos: f64, extent: usize, cells: usize) -> (usize, usize, f64) {
        let cell = extent as f64 / cells as f64;
        let g = (pos + 0.5) / cell - 0.5;
        if cells == 1 || g <= 0.0 {
            return (0, 0, 0.0);
        }
        let last = (cells - 1) as f64;
        if g >= last {
            return (cells - 1, cells - 1, 0.0);
        }
        let i0 = g.floor() as usize;
        (i0, i0 + 1, g - i0 as f64)
    }

    pub fn at(&self, x: usize, y: usize) -> f64 {
        let (c0, c1, fx) = Self::grid_coord(x as f64, self.width, self.cols);
        let (r0, r1, fy) = Self::grid_coord(y as f64, self.height, self.rows);
        let v = |r: usize, c: usize| self.values[r * self.cols + c];
        let top = v(r0, c0) * (1.0 - fx) + v(r0, c1) * fx;
        let bottom = v(r1, c0) * (1.0 - fx) + v(r1, c1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_surface() {
        let s = GridSurface::new(100, 50, 4, 2, vec![0.3; 8]).unwrap();
        assert!((s.at(0, 0) - 0.3).abs() < 1e-12);
        assert!((s.at(99, 49) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn interpolates_between_centers() {
        // centers at x = 25 and x = 75 (minus half a pixel)
        let s = GridSurface::new(100, 10, 2, 1, vec![0.0, 1.0]).unwrap();
        assert_eq!(s.at(0, 5), 0.0);
        assert_eq!(s.at(99, 5), 1.0);
        let mid = s.at(50, 5);
        assert!(mid > 0.45 && mid < 0.55, "mid = {mid}");
    }
}
