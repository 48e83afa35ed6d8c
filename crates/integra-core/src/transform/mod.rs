pub mod atrous;
pub mod median;
pub mod morphology;

use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Build an `h`x`w` array from a per-pixel function, row-parallel for large
/// images.
pub(crate) fn build_rows<T, F>(h: usize, w: usize, f: F) -> Array2<T>
where
    T: Copy + Default + Send,
    F: Fn(usize, usize) -> T + Sync,
{
    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let rows: Vec<Vec<T>> = (0..h)
            .into_par_iter()
            .map(|row| (0..w).map(|col| f(row, col)).collect())
            .collect();
        let flat: Vec<T> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((h, w), flat).unwrap_or_else(|_| Array2::from_elem((h, w), T::default()))
    } else {
        Array2::from_shape_fn((h, w), |(row, col)| f(row, col))
    }
}
