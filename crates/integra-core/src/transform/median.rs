use ndarray::Array2;

use super::atrous::mirror_index;
use super::build_rows;

/// Square median filter of size `2*radius + 1` with mirrored borders.
pub fn median_filter(data: &Array2<f32>, radius: usize) -> Array2<f32> {
    if radius == 0 {
        return data.clone();
    }
    let (h, w) = data.dim();
    let r = radius as isize;
    let size = (2 * radius + 1) * (2 * radius + 1);
    build_rows(h, w, |row, col| {
        let mut window = Vec::with_capacity(size);
        for dr in -r..=r {
            let y = mirror_index(row as isize + dr, h);
            for dc in -r..=r {
                window.push(data[[y, mirror_index(col as isize + dc, w)]]);
            }
        }
        let k = window.len() / 2;
        *window.select_nth_unstable_by(k, |a, b| a.total_cmp(b)).1
    })
}

/// Multiscale median transform with every detail layer discarded.
///
/// Layer `j` is the difference between successive median filterings with
/// windows 3, 5, 9, 17, ... (radius 2^j); the returned residual keeps only
/// structures larger than the last window.
pub fn mmt_residual(data: &Array2<f32>, num_layers: usize) -> Array2<f32> {
    let mut current = data.clone();
    for j in 0..num_layers {
        current = median_filter(&current, 1usize << j);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_isolated_pixels() {
        let mut mask = Array2::<f32>::zeros((20, 20));
        mask[[5, 5]] = 1.0;
        mask[[12, 3]] = 1.0;
        let res = mmt_residual(&mask, 1);
        assert!(res.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn keeps_large_blocks() {
        let mut mask = Array2::<f32>::zeros((40, 40));
        for r in 10..30 {
            for c in 10..30 {
                mask[[r, c]] = 1.0;
            }
        }
        let res = mmt_residual(&mask, 2);
        assert_eq!(res[[20, 20]], 1.0);
        assert_eq!(res[[0, 0]], 0.0);
    }
}
