use ndarray::Array2;

use super::build_rows;
use crate::consts::B3_KERNEL;

/// Decompose an image into à trous wavelet detail layers plus residual.
///
/// The original is the sum of all detail layers and the residual.
pub fn decompose(data: &Array2<f32>, num_layers: usize) -> (Vec<Array2<f32>>, Array2<f32>) {
    let mut layers = Vec::with_capacity(num_layers);
    let mut current = data.clone();

    for scale in 0..num_layers {
        let smoothed = atrous_convolve(&current, scale);
        let detail = &current - &smoothed;
        layers.push(detail);
        current = smoothed;
    }

    (layers, current)
}

/// B3 spline smoothing at a given scale.
///
/// The kernel is applied separably with holes of 2^scale pixels.
pub fn atrous_convolve(data: &Array2<f32>, scale: usize) -> Array2<f32> {
    let step = 1usize << scale;
    let row_convolved = convolve_rows(data, step);
    convolve_cols(&row_convolved, step)
}

fn convolve_rows(data: &Array2<f32>, step: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    build_rows(h, w, |row, col| {
        let mut sum = 0.0f32;
        for (ki, &kv) in B3_KERNEL.iter().enumerate() {
            let src = col as isize + (ki as isize - 2) * step as isize;
            sum += data[[row, mirror_index(src, w)]] * kv;
        }
        sum
    })
}

fn convolve_cols(data: &Array2<f32>, step: usize) -> Array2<f32> {
    let (h, w) = data.dim();
    build_rows(h, w, |row, col| {
        let mut sum = 0.0f32;
        for (ki, &kv) in B3_KERNEL.iter().enumerate() {
            let src = row as isize + (ki as isize - 2) * step as isize;
            sum += data[[mirror_index(src, h), col]] * kv;
        }
        sum
    })
}

/// Reflect an index into [0, size), ping-ponging with period 2*size.
pub fn mirror_index(idx: isize, size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let period = 2 * size;
    let m = idx.unsigned_abs() % period;
    if m < size {
        m
    } else {
        2 * size - 1 - m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_sum_to_original() {
        let data = Array2::from_shape_fn((24, 31), |(r, c)| ((r * 7 + c * 3) % 11) as f32 / 11.0);
        let (layers, residual) = decompose(&data, 3);
        let mut sum = residual;
        for l in &layers {
            sum += l;
        }
        for (a, b) in sum.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn mirror_reflects() {
        assert_eq!(mirror_index(-1, 5), 1);
        assert_eq!(mirror_index(5, 5), 4);
        assert_eq!(mirror_index(2, 5), 2);
        assert_eq!(mirror_index(3, 1), 0);
    }
}
