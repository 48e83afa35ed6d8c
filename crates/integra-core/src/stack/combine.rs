use crate::math::stats::median;
use crate::pipeline::config::Combination;

use super::{RejectionMatrix, StackEntry};

/// Combine the output samples of one stack.
///
/// The first `count` entries are the survivors. When nothing survives the
/// result is the median of every sample, rejected or not. `weights` is
/// indexed by file.
pub fn combine_stack(stack: &[StackEntry], count: usize, combination: Combination, weights: &[f64]) -> f64 {
    if count == 0 {
        let mut all: Vec<f64> = stack.iter().map(|e| e.raw).collect();
        return median(&mut all);
    }
    let live = &stack[..count];
    match combination {
        Combination::Average => {
            let (mut sum, mut wsum) = (0.0, 0.0);
            for e in live {
                let w = weights[e.index];
                sum += w * e.raw;
                wsum += w;
            }
            sum / wsum
        }
        Combination::Median => {
            let mut raw: Vec<f64> = live.iter().map(|e| e.raw).collect();
            median(&mut raw)
        }
        Combination::Minimum => live.iter().map(|e| e.raw).fold(f64::INFINITY, f64::min),
        Combination::Maximum => live.iter().map(|e| e.raw).fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Combine every stack of a row into `out`.
pub fn combine_row(matrix: &RejectionMatrix, combination: Combination, weights: &[f64], out: &mut [f64]) {
    for (x, o) in out.iter_mut().enumerate().take(matrix.width()) {
        *o = combine_stack(matrix.stack(x), matrix.count(x), combination, weights);
    }
}
