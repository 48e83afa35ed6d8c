//! Large-scale rejection over whole rejection maps.
//!
//! Statistical rejection flags pixels one stack at a time. Extended
//! structures such as satellite trails or airplane lights leave halos that
//! stay below the per-pixel thresholds; this pass grows the rejected regions
//! that are larger than a protected scale.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::consts::{MAP_HIGH, MAP_LARGE_SCALE_HIGH, MAP_LARGE_SCALE_LOW, MAP_LOW};
use crate::error::{IntegraError, Result};
use crate::fileset::IntegrationFile;
use crate::pipeline::config::{IntegrationConfig, LargeScaleSide, MemoryConfig};
use crate::pipeline::memory::large_scale_workers;
use crate::transform::median::mmt_residual;
use crate::transform::morphology::dilate_circular;

/// Pixels newly rejected by the large-scale pass in one file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LargeScaleCounts {
    pub low: usize,
    pub high: usize,
}

/// One side of the large-scale pass: the statistical bit it grows and the
/// bit it sets.
#[derive(Clone, Debug)]
pub struct LargeScalePass {
    pub side: LargeScaleSide,
    pub source_bit: u8,
    pub target_bit: u8,
}

impl LargeScalePass {
    pub fn low(side: &LargeScaleSide) -> Self {
        Self {
            side: side.clone(),
            source_bit: MAP_LOW,
            target_bit: MAP_LARGE_SCALE_LOW,
        }
    }

    pub fn high(side: &LargeScaleSide) -> Self {
        Self {
            side: side.clone(),
            source_bit: MAP_HIGH,
            target_bit: MAP_LARGE_SCALE_HIGH,
        }
    }

    fn layers(&self) -> usize {
        self.side.protected_layers.max(1)
    }
}

/// Passes enabled by a configuration, low side first.
pub fn passes_for(config: &IntegrationConfig) -> Vec<LargeScalePass> {
    let mut passes = Vec::new();
    if config.large_scale_low() {
        passes.push(LargeScalePass::low(&config.large_scale.low));
    }
    if config.large_scale_high() {
        passes.push(LargeScalePass::high(&config.large_scale.high));
    }
    passes
}

/// Grow one side of a rejection map. Returns the number of grown pixels
/// that had neither statistical bit set before.
pub fn grow_rejection(map: &mut Array2<u8>, pass: &LargeScalePass) -> usize {
    let mask = map.mapv(|b| if b & pass.source_bit != 0 { 1.0f32 } else { 0.0 });
    let large = mmt_residual(&mask, pass.layers()).mapv(|v| v > 0.0);
    let grown = dilate_circular(&large, pass.side.growth);

    let mut added = 0;
    for (b, &g) in map.iter_mut().zip(grown.iter()) {
        if g {
            if *b & (MAP_LOW | MAP_HIGH) == 0 {
                added += 1;
            }
            *b |= pass.target_bit;
        }
    }
    added
}

/// Run the large-scale passes on the `channel` maps of every file.
///
/// Files are processed in parallel by a pool sized from the memory budget.
pub fn large_scale_reject(
    files: &mut [IntegrationFile],
    channel: usize,
    passes: &[LargeScalePass],
    memory: &MemoryConfig,
    available_memory: u64,
    cancel: &CancelToken,
) -> Result<Vec<LargeScaleCounts>> {
    if passes.is_empty() {
        return Ok(vec![LargeScaleCounts::default(); files.len()]);
    }
    let pixels = files
        .first()
        .and_then(|f| f.rejection_maps.get(channel))
        .map_or(0, |m| m.len());
    let layers = passes.iter().map(LargeScalePass::layers).max().unwrap_or(1);
    let workers = large_scale_workers(memory, available_memory, pixels, layers).min(files.len().max(1));
    debug!(channel, workers, layers, "large-scale rejection");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| IntegraError::ResourceExhausted(format!("large-scale rejection threads: {e}")))?;

    pool.install(|| {
        files
            .par_iter_mut()
            .map(|file| {
                cancel.check()?;
                let mut counts = LargeScaleCounts::default();
                let Some(map) = file.rejection_maps.get_mut(channel) else {
                    return Ok(counts);
                };
                for pass in passes {
                    let added = grow_rejection(map, pass);
                    if pass.target_bit == MAP_LARGE_SCALE_LOW {
                        counts.low += added;
                    } else {
                        counts.high += added;
                    }
                }
                Ok(counts)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::MAP_RANGE_LOW;

    fn side(layers: usize, growth: usize) -> LargeScaleSide {
        LargeScaleSide {
            enabled: true,
            protected_layers: layers,
            growth,
        }
    }

    #[test]
    fn isolated_rejections_do_not_grow() {
        let mut map = Array2::<u8>::zeros((16, 16));
        map[[4, 4]] = MAP_HIGH;
        map[[10, 12]] = MAP_HIGH;
        let before = map.clone();
        let added = grow_rejection(&mut map, &LargeScalePass::high(&side(2, 2)));
        assert_eq!(added, 0);
        assert_eq!(map, before);
    }

    #[test]
    fn extended_rejection_grows_and_keeps_old_bits() {
        let mut map = Array2::<u8>::zeros((32, 32));
        for r in 10..20 {
            for c in 10..20 {
                map[[r, c]] = MAP_LOW;
            }
        }
        map[[0, 0]] = MAP_HIGH;
        let added = grow_rejection(&mut map, &LargeScalePass::low(&side(1, 2)));
        assert!(added > 0);
        assert_eq!(map[[15, 15]], MAP_LOW | MAP_LARGE_SCALE_LOW);
        assert_eq!(map[[9, 15]], MAP_LARGE_SCALE_LOW);
        assert_eq!(map[[0, 0]], MAP_HIGH);
        assert_eq!(map[[25, 25]], 0);
    }

    fn low_block(map: &mut Array2<u8>) {
        for r in 10..20 {
            for c in 10..20 {
                map[[r, c]] = MAP_LOW;
            }
        }
    }

    #[test]
    fn range_rejected_pixels_count_as_new() {
        let pass = LargeScalePass::low(&side(1, 2));
        let mut plain = Array2::<u8>::zeros((32, 32));
        low_block(&mut plain);
        let expected = grow_rejection(&mut plain, &pass);

        let mut ranged = Array2::<u8>::zeros((32, 32));
        low_block(&mut ranged);
        ranged[[9, 15]] = MAP_RANGE_LOW;
        assert_eq!(grow_rejection(&mut ranged, &pass), expected);
        assert_eq!(ranged[[9, 15]], MAP_RANGE_LOW | MAP_LARGE_SCALE_LOW);
    }

    #[test]
    fn second_side_counts_pixels_grown_by_the_first() {
        let mut map = Array2::<u8>::zeros((32, 32));
        for r in 10..20 {
            for c in 10..20 {
                map[[r, c]] = if c < 15 { MAP_LOW } else { MAP_HIGH };
            }
        }
        grow_rejection(&mut map, &LargeScalePass::low(&side(1, 2)));
        assert_eq!(map[[9, 12]], MAP_LARGE_SCALE_LOW);
        let mut high_only = map.mapv(|b| b & !MAP_LARGE_SCALE_LOW);
        let added = grow_rejection(&mut map, &LargeScalePass::high(&side(1, 2)));
        assert_eq!(added, grow_rejection(&mut high_only, &LargeScalePass::high(&side(1, 2))));
    }
}
