//! Row-strip integration of one channel.
//!
//! Each strip of rows is read for all files, split into chunks bounded by
//! the stack memory budget, and each chunk is spread over the worker pool in
//! contiguous row ranges. Workers keep their own stacks and counters; results
//! are written into the outputs on the calling thread after the join.

use std::sync::Arc;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::consts::{MAP_HIGH, MAP_LARGE_SCALE_HIGH, MAP_LARGE_SCALE_LOW, MAP_LOW, MAP_RANGE_HIGH, MAP_RANGE_LOW};
use crate::error::Result;
use crate::fileset::{FileSet, IntegrationFile, Strip};
use crate::stack::combine::combine_row;
use crate::stack::large_scale::{large_scale_reject, passes_for};
use crate::stack::loader::load_row;
use crate::stack::normalize::{normalize_output_row, normalize_rejection_row, RowPosition};
use crate::stack::reject::Rejector;
use crate::stack::{live_count, sort_stack, RejectionMatrix};

use super::config::{IntegrationConfig, Rejection};
use super::memory::{optimal_thread_loads, rows_per_chunk, stack_row_bytes};
use super::output::{IntegratedImage, RejectionFractionMaps};
use super::report::RejectionCounters;
use super::types::{IntegrationStage, ProgressReporter};

/// Output buffers shared by every channel of a run.
pub(super) struct Outputs {
    pub image: Option<IntegratedImage>,
    pub fractions: Option<RejectionFractionMaps>,
    pub slopes: Option<Vec<Array2<f32>>>,
}

/// What one channel pass produced besides the outputs.
pub(super) struct ChannelRun {
    pub counters: RejectionCounters,
    pub overflow: bool,
}

/// Results of one row, computed by a worker.
struct RowResult {
    /// Row index inside the region of interest.
    y: usize,
    combined: Option<Vec<f64>>,
    low_fraction: Option<Vec<f32>>,
    high_fraction: Option<Vec<f32>>,
    slopes: Option<Vec<f32>>,
    /// `files * width` map bytes, file-major.
    bits: Option<Vec<u8>>,
}

/// Read-only context of a channel pass.
struct RowContext<'a> {
    files: &'a [IntegrationFile],
    config: &'a IntegrationConfig,
    channel: usize,
    x0: usize,
    roi_y0: usize,
    width: usize,
    combine: bool,
    fractions: bool,
    maps: bool,
}

impl RowContext<'_> {
    fn position(&self, y: usize) -> RowPosition {
        RowPosition {
            channel: self.channel,
            x0: self.x0,
            y: self.roi_y0 + y,
        }
    }

    fn fraction_bits(&self) -> (u8, u8) {
        let mut low = MAP_LOW | MAP_LARGE_SCALE_LOW;
        let mut high = MAP_HIGH | MAP_LARGE_SCALE_HIGH;
        if self.config.range.map_range_rejection {
            low |= MAP_RANGE_LOW;
            high |= MAP_RANGE_HIGH;
        }
        (low, high)
    }

    /// Fractions of each stack flagged with the low and high bit sets.
    fn fractions_of(&self, matrix: &RejectionMatrix) -> (Vec<f32>, Vec<f32>) {
        let (low_bits, high_bits) = self.fraction_bits();
        let n = matrix.files() as f32;
        let mut low = vec![0.0f32; self.width];
        let mut high = vec![0.0f32; self.width];
        for x in 0..self.width {
            for e in matrix.stack(x) {
                let bits = e.map_bits();
                if bits & low_bits != 0 {
                    low[x] += 1.0;
                }
                if bits & high_bits != 0 {
                    high[x] += 1.0;
                }
            }
            low[x] /= n;
            high[x] /= n;
        }
        (low, high)
    }

    fn map_bits_of(&self, matrix: &RejectionMatrix) -> Vec<u8> {
        let mut bits = vec![0u8; matrix.files() * self.width];
        for x in 0..self.width {
            for e in matrix.stack(x) {
                bits[e.index * self.width + x] = e.map_bits();
            }
        }
        bits
    }

    /// First pass over one row: normalization, rejection and, unless the
    /// large-scale pass follows, combination.
    fn reject_row(
        &self,
        matrix: &mut RejectionMatrix,
        rejector: &mut Rejector,
        counters: &mut RejectionCounters,
        strip: &Strip,
        r: usize,
        weights: &[f64],
    ) -> RowResult {
        let y = strip.y0 + r;
        let pos = self.position(y);
        load_row(matrix, strip, r);
        normalize_output_row(matrix, self.files, &self.config.normalization, pos);
        if rejector.is_enabled() {
            rejector.range_reject(matrix);
            normalize_rejection_row(
                matrix,
                self.files,
                self.config.rejection.normalization,
                self.config.normalization.adaptive_no_scale,
                pos,
            );
            rejector.reject(matrix);
        }
        for e in matrix.entries().iter().filter(|e| e.is_rejected()) {
            counters.record(e);
        }

        let combined = self.combine.then(|| {
            let mut out = vec![0.0; self.width];
            combine_row(matrix, self.config.combination, weights, &mut out);
            out
        });
        let (low_fraction, high_fraction) = if self.fractions {
            let (l, h) = self.fractions_of(matrix);
            (Some(l), Some(h))
        } else {
            (None, None)
        };
        RowResult {
            y,
            combined,
            low_fraction,
            high_fraction,
            slopes: matrix.slopes().map(<[f32]>::to_vec),
            bits: self.maps.then(|| self.map_bits_of(matrix)),
        }
    }

    /// Map-driven pass over one row: only samples whose map byte is clear
    /// take part in the combination.
    fn combine_masked_row(&self, matrix: &mut RejectionMatrix, strip: &Strip, r: usize, weights: &[f64]) -> RowResult {
        let y = strip.y0 + r;
        load_row(matrix, strip, r);
        normalize_output_row(matrix, self.files, &self.config.normalization, self.position(y));
        for x in 0..self.width {
            let stack = matrix.stack_mut(x);
            for e in stack.iter_mut() {
                let bits = self.files[e.index].rejection_maps[self.channel][[y, x]];
                e.reject_low = bits & (MAP_LOW | MAP_LARGE_SCALE_LOW) != 0;
                e.reject_high = bits & (MAP_HIGH | MAP_LARGE_SCALE_HIGH) != 0;
                e.reject_range_low = bits & MAP_RANGE_LOW != 0;
                e.reject_range_high = bits & MAP_RANGE_HIGH != 0;
            }
            sort_stack(stack);
            let n = live_count(stack);
            matrix.set_count(x, n);
        }

        let mut out = vec![0.0; self.width];
        combine_row(matrix, self.config.combination, weights, &mut out);
        let (low_fraction, high_fraction) = if self.fractions {
            let (l, h) = self.fractions_of(matrix);
            (Some(l), Some(h))
        } else {
            (None, None)
        };
        RowResult {
            y,
            combined: Some(out),
            low_fraction,
            high_fraction,
            slopes: None,
            bits: None,
        }
    }
}

fn with_slopes(config: &IntegrationConfig) -> bool {
    matches!(config.rejection.algorithm, Rejection::LinearFit(_))
}

/// Process the rows of a strip in memory-bounded chunks spread over the
/// worker pool.
fn process_strip<F>(
    ctx: &RowContext<'_>,
    strip: &Strip,
    chunk_rows: usize,
    counters: &mut RejectionCounters,
    row_fn: F,
) -> Vec<RowResult>
where
    F: Fn(&RowContext<'_>, &mut RejectionMatrix, &mut Rejector, &mut RejectionCounters, &Strip, usize) -> RowResult
        + Sync,
{
    let files = ctx.files.len();
    let slopes = with_slopes(ctx.config);
    let threads = rayon::current_num_threads();
    let mut results = Vec::with_capacity(strip.rows);
    let mut start = 0;
    while start < strip.rows {
        let rows = chunk_rows.min(strip.rows - start);
        let partials: Vec<(Vec<RowResult>, RejectionCounters)> = optimal_thread_loads(rows, threads)
            .into_par_iter()
            .map(|range| {
                let mut matrix = RejectionMatrix::new(ctx.width, files, slopes);
                let mut rejector = Rejector::new(ctx.config);
                let mut local = RejectionCounters::new(files);
                let rows = range
                    .map(|r| row_fn(ctx, &mut matrix, &mut rejector, &mut local, strip, start + r))
                    .collect();
                (rows, local)
            })
            .collect();
        for (rows, local) in partials {
            counters.merge(&local);
            results.extend(rows);
        }
        start += rows;
    }
    results
}

/// Write worker results into the outputs and rejection maps. Returns true on
/// output overflow.
fn store_results(set: &mut FileSet, outputs: &mut Outputs, channel: usize, results: Vec<RowResult>) -> bool {
    let width = set.width();
    let mut overflow = false;
    for row in results {
        if let (Some(values), Some(image)) = (&row.combined, outputs.image.as_mut()) {
            overflow |= image.write_row(channel, row.y, values);
        }
        if let Some(fractions) = outputs.fractions.as_mut() {
            if let Some(low) = &row.low_fraction {
                fractions.low[channel].row_mut(row.y).iter_mut().zip(low).for_each(|(d, &v)| *d = v);
            }
            if let Some(high) = &row.high_fraction {
                fractions.high[channel].row_mut(row.y).iter_mut().zip(high).for_each(|(d, &v)| *d = v);
            }
        }
        if let (Some(values), Some(slopes)) = (&row.slopes, outputs.slopes.as_mut()) {
            slopes[channel].row_mut(row.y).iter_mut().zip(values).for_each(|(d, &v)| *d = v);
        }
        if let Some(bits) = &row.bits {
            for (i, file) in set.files_mut().iter_mut().enumerate() {
                let src = &bits[i * width..(i + 1) * width];
                file.rejection_maps[channel]
                    .row_mut(row.y)
                    .iter_mut()
                    .zip(src)
                    .for_each(|(d, &b)| *d = b);
            }
        }
    }
    overflow
}

/// Run `row_fn` over every strip of a channel, with optional prefetch of the
/// next strip.
#[allow(clippy::too_many_arguments)]
fn strip_pass<F>(
    set: &mut FileSet,
    ctx_config: &IntegrationConfig,
    channel: usize,
    flags: (bool, bool, bool),
    outputs: &mut Outputs,
    counters: &mut RejectionCounters,
    cancel: &CancelToken,
    reporter: &Arc<dyn ProgressReporter>,
    row_fn: F,
) -> Result<bool>
where
    F: Fn(&RowContext<'_>, &mut RejectionMatrix, &mut Rejector, &mut RejectionCounters, &Strip, usize) -> RowResult
        + Sync,
{
    let (combine, fractions, maps) = flags;
    let height = set.height();
    let buffer_rows = set.buffer_rows();
    let threads = rayon::current_num_threads();
    let row_bytes = stack_row_bytes(set.width(), set.len(), with_slopes(ctx_config));
    let chunk_rows = rows_per_chunk(&ctx_config.memory, set.available_memory(), threads, row_bytes, buffer_rows);
    let prefetch = ctx_config.memory.prefetch;

    let mut overflow = false;
    let mut next = Some(set.read_strip(channel, 0, buffer_rows.min(height))?);
    while let Some(strip) = next.take() {
        cancel.check()?;
        let y1 = strip.y0 + strip.rows;
        let rows = strip.rows;
        debug!(channel, y0 = strip.y0, rows, chunk_rows, "strip");

        let set_ref: &FileSet = set;
        let ctx = RowContext {
            files: set_ref.files(),
            config: ctx_config,
            channel,
            x0: set_ref.roi().x0,
            roi_y0: set_ref.roi().y0,
            width: set_ref.width(),
            combine,
            fractions,
            maps,
        };
        let read_next = || -> Result<Option<Strip>> {
            if y1 < height {
                set_ref.read_strip(channel, y1, buffer_rows.min(height - y1)).map(Some)
            } else {
                Ok(None)
            }
        };
        let mut local = RejectionCounters::new(set_ref.len());
        let (results, following) = if prefetch {
            rayon::join(|| process_strip(&ctx, &strip, chunk_rows, &mut local, &row_fn), read_next)
        } else {
            let results = process_strip(&ctx, &strip, chunk_rows, &mut local, &row_fn);
            (results, read_next())
        };
        counters.merge(&local);
        drop(strip);
        overflow |= store_results(set, outputs, channel, results);
        reporter.advance(rows);
        next = following?;
    }
    Ok(overflow)
}

/// Integrate one channel: rejection pass, optional large-scale rejection and
/// map-driven combination.
pub(super) fn integrate_channel(
    set: &mut FileSet,
    config: &IntegrationConfig,
    channel: usize,
    outputs: &mut Outputs,
    cancel: &CancelToken,
    reporter: &Arc<dyn ProgressReporter>,
) -> Result<ChannelRun> {
    cancel.check()?;
    let passes = passes_for(config);
    let large_scale = !passes.is_empty();
    let want_image = outputs.image.is_some();
    let want_fractions = outputs.fractions.is_some();
    let maps = large_scale || config.output.generate_drizzle_data;
    if maps {
        set.ensure_rejection_maps();
    }

    let weights: Vec<f64> = set.files().iter().map(|f| f.estimates[channel].weight).collect();
    let mut counters = RejectionCounters::new(set.len());

    reporter.begin_stage(IntegrationStage::Integrating { channel }, Some(set.height()));
    let combine_first = !large_scale && want_image;
    let mut overflow = strip_pass(
        set,
        config,
        channel,
        (combine_first, want_fractions && !large_scale, maps),
        outputs,
        &mut counters,
        cancel,
        reporter,
        |ctx, matrix, rejector, local, strip, r| ctx.reject_row(matrix, rejector, local, strip, r, &weights),
    )?;
    reporter.finish_stage();

    if large_scale {
        reporter.begin_stage(IntegrationStage::LargeScaleRejection { channel }, Some(set.len()));
        let available = set.available_memory();
        let added = large_scale_reject(set.files_mut(), channel, &passes, &config.memory, available, cancel)?;
        for (c, a) in counters.files.iter_mut().zip(&added) {
            c.low += a.low as u64;
            c.high += a.high as u64;
        }
        reporter.advance(set.len());
        reporter.finish_stage();

        if want_image || want_fractions {
            reporter.begin_stage(IntegrationStage::Integrating { channel }, Some(set.height()));
            let mut unused = RejectionCounters::new(set.len());
            overflow |= strip_pass(
                set,
                config,
                channel,
                (true, want_fractions, false),
                outputs,
                &mut unused,
                cancel,
                reporter,
                |ctx, matrix, _, _, strip, r| ctx.combine_masked_row(matrix, strip, r, &weights),
            )?;
            reporter.finish_stage();
        }
    }

    Ok(ChannelRun { counters, overflow })
}
