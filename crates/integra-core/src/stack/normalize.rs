use crate::fileset::IntegrationFile;
use crate::pipeline::config::{Normalization, NormalizationConfig, RejectionNormalization};

use super::RejectionMatrix;

/// Where a row of stacks sits in the frame, in absolute pixel coordinates.
#[derive(Clone, Copy, Debug)]
pub struct RowPosition {
    pub channel: usize,
    /// Absolute column of the first stack.
    pub x0: usize,
    /// Absolute row.
    pub y: usize,
}

/// Output normalization of one sample of file `i` at (x, y).
///
/// Division by a zero location yields IEEE infinities or NaN, never a panic.
pub fn normalize_output(
    v: f64,
    files: &[IntegrationFile],
    i: usize,
    norm: &NormalizationConfig,
    channel: usize,
    x: usize,
    y: usize,
) -> f64 {
    let e = &files[i].estimates[channel];
    let e0 = &files[0].estimates[channel];
    match norm.mode {
        Normalization::None => v,
        Normalization::Additive => v + e0.location - e.location,
        Normalization::Multiplicative => v * e0.location / e.location,
        Normalization::AdditiveWithScaling => (v - e.location) * e.overall_scale_factor + e0.location,
        Normalization::MultiplicativeWithScaling => v / e.location * e.overall_scale_factor * e0.location,
        Normalization::Local => match &files[i].local {
            Some(local) => local.normalize(v, x, y, channel),
            None => v,
        },
        Normalization::Adaptive => match (&files[i].adaptive, &files[0].adaptive) {
            (Some(a), Some(a0)) => {
                let (ac, ac0) = (&a.channels[channel], &a0.channels[channel]);
                let m = ac.location(x, y);
                let m0 = ac0.location(x, y);
                if norm.adaptive_no_scale {
                    v - m + m0
                } else {
                    let s = ac.scale(x, y);
                    let s0 = ac0.scale(x, y);
                    let k = if v <= m { s0.low / s.low } else { s0.high / s.high };
                    (v - m) * k + m0
                }
            }
            _ => v,
        },
    }
}

/// Apply output normalization to the `raw` member of every entry of a row.
pub fn normalize_output_row(
    matrix: &mut RejectionMatrix,
    files: &[IntegrationFile],
    norm: &NormalizationConfig,
    pos: RowPosition,
) {
    if norm.mode == Normalization::None {
        return;
    }
    for (x, stack, _) in matrix.columns_mut() {
        for entry in stack.iter_mut() {
            entry.raw = normalize_output(entry.raw, files, entry.index, norm, pos.channel, pos.x0 + x, pos.y);
        }
    }
}

/// Rejection normalization of the proxy `value` of every live entry of a row.
///
/// Normalizations that can produce negative proxies are followed by a
/// pedestal that raises the whole row to non-negative values.
pub fn normalize_rejection_row(
    matrix: &mut RejectionMatrix,
    files: &[IntegrationFile],
    mode: RejectionNormalization,
    adaptive_no_scale: bool,
    pos: RowPosition,
) {
    let c = pos.channel;
    let mut rmin = 0.0f64;
    for (x, stack, _) in matrix.columns_mut() {
        let ax = pos.x0 + x;
        for entry in stack.iter_mut().filter(|e| !e.is_rejected()) {
            let i = entry.index;
            let e = &files[i].estimates[c];
            let e0 = &files[0].estimates[c];
            let v = entry.value;
            entry.value = match mode {
                RejectionNormalization::None => v,
                RejectionNormalization::Scale => {
                    let k = if v <= e.location { e.scale_factor.low } else { e.scale_factor.high };
                    (v - e.location) * k + e0.location
                }
                RejectionNormalization::EqualizeFluxes => v * e0.location / e.location,
                RejectionNormalization::Local => match &files[i].local {
                    Some(local) => local.normalize(v, ax, pos.y, c),
                    None => v,
                },
                RejectionNormalization::Adaptive => match (&files[i].adaptive, &files[0].adaptive) {
                    (Some(a), Some(a0)) => {
                        let (ac, ac0) = (&a.channels[c], &a0.channels[c]);
                        let m = ac.location(ax, pos.y);
                        let m0 = ac0.location(ax, pos.y);
                        let k = if adaptive_no_scale {
                            if v <= m {
                                e.scale_factor.low
                            } else {
                                e.scale_factor.high
                            }
                        } else {
                            let s = ac.scale(ax, pos.y);
                            let s0 = ac0.scale(ax, pos.y);
                            if v <= m {
                                s0.low / s.low
                            } else {
                                s0.high / s.high
                            }
                        };
                        (v - m) * k + m0
                    }
                    _ => v,
                },
            };
            if entry.value < rmin {
                rmin = entry.value;
            }
        }
    }

    if rmin < 0.0 && mode != RejectionNormalization::EqualizeFluxes {
        for entry in matrix.entries_mut().iter_mut().filter(|e| !e.is_rejected()) {
            entry.value -= rmin;
        }
    }
}
