use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{
    MAD_TO_SIGMA, NOISE_RANGE_HIGH, PSF_DETECTION_SIGMAS, PSF_MAX_STARS, PSF_MOFFAT_BETA,
};
use crate::math::stats::{mad, median};
use crate::pipeline::config::PsfType;
use crate::transform::atrous::atrous_convolve;

use super::ksigma::ksigma_noise;

/// PSF photometry summary of one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PsfSignal {
    pub stars: usize,
    pub total_flux: f64,
    pub mean_flux: f64,
    /// Mean local background around measured stars (M*).
    pub m_star: f64,
    /// RMS of the residuals between the data and the fitted profiles (N*).
    pub n_star: f64,
}

#[derive(Clone, Copy, Debug)]
struct StarFit {
    flux: f64,
    background: f64,
    residual_sq: f64,
    residual_count: usize,
}

/// Radius of the measurement aperture for a number of structure layers.
fn aperture_radius(structure_layers: usize) -> usize {
    (structure_layers + 1).clamp(3, 12)
}

fn is_local_peak(smoothed: &Array2<f32>, row: usize, col: usize) -> bool {
    let v = smoothed[[row, col]];
    for dr in -1..=1_isize {
        for dc in -1..=1_isize {
            if dr == 0 && dc == 0 {
                continue;
            }
            let n = smoothed[[(row as isize + dr) as usize, (col as isize + dc) as usize]];
            // Plateaus resolve to their first pixel in scan order.
            let earlier = dr < 0 || (dr == 0 && dc < 0);
            if n > v || (earlier && n == v) {
                return false;
            }
        }
    }
    true
}

fn profile(psf: PsfType, flux: f64, sigma: f64, r2: f64) -> f64 {
    match psf {
        PsfType::Gaussian => {
            let s2 = sigma * sigma;
            flux / (2.0 * std::f64::consts::PI * s2) * (-r2 / (2.0 * s2)).exp()
        }
        PsfType::Moffat => {
            let beta = PSF_MOFFAT_BETA;
            let fwhm = 2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * sigma;
            let alpha = fwhm / (2.0 * (2f64.powf(1.0 / beta) - 1.0).sqrt());
            let a2 = alpha * alpha;
            flux * (beta - 1.0) / (std::f64::consts::PI * a2) * (1.0 + r2 / a2).powf(-beta)
        }
    }
}

fn measure_star(data: &Array2<f32>, row: usize, col: usize, radius: usize, psf: PsfType) -> Option<StarFit> {
    let r = radius as isize;
    let r_in2 = (r + 1) * (r + 1);
    let r_out2 = (r + 3) * (r + 3);
    let r2max = r * r;

    let mut annulus = Vec::new();
    for dr in -(r + 3)..=(r + 3) {
        for dc in -(r + 3)..=(r + 3) {
            let d2 = dr * dr + dc * dc;
            if d2 >= r_in2 && d2 <= r_out2 {
                annulus.push(data[[(row as isize + dr) as usize, (col as isize + dc) as usize]] as f64);
            }
        }
    }
    let background = median(&mut annulus);

    let mut flux = 0.0;
    let mut wsum = 0.0;
    let (mut sx, mut sy) = (0.0, 0.0);
    let mut pixels = Vec::new();
    for dr in -r..=r {
        for dc in -r..=r {
            if dr * dr + dc * dc > r2max {
                continue;
            }
            let v = data[[(row as isize + dr) as usize, (col as isize + dc) as usize]] as f64;
            if v >= NOISE_RANGE_HIGH {
                // saturated
                return None;
            }
            let s = v - background;
            flux += s;
            if s > 0.0 {
                wsum += s;
                sx += s * dc as f64;
                sy += s * dr as f64;
            }
            pixels.push((dr as f64, dc as f64, s));
        }
    }
    if flux <= 0.0 || wsum <= 0.0 {
        return None;
    }
    let (cx, cy) = (sx / wsum, sy / wsum);
    let m2 = pixels
        .iter()
        .filter(|p| p.2 > 0.0)
        .map(|&(y, x, s)| s * ((x - cx).powi(2) + (y - cy).powi(2)))
        .sum::<f64>()
        / (2.0 * wsum);
    let sigma = m2.sqrt();
    if !(0.3..=radius as f64 / 2.0).contains(&sigma) {
        return None;
    }

    let residual_sq = pixels
        .iter()
        .map(|&(y, x, s)| {
            let r2 = (x - cx).powi(2) + (y - cy).powi(2);
            (s - profile(psf, flux, sigma, r2)).powi(2)
        })
        .sum();

    Some(StarFit {
        flux,
        background,
        residual_sq,
        residual_count: pixels.len(),
    })
}

/// Detect stars on the B3-smoothed image and measure them with moment-based
/// Gaussian or Moffat profiles.
pub fn estimate_psf_signal(data: &Array2<f32>, psf: PsfType, structure_layers: usize) -> PsfSignal {
    let (h, w) = data.dim();
    let radius = aperture_radius(structure_layers);
    let margin = radius + 4;
    if h <= 2 * margin || w <= 2 * margin {
        return PsfSignal::default();
    }

    let mut values: Vec<f64> = data.iter().map(|&v| v as f64).collect();
    let bg = median(&mut values);
    let mut sigma = ksigma_noise(data);
    if sigma <= 0.0 {
        sigma = MAD_TO_SIGMA * mad(&values, bg);
    }
    if sigma <= 0.0 {
        return PsfSignal::default();
    }
    let threshold = (bg + PSF_DETECTION_SIGMAS * sigma) as f32;

    let smoothed = atrous_convolve(data, 0);
    let mut peaks = Vec::new();
    for row in margin..h - margin {
        for col in margin..w - margin {
            let v = smoothed[[row, col]];
            if v > threshold && is_local_peak(&smoothed, row, col) {
                peaks.push((v, row, col));
            }
        }
    }
    peaks.sort_by(|a, b| b.0.total_cmp(&a.0));

    let min_sep2 = (4 * radius * radius) as isize;
    let mut accepted: Vec<(usize, usize)> = Vec::new();
    let mut fits = Vec::new();
    for &(_, row, col) in &peaks {
        if fits.len() >= PSF_MAX_STARS {
            break;
        }
        let crowded = accepted.iter().any(|&(r, c)| {
            let dr = r as isize - row as isize;
            let dc = c as isize - col as isize;
            dr * dr + dc * dc < min_sep2
        });
        if crowded {
            continue;
        }
        if let Some(fit) = measure_star(data, row, col, radius, psf) {
            accepted.push((row, col));
            fits.push(fit);
        }
    }

    if fits.is_empty() {
        return PsfSignal::default();
    }
    let stars = fits.len();
    let total_flux: f64 = fits.iter().map(|f| f.flux).sum();
    let m_star = fits.iter().map(|f| f.background).sum::<f64>() / stars as f64;
    let res_sq: f64 = fits.iter().map(|f| f.residual_sq).sum();
    let res_n: usize = fits.iter().map(|f| f.residual_count).sum();
    PsfSignal {
        stars,
        total_flux,
        mean_flux: total_flux / stars as f64,
        m_star,
        n_star: (res_sq / res_n.max(1) as f64).sqrt(),
    }
}
