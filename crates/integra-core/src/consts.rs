/// Minimum pixel count (h*w) to use row-level Rayon parallelism in whole-image
/// transforms (median filters, dilation, wavelets).
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// B3 spline 1D kernel coefficients: [1, 4, 6, 4, 1] / 16.
pub const B3_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Standard deviation of Gaussian white noise in each B3 spline wavelet layer,
/// for unit noise in the image.
pub const B3_NOISE_KJ: [f64; 10] = [
    0.8907, 0.2007, 0.0856, 0.0413, 0.0205, 0.0103, 0.0052, 0.0026, 0.0013, 0.0007,
];

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// Minimum number of frames accepted by the integration engine.
pub const MIN_FRAMES: usize = 3;

/// Minimum number of frames for linear fit clipping.
pub const MIN_FRAMES_LINEAR_FIT: usize = 5;

/// Statistics of input frames ignore samples outside this open interval.
pub const STATS_RANGE_LOW: f64 = 1.0 / 65535.0;
pub const STATS_RANGE_HIGH: f64 = 1.0 - 1.0 / 65535.0;

/// Sample range used by the wavelet noise estimators.
pub const NOISE_RANGE_LOW: f64 = 0.00002;
pub const NOISE_RANGE_HIGH: f64 = 0.99998;

/// Clipping factor of the k-sigma and MRS noise estimators.
pub const NOISE_K: f64 = 3.0;

/// K-sigma noise iteration: relative tolerance and iteration limit.
pub const KSIGMA_ACCURACY: f64 = 0.01;
pub const KSIGMA_MAX_ITERATIONS: usize = 10;

/// MRS noise iteration: relative tolerance and iteration limit.
pub const MRS_ACCURACY: f64 = 1.0e-4;
pub const MRS_MAX_ITERATIONS: usize = 100;

/// Largest and smallest number of wavelet layers tried by MRS noise evaluation.
pub const MRS_MAX_LAYERS: usize = 4;
pub const MRS_MIN_LAYERS: usize = 2;

/// Detection threshold of PSF signal stars, in noise sigmas above background.
pub const PSF_DETECTION_SIGMAS: f64 = 5.0;

/// Moffat beta used for PSF signal profiles.
pub const PSF_MOFFAT_BETA: f64 = 4.0;

/// Upper bound on the number of stars measured per channel.
pub const PSF_MAX_STARS: usize = 2000;

/// Normalization constant of the Sn scale estimator (Rousseeuw & Croux).
pub const SN_NORMAL: f64 = 1.1926;

/// Consistency factor of the Huber winsorized standard deviation.
pub const WINSORIZED_SIGMA_NORMAL: f64 = 1.134;

/// Clamp threshold (in sigma units) of the winsorization iteration.
pub const WINSORIZATION_CLAMP: f64 = 1.5;

/// Relative convergence tolerance of the winsorization iteration.
pub const WINSORIZATION_ACCURACY: f64 = 0.0005;

/// Converts a median absolute deviation into a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Iterative k-sigma scale estimator parameters.
pub const IKSS_K: f64 = 4.0;
pub const IKSS_NORMAL: f64 = 0.991;
pub const IKSS_ACCURACY: f64 = 1.0e-6;

/// Tuning constant of the biweight midvariance.
pub const BWMV_K: f64 = 9.0;

/// Upper bound of the signal range used by the SNR estimate.
pub const SNR_HIGH: f64 = 0.85;

/// Rejection map bits, one byte per pixel per channel.
pub const MAP_HIGH: u8 = 0x01;
pub const MAP_LOW: u8 = 0x02;
pub const MAP_RANGE_HIGH: u8 = 0x04;
pub const MAP_RANGE_LOW: u8 = 0x08;
pub const MAP_LARGE_SCALE_HIGH: u8 = 0x10;
pub const MAP_LARGE_SCALE_LOW: u8 = 0x20;

/// Bit depth assumed by the CCD noise model clipping.
pub const CCD_CLIP_BITS: u32 = 16;

/// Ceiling of the per-step iteration loops in the rejection algorithms.
pub const MAX_REJECTION_ITERATIONS: usize = 100;

/// Default size of the per-file row buffer when automatic sizing is off.
pub const DEFAULT_BUFFER_SIZE_MB: usize = 16;

/// Default size of the rejection stack buffer.
pub const DEFAULT_STACK_SIZE_MB: usize = 1024;

/// Fallback available memory when the system cannot be queried (bytes).
pub const FALLBACK_AVAILABLE_MEMORY: u64 = 2 * 1024 * 1024 * 1024;

/// Limit of simultaneous file reader threads.
pub const MAX_FILE_READ_THREADS: usize = 8;

/// Drizzle data sidecar magic and format version.
pub const DRIZZLE_MAGIC: &[u8; 8] = b"INTGRDZL";
pub const DRIZZLE_VERSION: u32 = 1;
