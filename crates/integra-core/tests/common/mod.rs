#![allow(dead_code)]

use ndarray::Array2;

use integra_core::fileset::source::MemorySource;
use integra_core::fileset::FrameInput;
use integra_core::pipeline::config::{IntegrationConfig, WeightMode};

/// Deterministic xorshift generator so noisy fixtures are reproducible.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    /// Uniform in [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Standard normal deviate (Box-Muller).
    pub fn gaussian(&mut self) -> f64 {
        let u1 = self.uniform().max(1e-300);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

pub fn make_plane(h: usize, w: usize, fill: f32) -> Array2<f32> {
    Array2::from_elem((h, w), fill)
}

/// Gaussian noise of `sigma` around `mean`.
pub fn noisy_plane(h: usize, w: usize, mean: f64, sigma: f64, rng: &mut Rng) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |_| (mean + sigma * rng.gaussian()) as f32)
}

/// Mono in-memory frames named `frame_<i>.fit`.
pub fn frames(planes: Vec<Array2<f32>>) -> Vec<FrameInput> {
    planes
        .into_iter()
        .enumerate()
        .map(|(i, p)| FrameInput::new(MemorySource::mono(format!("frame_{i}.fit"), p).unwrap()))
        .collect()
}

/// Config without noise-based weights or output noise evaluation, which
/// fail or fall back on flat synthetic frames.
pub fn plain_config() -> IntegrationConfig {
    let mut config = IntegrationConfig::default();
    config.weights.mode = WeightMode::DontCare;
    config.output.evaluate_noise = false;
    config
}
