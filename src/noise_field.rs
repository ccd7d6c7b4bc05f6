//! Fractal octave-noise heightfield sampling.
//!
//! Adjacent chunks sample one continuous noise field: the per-octave
//! offsets fold the sample centre into the noise coordinates, so tiling
//! chunks line up without any cross-chunk communication.

use noise::{NoiseFn, Perlin};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Range of the per-octave random jitter offsets.
const OCTAVE_OFFSET_RANGE: i32 = 100_000;

/// How raw fractal sums are rescaled into usable heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMode {
    /// Rescale into [0, 1] using the min/max observed in this grid alone.
    /// Grids generated at different centres are not mutually comparable.
    Local,
    /// Rescale each sample against the theoretical maximum amplitude and
    /// floor at zero. Grids stay mutually consistent, but peaks may exceed 1.
    Global,
}

/// Parameters for fractal noise generation. Immutable per generation call.
#[derive(Debug, Clone)]
pub struct FractalNoiseConfig {
    pub normalize_mode: NormalizeMode,
    pub scale: f32,
    pub octaves: u32,
    pub persistence: f32,
    pub lacunarity: f32,
    pub seed: i32,
    pub offset: [f32; 2],
}

impl Default for FractalNoiseConfig {
    fn default() -> Self {
        Self {
            normalize_mode: NormalizeMode::Global,
            scale: 50.0,
            octaves: 6,
            persistence: 0.5,
            lacunarity: 2.0,
            seed: 0,
            offset: [0.0, 0.0],
        }
    }
}

impl FractalNoiseConfig {
    /// Clamp every parameter into its legal range. Out-of-range values are
    /// corrected, never rejected.
    pub fn validated(mut self) -> Self {
        self.scale = self.scale.max(0.01);
        self.octaves = self.octaves.max(1);
        self.lacunarity = self.lacunarity.max(1.0);
        self.persistence = self.persistence.clamp(0.0, 1.0);
        self
    }
}

/// Generate a `width` x `height` grid of fractal noise heights, row-major.
///
/// Deterministic for a fixed config and sample centre. Expects a validated
/// config (see [`FractalNoiseConfig::validated`]).
pub fn generate_noise_grid(
    width: usize,
    height: usize,
    config: &FractalNoiseConfig,
    sample_centre: [f32; 2],
) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed as u32 as u64);
    let perlin = Perlin::new(config.seed as u32);

    let mut octave_offsets = Vec::with_capacity(config.octaves as usize);
    let mut max_possible_height = 0.0f32;
    let mut amplitude = 1.0f32;
    for _ in 0..config.octaves {
        // The y components are subtracted so positive configured offsets
        // scroll the field the same way on both axes.
        let offset_x = rng.gen_range(-OCTAVE_OFFSET_RANGE..OCTAVE_OFFSET_RANGE) as f32
            + config.offset[0]
            + sample_centre[0];
        let offset_y = rng.gen_range(-OCTAVE_OFFSET_RANGE..OCTAVE_OFFSET_RANGE) as f32
            - config.offset[1]
            - sample_centre[1];
        octave_offsets.push([offset_x, offset_y]);

        max_possible_height += amplitude;
        amplitude *= config.persistence;
    }

    let half_width = width as f32 / 2.0;
    let half_height = height as f32 / 2.0;

    let mut values = vec![0.0f32; width * height];

    // Each cell is a pure function of its coordinates, so rows can be
    // filled in parallel without changing the output.
    values
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let mut amplitude = 1.0f32;
                let mut frequency = 1.0f32;
                let mut noise_height = 0.0f32;

                for offsets in &octave_offsets {
                    let sample_x = (x as f32 - half_width + offsets[0]) / config.scale * frequency;
                    let sample_y = (y as f32 - half_height + offsets[1]) / config.scale * frequency;

                    // Perlin output is in [-1, 1].
                    let perlin_value = perlin.get([sample_x as f64, sample_y as f64]) as f32;
                    noise_height += perlin_value * amplitude;

                    amplitude *= config.persistence;
                    frequency *= config.lacunarity;
                }

                *value = match config.normalize_mode {
                    NormalizeMode::Local => noise_height,
                    NormalizeMode::Global => {
                        // Floor at zero only; peaks above 1 are allowed.
                        let normalized = (noise_height + 1.0) / 2.0 / (max_possible_height / 2.0);
                        normalized.max(0.0)
                    }
                };
            }
        });

    if config.normalize_mode == NormalizeMode::Local {
        let (mut min, mut max) = (f32::MAX, f32::MIN);
        for &v in &values {
            min = min.min(v);
            max = max.max(v);
        }
        for v in &mut values {
            *v = inverse_lerp(min, max, *v);
        }
    }

    values
}

/// Fraction of `value` between `a` and `b`, 0 when the range is empty.
pub fn inverse_lerp(a: f32, b: f32, value: f32) -> f32 {
    if a == b {
        0.0
    } else {
        (value - a) / (b - a)
    }
}
