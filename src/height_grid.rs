//! Height sample grids: noise output scaled into world heights, with the
//! observed value range kept alongside for normalization and banding.

use crate::noise_field::{generate_noise_grid, inverse_lerp, FractalNoiseConfig};

/// Settings for height grid generation.
#[derive(Debug, Clone)]
pub struct HeightGridConfig {
    pub noise: FractalNoiseConfig,
    /// World-space multiplier applied to every normalized noise sample.
    pub height_multiplier: f32,
}

impl Default for HeightGridConfig {
    fn default() -> Self {
        Self {
            noise: FractalNoiseConfig::default(),
            height_multiplier: 1.0,
        }
    }
}

impl HeightGridConfig {
    pub fn validated(mut self) -> Self {
        self.noise = self.noise.validated();
        self
    }
}

/// A 2D grid of world-space heights. Created once per chunk and read-only
/// afterward; every LOD mesh for the chunk is built from the same grid.
#[derive(Debug, Clone)]
pub struct HeightGrid {
    values: Vec<f32>,
    width: usize,
    height: usize,
    /// Smallest height observed in this grid.
    pub min_value: f32,
    /// Largest height observed in this grid.
    pub max_value: f32,
}

impl HeightGrid {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Height at grid cell (x, y).
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }

    /// Height remapped into [0, 1] against the observed range. Used for
    /// texture banding and grayscale export by embedding tooling.
    pub fn normalized(&self, x: usize, y: usize) -> f32 {
        inverse_lerp(self.min_value, self.max_value, self.get(x, y))
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Generate a height grid of `width` x `height` samples around
/// `sample_centre`, tracking the observed min/max.
pub fn generate_height_grid(
    width: usize,
    height: usize,
    config: &HeightGridConfig,
    sample_centre: [f32; 2],
) -> HeightGrid {
    let mut values = generate_noise_grid(width, height, &config.noise, sample_centre);

    let mut min_value = f32::MAX;
    let mut max_value = f32::MIN;
    for value in &mut values {
        *value *= config.height_multiplier;
        min_value = min_value.min(*value);
        max_value = max_value.max(*value);
    }

    HeightGrid {
        values,
        width,
        height,
        min_value,
        max_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_field::NormalizeMode;

    fn test_config() -> HeightGridConfig {
        HeightGridConfig {
            noise: FractalNoiseConfig {
                seed: 42,
                octaves: 4,
                ..FractalNoiseConfig::default()
            },
            height_multiplier: 12.0,
        }
        .validated()
    }

    #[test]
    fn test_observed_range_brackets_all_samples() {
        let grid = generate_height_grid(20, 20, &test_config(), [0.0, 0.0]);

        for y in 0..20 {
            for x in 0..20 {
                let v = grid.get(x, y);
                assert!(v >= grid.min_value && v <= grid.max_value);
            }
        }
        assert!(grid.min_value < grid.max_value, "Flat grid is not expected");
    }

    #[test]
    fn test_multiplier_scales_heights() {
        let mut config = test_config();
        let base = generate_height_grid(16, 16, &config, [0.0, 0.0]);
        config.height_multiplier *= 2.0;
        let scaled = generate_height_grid(16, 16, &config, [0.0, 0.0]);

        for (a, b) in base.values().iter().zip(scaled.values()) {
            assert!((a * 2.0 - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_normalized_stays_in_unit_range() {
        let mut config = test_config();
        config.noise.normalize_mode = NormalizeMode::Local;
        let grid = generate_height_grid(16, 16, &config, [5.0, -5.0]);

        for y in 0..16 {
            for x in 0..16 {
                let n = grid.normalized(x, y);
                assert!((0.0..=1.0).contains(&n), "normalized out of range: {n}");
            }
        }
    }
}
