//! Particle simulation configuration.

/// Particle field configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Logical simulation/render resolution in pixels (square)
    pub resolution: u32,

    /// Viewport pixels per particle; count = width * height / density
    pub density: u32,

    /// Lower bound on the luma-derived speed multiplier, so fully dark
    /// regions stall particles without freezing them outright
    pub sample_speed_floor: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            resolution: 1080,
            density: 9,
            sample_speed_floor: 0.05,
        }
    }
}

impl SimConfig {
    /// Particle count derived from viewport area, resolution-independent.
    pub fn particle_count(&self) -> u32 {
        if self.density == 0 {
            return 0;
        }
        self.resolution * self.resolution / self.density
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_particle_count_scales_with_area() {
        let config = SimConfig::default();
        assert_eq!(config.particle_count(), 1080 * 1080 / 9);

        let small = SimConfig {
            resolution: 90,
            ..SimConfig::default()
        };
        assert_eq!(small.particle_count(), 900);
    }

    #[test]
    fn test_zero_density_yields_zero_particles() {
        let config = SimConfig {
            density: 0,
            ..SimConfig::default()
        };
        assert_eq!(config.particle_count(), 0);
    }
}
