//! GPU particle field: seeding, double-buffered simulation, telemetry.

mod buffers;
mod sim;
mod telemetry;

pub use buffers::{BufferPair, BufferSet, PingPong};
pub use sim::{FeedbackSim, SimTextures};
pub use telemetry::{ReadbackBuffers, Telemetry, TelemetrySummary};

use rand::Rng;
use std::f32::consts::TAU;

/// CPU-side particle attributes, uploaded once at simulation start.
pub struct ParticleSeed {
    /// Positions uniformly sampled in [-1, 1]^2
    pub positions: Vec<[f32; 2]>,
    /// Unit-circle velocities indexed by particle order (not random), giving
    /// a visually uniform initial outward-flow pattern
    pub velocities: Vec<[f32; 2]>,
    /// Per-particle speed multiplier, starts at 1.0
    pub speeds: Vec<f32>,
}

impl ParticleSeed {
    pub fn len(&self) -> usize {
        self.speeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speeds.is_empty()
    }
}

/// Seed `count` particles. `count == 0` yields an empty (no-op) field.
pub fn init_particles(count: u32) -> ParticleSeed {
    let mut rng = rand::thread_rng();
    let n = count as usize;
    let mut positions = Vec::with_capacity(n);
    let mut velocities = Vec::with_capacity(n);
    let mut speeds = Vec::with_capacity(n);

    for i in 0..n {
        positions.push([rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0)]);
        let heading = TAU * i as f32 / n as f32;
        velocities.push([heading.sin(), heading.cos()]);
        speeds.push(1.0);
    }

    ParticleSeed {
        positions,
        velocities,
        speeds,
    }
}

/// Toroidal wrap into [0, 1). CPU mirror of the `fract` wrap in
/// `simulate.wgsl`; kept in lockstep with the kernel.
pub fn wrap_unit(v: f32) -> f32 {
    v - v.floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_particles_count_and_bounds() {
        let seed = init_particles(1000);
        assert_eq!(seed.len(), 1000);
        for p in &seed.positions {
            assert!((-1.0..=1.0).contains(&p[0]));
            assert!((-1.0..=1.0).contains(&p[1]));
        }
        for s in &seed.speeds {
            assert_eq!(*s, 1.0);
        }
    }

    #[test]
    fn test_init_velocities_on_unit_circle() {
        let seed = init_particles(64);
        for v in &seed.velocities {
            let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        // Angular index, not random: particle 0 points straight up
        assert!((seed.velocities[0][0] - 0.0).abs() < 1e-6);
        assert!((seed.velocities[0][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_particles_is_a_noop() {
        let seed = init_particles(0);
        assert!(seed.is_empty());
    }

    #[test]
    fn test_wrap_stays_in_unit_range() {
        // Extreme step sizes must still land in [0, 1): toroidal re-entry,
        // never clamping or reflection
        for x in [-10.3_f32, -1.0, -0.5, 0.0, 0.5, 0.999, 1.0, 7.25, 1000.5] {
            let w = wrap_unit(x);
            assert!((0.0..1.0).contains(&w), "wrap_unit({x}) = {w}");
        }
        // Modulo semantics: exiting right by 0.25 re-enters at 0.25
        assert!((wrap_unit(1.25) - 0.25).abs() < 1e-6);
        assert!((wrap_unit(-0.25) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_wrap_holds_for_extreme_delta_time() {
        // Integrate one particle with deltaTime = 10.0 at full speed; the
        // position must remain in the unit square
        let mut pos = [0.9_f32, 0.1];
        let vel = [1.0_f32, -1.0];
        for _ in 0..100 {
            pos[0] = wrap_unit(pos[0] + vel[0] * 10.0 * 1.7);
            pos[1] = wrap_unit(pos[1] + vel[1] * 10.0 * 1.7);
            assert!((0.0..1.0).contains(&pos[0]));
            assert!((0.0..1.0).contains(&pos[1]));
        }
    }
}
