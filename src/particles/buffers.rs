//! Double-buffered GPU particle storage.
//!
//! Two complete buffer sets alternate read/write roles every frame because a
//! compute pass cannot safely read and write the same attribute buffer in one
//! dispatch. Modeled as a two-element arena plus an active index, not two
//! independently-named variables with manual swap logic.

use wgpu::util::DeviceExt;

use super::ParticleSeed;

/// Strictly alternating read/write role index for the buffer pair.
///
/// `read()` is the set written last frame ("current"); `write()` is the
/// target of this frame's dispatch. `swap()` is called exactly once per
/// frame, never skipped, starting from A-read/B-write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingPong {
    active: usize,
}

impl PingPong {
    pub fn new() -> Self {
        Self { active: 0 }
    }

    /// Index of the set holding last frame's output
    pub fn read(&self) -> usize {
        self.active
    }

    /// Index of the set this frame writes into
    pub fn write(&self) -> usize {
        1 - self.active
    }

    /// Toggle roles; the just-written set becomes current
    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }
}

/// One complete copy of the particle attributes in GPU memory
pub struct BufferSet {
    pub position: wgpu::Buffer,
    pub velocity: wgpu::Buffer,
    pub speed: wgpu::Buffer,
    /// Sonification proxy written by the sim, read back every frame
    pub audio: wgpu::Buffer,
}

impl BufferSet {
    fn new(device: &wgpu::Device, label: &str, seed: &ParticleSeed) -> Self {
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let position = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Position Buffer")),
            contents: bytemuck::cast_slice(&seed.positions),
            usage,
        });
        let velocity = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Velocity Buffer")),
            contents: bytemuck::cast_slice(&seed.velocities),
            usage,
        });
        let speed = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Speed Buffer")),
            contents: bytemuck::cast_slice(&seed.speeds),
            usage,
        });
        let audio = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Audio Buffer")),
            contents: bytemuck::cast_slice(&seed.speeds),
            usage,
        });
        Self {
            position,
            velocity,
            speed,
            audio,
        }
    }
}

/// The two live buffer sets plus their role index
pub struct BufferPair {
    pub sets: [BufferSet; 2],
    pub ping: PingPong,
    pub count: u32,
}

impl BufferPair {
    /// Upload the seed into both sets; roles start at A-read/B-write
    pub fn new(device: &wgpu::Device, seed: &ParticleSeed) -> Self {
        Self {
            sets: [
                BufferSet::new(device, "Particle Set A", seed),
                BufferSet::new(device, "Particle Set B", seed),
            ],
            ping: PingPong::new(),
            count: seed.len() as u32,
        }
    }

    /// The set written by the most recent sim step, used for telemetry
    /// readback and rendering
    pub fn current(&self) -> &BufferSet {
        &self.sets[self.ping.read()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_start_a_read_b_write() {
        let ping = PingPong::new();
        assert_eq!(ping.read(), 0);
        assert_eq!(ping.write(), 1);
    }

    #[test]
    fn test_roles_strictly_alternate() {
        let mut ping = PingPong::new();
        let mut previous = ping.read();
        for _ in 0..100 {
            ping.swap();
            assert_ne!(ping.read(), previous, "role must toggle every frame");
            assert_ne!(ping.read(), ping.write());
            previous = ping.read();
        }
    }

    #[test]
    fn test_written_set_becomes_current() {
        let mut ping = PingPong::new();
        let target = ping.write();
        ping.swap();
        assert_eq!(ping.read(), target);
    }
}
