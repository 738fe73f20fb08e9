//! Per-frame readback of particle attributes and derived statistics.
//!
//! Single writer (the video loop), single reader (the audio tick). Arrays
//! are replaced wholesale on ingest, never element by element, so the audio
//! side can never observe a half-updated frame.

use crate::params::audio_constants::{PAN_SCALE, SPEED_CHANGE_SCALE};

use super::BufferSet;

/// Aggregate statistics bridging the visual simulation to the audio graph
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySummary {
    /// Mean first-difference of per-particle speed, scaled; negative means
    /// the field is accelerating (current speeds exceed last frame's)
    pub speed_change_mean: f32,
    /// Mean of the audio readback attribute, scaled into pan drive
    pub pan_mean: f32,
    /// Mean per-particle speed, unscaled
    pub speed_mean: f32,
}

/// Speed/pan history for the whole field
pub struct Telemetry {
    speeds: Vec<f32>,
    previous_speeds: Vec<f32>,
    pan: Vec<f32>,
    previous_pan: Vec<f32>,
    summary: TelemetrySummary,
}

impl Telemetry {
    pub fn new(count: u32) -> Self {
        let n = count as usize;
        Self {
            speeds: vec![0.0; n],
            previous_speeds: vec![0.0; n],
            pan: vec![0.0; n],
            previous_pan: vec![0.0; n],
            summary: TelemetrySummary::default(),
        }
    }

    /// Ingest one frame of readback data.
    ///
    /// Ordering is snapshot-then-overwrite: the previous arrays are updated
    /// from the current ones *before* the new data lands, otherwise the
    /// first-difference telemetry degenerates to zero.
    pub fn ingest(&mut self, speeds: &[f32], pan: &[f32]) {
        if speeds.len() != self.speeds.len() || pan.len() != self.pan.len() {
            log::warn!(
                "Telemetry ingest size mismatch: got {}/{}, expected {}",
                speeds.len(),
                pan.len(),
                self.speeds.len()
            );
            return;
        }
        self.previous_speeds.copy_from_slice(&self.speeds);
        self.previous_pan.copy_from_slice(&self.pan);
        self.speeds.copy_from_slice(speeds);
        self.pan.copy_from_slice(pan);
        self.summary = self.compute_summary();
    }

    pub fn summary(&self) -> TelemetrySummary {
        self.summary
    }

    fn compute_summary(&self) -> TelemetrySummary {
        let n = self.speeds.len();
        if n == 0 {
            return TelemetrySummary::default();
        }
        let inv = 1.0 / n as f32;
        let change: f32 = self
            .previous_speeds
            .iter()
            .zip(&self.speeds)
            .map(|(prev, cur)| prev - cur)
            .sum();
        let pan: f32 = self.pan.iter().sum();
        let speed: f32 = self.speeds.iter().sum();
        TelemetrySummary {
            speed_change_mean: change * inv * SPEED_CHANGE_SCALE,
            pan_mean: pan * inv * PAN_SCALE,
            speed_mean: speed * inv,
        }
    }

    /// Per-particle speed first-difference normalized to its peak, used as
    /// an impulse table for the `set_sample` capture. Degenerate frames
    /// (all-equal speeds) produce a zero table rather than dividing by zero.
    pub fn normalized_speed_change(&self) -> Vec<f32> {
        let mut change: Vec<f32> = self
            .previous_speeds
            .iter()
            .zip(&self.speeds)
            .map(|(prev, cur)| prev - cur)
            .collect();
        let peak = change.iter().fold(0.0_f32, |acc, x| acc.max(x.abs()));
        if peak > f32::EPSILON {
            for x in &mut change {
                *x /= peak;
            }
        }
        change
    }
}

/// Staging buffers for the partial GPU->CPU transfer of the speed and audio
/// attribute arrays
pub struct ReadbackBuffers {
    speed_staging: wgpu::Buffer,
    pan_staging: wgpu::Buffer,
    count: u32,
}

impl ReadbackBuffers {
    pub fn new(device: &wgpu::Device, count: u32) -> Self {
        let size = (count as u64) * std::mem::size_of::<f32>() as u64;
        let descriptor = |label| wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(4),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        };
        Self {
            speed_staging: device.create_buffer(&descriptor("Speed Staging Buffer")),
            pan_staging: device.create_buffer(&descriptor("Pan Staging Buffer")),
            count,
        }
    }

    /// Enqueue copies of the just-written speed/audio buffers into staging
    pub fn encode_copy(&self, encoder: &mut wgpu::CommandEncoder, set: &BufferSet) {
        let size = (self.count as u64) * std::mem::size_of::<f32>() as u64;
        if size == 0 {
            return;
        }
        encoder.copy_buffer_to_buffer(&set.speed, 0, &self.speed_staging, 0, size);
        encoder.copy_buffer_to_buffer(&set.audio, 0, &self.pan_staging, 0, size);
    }

    /// Map both staging buffers and return their contents. Blocks on the GPU
    /// queue; the frame has already been submitted by the caller.
    pub fn read(&self, device: &wgpu::Device) -> (Vec<f32>, Vec<f32>) {
        if self.count == 0 {
            return (Vec::new(), Vec::new());
        }
        let speed_slice = self.speed_staging.slice(..);
        let pan_slice = self.pan_staging.slice(..);
        speed_slice.map_async(wgpu::MapMode::Read, |_| {});
        pan_slice.map_async(wgpu::MapMode::Read, |_| {});
        device.poll(wgpu::Maintain::Wait);

        let speeds = bytemuck::cast_slice(&speed_slice.get_mapped_range()).to_vec();
        let pan = bytemuck::cast_slice(&pan_slice.get_mapped_range()).to_vec();
        self.speed_staging.unmap();
        self.pan_staging.unmap();
        (speeds, pan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_before_overwrite() {
        let mut telemetry = Telemetry::new(3);
        telemetry.ingest(&[1.0, 1.0, 1.0], &[0.0, 0.0, 0.0]);
        telemetry.ingest(&[0.5, 0.5, 0.5], &[0.0, 0.0, 0.0]);

        // (1.0 - 0.5) scaled, not zero: proves the previous arrays were
        // snapshotted before the new data overwrote them
        let summary = telemetry.summary();
        assert!((summary.speed_change_mean - 0.5 * SPEED_CHANGE_SCALE).abs() < 1e-4);
    }

    #[test]
    fn test_pan_and_speed_means() {
        let mut telemetry = Telemetry::new(4);
        telemetry.ingest(&[2.0, 2.0, 4.0, 4.0], &[0.001, 0.001, 0.003, 0.003]);

        let summary = telemetry.summary();
        assert!((summary.speed_mean - 3.0).abs() < 1e-5);
        assert!((summary.pan_mean - 0.002 * PAN_SCALE).abs() < 1e-3);
    }

    #[test]
    fn test_empty_field_summary_is_zero() {
        let mut telemetry = Telemetry::new(0);
        telemetry.ingest(&[], &[]);
        assert_eq!(telemetry.summary(), TelemetrySummary::default());
    }

    #[test]
    fn test_size_mismatch_keeps_previous_frame() {
        let mut telemetry = Telemetry::new(2);
        telemetry.ingest(&[1.0, 2.0], &[0.1, 0.2]);
        let before = telemetry.summary();
        telemetry.ingest(&[1.0], &[0.1]);
        assert_eq!(telemetry.summary(), before);
    }

    #[test]
    fn test_normalized_speed_change_peaks_at_one() {
        let mut telemetry = Telemetry::new(3);
        telemetry.ingest(&[1.0, 1.0, 1.0], &[0.0; 3]);
        telemetry.ingest(&[0.0, 0.5, 1.0], &[0.0; 3]);

        let table = telemetry.normalized_speed_change();
        assert!((table[0] - 1.0).abs() < 1e-6);
        assert!((table[1] - 0.5).abs() < 1e-6);
        assert!((table[2] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_speed_change_degenerate_is_zero() {
        let telemetry = Telemetry::new(3);
        let table = telemetry.normalized_speed_change();
        assert!(table.iter().all(|x| *x == 0.0));
    }
}
