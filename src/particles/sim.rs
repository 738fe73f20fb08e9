//! Feedback simulation stage: one compute invocation per particle advances
//! the field from the read set into the write set, sampling the self-feedback
//! texture, the video frame, and the text raster as control inputs.

use bytemuck::{Pod, Zeroable};

use crate::params::{ParameterState, SimConfig};

use super::BufferPair;

/// Uniforms for the simulation kernel. Scalar parameters are clamped here,
/// at point of use, so out-of-range control values never reach the position
/// buffers as NaN/Inf.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SimUniforms {
    delta_time: f32,
    time: f32,
    speed: f32,
    circle_size: f32,
    strength: f32,
    angle: f32,
    sample_speed_floor: f32,
    particle_count: u32,
}

/// Auxiliary texture inputs sampled by the integration step
pub struct SimTextures<'a> {
    pub feedback: &'a wgpu::TextureView,
    pub video: &'a wgpu::TextureView,
    pub text: &'a wgpu::TextureView,
    pub sampler: &'a wgpu::Sampler,
}

/// Compute pipeline plus dual bind groups, one per buffer-pair role
pub struct FeedbackSim {
    pipeline: wgpu::ComputePipeline,
    uniform_buffer: wgpu::Buffer,
    // [0] reads set A / writes set B, [1] the reverse
    particle_bind_groups: [wgpu::BindGroup; 2],
    texture_bind_group: wgpu::BindGroup,
    config: SimConfig,
}

impl FeedbackSim {
    pub fn new(
        device: &wgpu::Device,
        pair: &BufferPair,
        textures: SimTextures,
        config: SimConfig,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Simulate Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("simulate.wgsl").into()),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Sim Uniform Buffer"),
            size: std::mem::size_of::<SimUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let storage_entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let particle_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sim Particle Bind Group Layout"),
            entries: &[
                storage_entry(0, true),  // position in
                storage_entry(1, true),  // velocity in
                storage_entry(2, true),  // speed in
                storage_entry(3, false), // position out
                storage_entry(4, false), // velocity out
                storage_entry(5, false), // speed out
                storage_entry(6, false), // audio out
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let particle_bind_group = |read: usize| {
            let source = &pair.sets[read];
            let target = &pair.sets[1 - read];
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Sim Particle Bind Group"),
                layout: &particle_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: source.position.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: source.velocity.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: source.speed.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: target.position.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: target.velocity.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: target.speed.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: target.audio.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 7,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                ],
            })
        };
        let particle_bind_groups = [particle_bind_group(0), particle_bind_group(1)];

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sim Texture Bind Group Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let texture_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sim Texture Bind Group"),
            layout: &texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(textures.feedback),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(textures.video),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(textures.text),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(textures.sampler),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sim Pipeline Layout"),
            bind_group_layouts: &[&particle_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Sim Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("simulate"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            pipeline,
            uniform_buffer,
            particle_bind_groups,
            texture_bind_group,
            config,
        }
    }

    /// Advance the field one step and swap the buffer roles.
    ///
    /// The swap happens exactly once per call, even for an empty field, so
    /// the alternation invariant holds from the first frame on.
    pub fn step(
        &self,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        pair: &mut BufferPair,
        params: &ParameterState,
        delta_time: f32,
        time: f32,
    ) {
        let delta_time = if delta_time.is_finite() && delta_time >= 0.0 {
            delta_time
        } else {
            0.0
        };
        let uniforms = SimUniforms {
            delta_time,
            time,
            speed: params.speed.clamp(0.0, 100.0),
            circle_size: params.circle_size.clamp(0.0, 1.0),
            strength: params.strength.clamp(0.0, 1.0),
            angle: params.angle.clamp(0.0, 1.0),
            sample_speed_floor: self.config.sample_speed_floor,
            particle_count: pair.count,
        };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        if pair.count > 0 {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Sim Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.particle_bind_groups[pair.ping.read()], &[]);
            pass.set_bind_group(1, &self.texture_bind_group, &[]);
            pass.dispatch_workgroups(pair.count.div_ceil(256), 1, 1);
        }

        pair.ping.swap();
    }
}
