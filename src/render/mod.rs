//! Presentation stage with wgpu pipeline and shader management.
//!
//! Each frame composites the video frame and the text raster, draws the
//! particle field as circular point sprites over them, copies the finished
//! canvas into the self-feedback texture for the next sim step, and blits
//! the canvas to the window surface with aspect-fit letterboxing. The
//! offscreen canvas is a fixed 1080x1080 logical target regardless of
//! window size.

use anyhow::{anyhow, Context};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::params::{RecordingConfig, RenderConfig};
use crate::particles::{BufferPair, SimTextures};

/// Uniforms for the video/text composite pass
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CompositeUniforms {
    text_opacity: f32,
    _padding: [f32; 3],
}

/// Uniforms for the particle sprite pass
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SpriteUniforms {
    circle_size: f32,
    opacity: f32,
    point_scale: f32,
    _padding: f32,
}

/// Uniforms for the surface blit (aspect-fit scale)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlitUniforms {
    scale: [f32; 2],
    _padding: [f32; 2],
}

/// Per-frame presentation inputs, taken from the parameter store
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub text_opacity: f32,
    pub circle_size: f32,
    pub opacity: f32,
}

/// Rendering system managing wgpu device, pipelines, and textures
pub struct RenderSystem {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,

    /// Fixed-size logical canvas, also the source of the feedback copy
    canvas: wgpu::Texture,
    canvas_view: wgpu::TextureView,
    feedback_view: wgpu::TextureView,
    feedback: wgpu::Texture,
    video: wgpu::Texture,
    video_view: wgpu::TextureView,
    text: wgpu::Texture,
    text_view: wgpu::TextureView,
    sampler: wgpu::Sampler,

    composite_pipeline: wgpu::RenderPipeline,
    composite_uniforms: wgpu::Buffer,
    composite_bind_group: wgpu::BindGroup,

    sprite_pipeline: wgpu::RenderPipeline,
    sprite_uniforms: wgpu::Buffer,
    sprite_layout: wgpu::BindGroupLayout,
    // [index] reads the set that role index considers current; built once
    // the buffer pair exists
    sprite_bind_groups: Option<[wgpu::BindGroup; 2]>,

    blit_pipeline: wgpu::RenderPipeline,
    blit_uniforms: wgpu::Buffer,
    blit_bind_group: wgpu::BindGroup,

    recording_config: Option<RecordingConfig>,
    resolution: u32,
}

impl RenderSystem {
    /// Create the rendering system against a live window
    pub async fn new(
        window: std::sync::Arc<winit::window::Window>,
        config: &RenderConfig,
        resolution: u32,
        recording_config: Option<RecordingConfig>,
    ) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Window must have 'static lifetime via Arc
        let surface = instance
            .create_surface(window)
            .context("Failed to create surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("Failed to find suitable GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Main Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("Failed to request device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let extent = wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: 1,
        };
        let canvas_format = wgpu::TextureFormat::Rgba8Unorm;

        let texture = |label, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: canvas_format,
                usage,
                view_formats: &[],
            })
        };

        let canvas = texture(
            "Canvas Texture",
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );
        let feedback = texture(
            "Feedback Texture",
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let video = texture(
            "Video Texture",
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let text = texture(
            "Text Texture",
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );

        let canvas_view = canvas.create_view(&wgpu::TextureViewDescriptor::default());
        let feedback_view = feedback.create_view(&wgpu::TextureViewDescriptor::default());
        let video_view = video.create_view(&wgpu::TextureViewDescriptor::default());
        let text_view = text.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Canvas Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Composite pass: video + text onto the canvas
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("composite.wgsl").into()),
        });

        let composite_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Composite Uniform Buffer"),
            contents: bytemuck::cast_slice(&[CompositeUniforms {
                text_opacity: 0.0,
                _padding: [0.0; 3],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let uniform_entry = |binding, visibility| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Bind Group Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                uniform_entry(3, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let composite_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&video_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&text_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: composite_uniforms.as_entire_binding(),
                },
            ],
        });

        let composite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Composite Pipeline Layout"),
                bind_group_layouts: &[&composite_layout],
                push_constant_ranges: &[],
            });

        let composite_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Composite Pipeline"),
            layout: Some(&composite_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &composite_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &composite_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: canvas_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Sprite pass: instanced circular quads reading the particle storage
        // buffers directly
        let sprite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Sprite Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("sprites.wgsl").into()),
        });

        let sprite_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sprite Uniform Buffer"),
            contents: bytemuck::cast_slice(&[SpriteUniforms {
                circle_size: 0.5,
                opacity: 0.2,
                point_scale: 8.0 / resolution as f32,
                _padding: 0.0,
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let sprite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Sprite Bind Group Layout"),
            entries: &[
                storage_entry(0), // positions
                storage_entry(1), // speeds
                uniform_entry(2, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let sprite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Sprite Pipeline Layout"),
                bind_group_layouts: &[&sprite_layout],
                push_constant_ranges: &[],
            });

        let sprite_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Sprite Pipeline"),
            layout: Some(&sprite_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &sprite_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &sprite_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: canvas_format,
                    // Premultiplied alpha over the composite
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Blit pass: canvas to surface, letterboxed
        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });

        let blit_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Blit Uniform Buffer"),
            contents: bytemuck::cast_slice(&[BlitUniforms {
                scale: aspect_fit(surface_config.width, surface_config.height),
                _padding: [0.0; 2],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                texture_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                uniform_entry(2, wgpu::ShaderStages::VERTEX),
            ],
        });

        let blit_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&canvas_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: blit_uniforms.as_entire_binding(),
                },
            ],
        });

        let blit_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Blit Pipeline Layout"),
                bind_group_layouts: &[&blit_layout],
                push_constant_ranges: &[],
            });

        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
            layout: Some(&blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &blit_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &blit_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        log::info!(
            "Render: {}x{} surface, {resolution}x{resolution} canvas",
            config.window_width,
            config.window_height
        );

        Ok(Self {
            surface,
            device,
            queue,
            surface_config,
            canvas,
            canvas_view,
            feedback,
            feedback_view,
            video,
            video_view,
            text,
            text_view,
            sampler,
            composite_pipeline,
            composite_uniforms,
            composite_bind_group,
            sprite_pipeline,
            sprite_uniforms,
            sprite_layout,
            sprite_bind_groups: None,
            blit_pipeline,
            blit_uniforms,
            blit_bind_group,
            recording_config,
            resolution,
        })
    }

    /// Texture views the simulation stage samples as control inputs
    pub fn sim_textures(&self) -> SimTextures {
        SimTextures {
            feedback: &self.feedback_view,
            video: &self.video_view,
            text: &self.text_view,
            sampler: &self.sampler,
        }
    }

    /// Build the dual sprite bind groups against the live buffer pair.
    /// Called once during setup, after the pair exists on this device.
    pub fn attach_field(&mut self, pair: &BufferPair) {
        let bind_group = |read: usize| {
            let set = &pair.sets[read];
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Sprite Bind Group"),
                layout: &self.sprite_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: set.position.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: set.speed.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.sprite_uniforms.as_entire_binding(),
                    },
                ],
            })
        };
        self.sprite_bind_groups = Some([bind_group(0), bind_group(1)]);
    }

    /// Upload one RGBA video frame (resolution^2 * 4 bytes)
    pub fn upload_video(&self, data: &[u8]) {
        self.upload_rgba(&self.video, data);
    }

    /// Upload the text raster (resolution^2 * 4 bytes)
    pub fn upload_text(&self, data: &[u8]) {
        self.upload_rgba(&self.text, data);
    }

    fn upload_rgba(&self, texture: &wgpu::Texture, data: &[u8]) {
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.resolution * 4),
                rows_per_image: Some(self.resolution),
            },
            wgpu::Extent3d {
                width: self.resolution,
                height: self.resolution,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Reconfigure the surface after a window resize
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.queue.write_buffer(
            &self.blit_uniforms,
            0,
            bytemuck::cast_slice(&[BlitUniforms {
                scale: aspect_fit(width, height),
                _padding: [0.0; 2],
            }]),
        );
    }

    /// Encode the presentation passes for one frame: composite, sprites,
    /// feedback copy, surface blit. The returned surface texture is
    /// presented by the caller after queue submission.
    pub fn encode_frame(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pair: &BufferPair,
        params: &FrameParams,
    ) -> Result<wgpu::SurfaceTexture, wgpu::SurfaceError> {
        self.queue.write_buffer(
            &self.composite_uniforms,
            0,
            bytemuck::cast_slice(&[CompositeUniforms {
                text_opacity: params.text_opacity.clamp(0.0, 1.0),
                _padding: [0.0; 3],
            }]),
        );
        self.queue.write_buffer(
            &self.sprite_uniforms,
            0,
            bytemuck::cast_slice(&[SpriteUniforms {
                circle_size: params.circle_size.clamp(0.0, 1.0),
                opacity: params.opacity.clamp(0.0, 1.0),
                point_scale: 8.0 / self.resolution as f32,
                _padding: 0.0,
            }]),
        );

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Canvas Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.canvas_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.composite_pipeline);
            pass.set_bind_group(0, &self.composite_bind_group, &[]);
            pass.draw(0..3, 0..1); // Fullscreen triangle

            if let Some(ref groups) = self.sprite_bind_groups {
                if pair.count > 0 {
                    pass.set_pipeline(&self.sprite_pipeline);
                    pass.set_bind_group(0, &groups[pair.ping.read()], &[]);
                    pass.draw(0..4, 0..pair.count);
                }
            }
        }

        // The finished canvas becomes next frame's feedback input
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &self.canvas,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &self.feedback,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.resolution,
                height: self.resolution,
                depth_or_array_layers: 1,
            },
        );

        let output = self.surface.get_current_texture()?;
        let surface_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.blit_pipeline);
            pass.set_bind_group(0, &self.blit_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        Ok(output)
    }

    pub fn is_recording(&self) -> bool {
        self.recording_config.is_some()
    }

    /// Capture the logical canvas to disk (recording mode only)
    pub fn capture_frame(&self, frame_num: usize) {
        let Some(ref config) = self.recording_config else {
            return;
        };
        let size = self.resolution;
        let bytes_per_pixel = 4; // RGBA8
        let unpadded_bytes_per_row = size * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Capture Buffer"),
            size: (padded_bytes_per_row * size) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Capture Encoder"),
            });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.canvas,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(size),
                },
            },
            wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        buffer_slice.map_async(wgpu::MapMode::Read, |_| {});
        self.device.poll(wgpu::Maintain::Wait);

        let data = buffer_slice.get_mapped_range();
        let mut image_data = vec![0u8; (size * size * bytes_per_pixel) as usize];

        // Remove row padding
        for y in 0..size {
            let padded_offset = (y * padded_bytes_per_row) as usize;
            let unpadded_offset = (y * unpadded_bytes_per_row) as usize;
            image_data[unpadded_offset..unpadded_offset + unpadded_bytes_per_row as usize]
                .copy_from_slice(
                    &data[padded_offset..padded_offset + unpadded_bytes_per_row as usize],
                );
        }

        drop(data);
        buffer.unmap();

        let frame_path = format!("{}/frame_{:05}.png", config.frames_dir(), frame_num);
        if let Err(e) =
            image::save_buffer(&frame_path, &image_data, size, size, image::ColorType::Rgba8)
        {
            log::error!("Failed to save frame {frame_num}: {e}");
        }
    }
}

/// Scale factors fitting the square canvas into the window without
/// stretching; the uncovered area stays letterboxed black
fn aspect_fit(width: u32, height: u32) -> [f32; 2] {
    let aspect = width as f32 / height.max(1) as f32;
    if aspect > 1.0 {
        [1.0 / aspect, 1.0]
    } else {
        [1.0, aspect]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_fit_square_is_identity() {
        assert_eq!(aspect_fit(1080, 1080), [1.0, 1.0]);
    }

    #[test]
    fn test_aspect_fit_wide_window_pillarboxes() {
        let [x, y] = aspect_fit(1920, 1080);
        assert!(x < 1.0);
        assert_eq!(y, 1.0);
    }

    #[test]
    fn test_aspect_fit_tall_window_letterboxes() {
        let [x, y] = aspect_fit(1080, 1920);
        assert_eq!(x, 1.0);
        assert!(y < 1.0);
    }
}
