//! Lumafield - an interactive audiovisual particle field
//!
//! A GPU particle field advances through a self-feedback simulation
//! modulated by video, typed text, and an external control surface; its
//! telemetry drives a generative stereo synthesis graph rebuilt every frame.

use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Instant;

use clap::Parser;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use lumafield::audio::{build_stereo_graph, AudioSystem};
use lumafield::cli::Args;
use lumafield::control::spawn_stdin_listener;
use lumafield::params::{
    AudioConfig, ParamPatch, ParameterState, RecordingConfig, RenderConfig, SimConfig,
};
use lumafield::particles::{
    init_particles, BufferPair, FeedbackSim, ReadbackBuffers, Telemetry,
};
use lumafield::render::{FrameParams, RenderSystem};
use lumafield::text::TextRaster;
use lumafield::video::VideoInput;

/// GPU-side simulation state, created once the device exists
struct Field {
    pair: BufferPair,
    sim: FeedbackSim,
    readback: ReadbackBuffers,
    telemetry: Telemetry,
}

/// Main application state
struct App {
    // Window and rendering
    window: Option<Arc<Window>>,
    render_system: Option<RenderSystem>,
    field: Option<Field>,

    // Inputs and outputs
    video: Option<VideoInput>,
    audio: Option<AudioSystem>,
    text_raster: TextRaster,
    control_rx: mpsc::Receiver<ParamPatch>,

    // Live state
    params: ParameterState,
    // Raster inputs of the uploaded text texture
    text_key: (String, f32, f32),
    sample_slot: u32,

    // Configuration
    sim_config: SimConfig,
    audio_config: AudioConfig,
    render_config: RenderConfig,
    recording: Option<RecordingConfig>,
    video_path: Option<PathBuf>,

    // Time tracking
    start_time: Instant,
    last_frame: Instant,
    frame_num: usize,
}

impl App {
    fn new(args: &Args) -> Self {
        let sim_config = SimConfig {
            density: args.density,
            ..SimConfig::default()
        };

        Self {
            window: None,
            render_system: None,
            field: None,
            video: None,
            audio: None,
            text_raster: TextRaster::new(sim_config.resolution),
            control_rx: spawn_stdin_listener(),
            params: ParameterState::default(),
            text_key: (String::new(), 0.0, 0.0),
            sample_slot: 0,
            sim_config,
            audio_config: AudioConfig::default(),
            render_config: RenderConfig::default(),
            recording: args.create_recording_config(),
            video_path: args.video.clone(),
            start_time: Instant::now(),
            last_frame: Instant::now(),
            frame_num: 0,
        }
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized
        }

        let window_attributes = Window::default_attributes()
            .with_title("Lumafield")
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.render_config.window_width,
                self.render_config.window_height,
            ));

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .expect("Failed to create window"),
        );

        let mut render_system = pollster::block_on(RenderSystem::new(
            Arc::clone(&window),
            &self.render_config,
            self.sim_config.resolution,
            self.recording.clone(),
        ))
        .expect("Failed to initialize rendering");

        let seed = init_particles(self.sim_config.particle_count());
        let pair = BufferPair::new(&render_system.device, &seed);
        render_system.attach_field(&pair);
        let sim = FeedbackSim::new(
            &render_system.device,
            &pair,
            render_system.sim_textures(),
            self.sim_config.clone(),
        );
        let readback = ReadbackBuffers::new(&render_system.device, pair.count);
        let telemetry = Telemetry::new(pair.count);
        log::info!("Field: {} particles", pair.count);

        self.video = VideoInput::acquire(self.video_path.as_deref(), self.sim_config.resolution);

        let audio = AudioSystem::new(self.audio_config.clone(), self.recording.clone())
            .expect("Failed to initialize audio");

        println!("\nLumafield is running!");
        println!("Press ESC to quit\n");

        self.window = Some(window);
        self.render_system = Some(render_system);
        self.field = Some(Field {
            pair,
            sim,
            readback,
            telemetry,
        });
        self.audio = Some(audio);
        self.last_frame = Instant::now();
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(render_system) = self.render_system.as_mut() {
                    render_system.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if self.render_frame() {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }
}

impl App {
    /// Render a single frame. Returns true when a recording run is complete.
    fn render_frame(&mut self) -> bool {
        let Some(render_system) = self.render_system.as_ref() else {
            return false;
        };
        let Some(field) = self.field.as_mut() else {
            return false;
        };

        // Latest control patches win before anything else reads the params
        while let Ok(patch) = self.control_rx.try_recv() {
            patch.apply_to(&mut self.params);
        }

        let now = Instant::now();
        let delta_time = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;
        let time_s = self.start_time.elapsed().as_secs_f32();

        if !self.params.pause_video {
            if let Some(video) = self.video.as_mut() {
                render_system.upload_video(video.next_frame());
            }
        }

        let text_key = (
            self.params.text.clone(),
            self.params.rotate,
            self.params.translate,
        );
        if text_key != self.text_key {
            self.text_raster
                .render(&text_key.0, text_key.1, text_key.2);
            render_system.upload_text(self.text_raster.data());
            self.text_key = text_key;
        }

        let mut encoder =
            render_system
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                });

        // Sim step swaps the buffer roles; everything after reads the
        // just-written set
        field.sim.step(
            &render_system.queue,
            &mut encoder,
            &mut field.pair,
            &self.params,
            delta_time,
            time_s,
        );
        field.readback.encode_copy(&mut encoder, field.pair.current());

        let output = match render_system.encode_frame(
            &mut encoder,
            &field.pair,
            &FrameParams {
                text_opacity: self.params.text_opacity,
                circle_size: self.params.circle_size,
                opacity: self.params.opacity,
            },
        ) {
            Ok(output) => Some(output),
            Err(e) => {
                log::error!("Surface error: {e:?}");
                None
            }
        };

        render_system
            .queue
            .submit(std::iter::once(encoder.finish()));

        let (speeds, pan) = field.readback.read(&render_system.device);
        field.telemetry.ingest(&speeds, &pan);

        if let Some(audio) = self.audio.as_ref() {
            if self.params.set_sample != self.sample_slot {
                self.sample_slot = self.params.set_sample;
                audio.register_sample(
                    format!("convolution-{}", self.sample_slot),
                    field.telemetry.normalized_speed_change(),
                );
            }

            let graphs =
                build_stereo_graph(&field.telemetry.summary(), &self.params, &self.audio_config);
            audio.submit(if self.params.play_audio {
                Some(graphs)
            } else {
                None
            });
        }

        if render_system.is_recording() {
            render_system.capture_frame(self.frame_num);
        }

        if let Some(output) = output {
            output.present();
        }

        self.frame_num += 1;
        if let Some(recording) = self.recording.as_ref() {
            if self.frame_num >= recording.total_frames() {
                println!("\nRecording complete: {} frames", self.frame_num);
                return true;
            }
        }
        false
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    println!("Lumafield - audio-reactive particle field");
    println!("Initializing systems...\n");

    let mut app = App::new(&args);
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let _ = event_loop.run_app(&mut app);
}
