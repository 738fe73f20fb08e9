//! Audio output system.
//!
//! Owns the cpal output stream and the graph engine living inside its
//! callback. The frame loop posts freshly-built graphs into a mailbox; the
//! callback drains it at block boundaries. Audio runs on its own real-time
//! clock, decoupled from the video frame rate.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::params::audio_constants::BLOCK_SIZE;
use crate::params::{AudioConfig, RecordingConfig};

use super::engine::GraphEngine;
use super::graph::Signal;

/// Pending updates handed from the frame loop to the audio callback
#[derive(Default)]
struct Mailbox {
    /// `Some(Some(_))` = new graphs, `Some(None)` = go silent
    graphs: Option<Option<[Signal; 2]>>,
    samples: Vec<(String, Vec<f32>)>,
}

/// Audio system managing the output stream and graph submission
pub struct AudioSystem {
    mailbox: Arc<Mutex<Mailbox>>,

    /// Audio output stream (kept alive)
    _stream: cpal::Stream,
}

impl AudioSystem {
    /// Create and start the audio system
    pub fn new(
        config: AudioConfig,
        recording_config: Option<RecordingConfig>,
    ) -> anyhow::Result<Self> {
        config.validate().context("Invalid audio config")?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No audio output device found"))?;

        let stream_config = device
            .default_output_config()
            .context("Failed to get audio config")?;
        let sample_rate = stream_config.sample_rate().0;

        log::info!(
            "Audio: {} @ {}Hz",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            sample_rate
        );

        // Create WAV writer if recording
        let wav_writer = recording_config
            .as_ref()
            .map(|config| -> anyhow::Result<_> {
                let spec = hound::WavSpec {
                    channels: 2,
                    sample_rate,
                    bits_per_sample: 32,
                    sample_format: hound::SampleFormat::Float,
                };
                let writer = hound::WavWriter::create(config.audio_path(), spec)
                    .context("Failed to create WAV writer")?;
                Ok(Arc::new(Mutex::new(writer)))
            })
            .transpose()?;

        let mailbox = Arc::new(Mutex::new(Mailbox::default()));
        let mailbox_cb = Arc::clone(&mailbox);

        // Engine lives inside the callback; only the mailbox is shared
        let mut engine = GraphEngine::new(sample_rate as f32);
        let mut left = vec![0.0f32; BLOCK_SIZE];
        let mut right = vec![0.0f32; BLOCK_SIZE];

        let stream = device
            .build_output_stream(
                &stream_config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // try_lock only: a contended mailbox delays the update
                    // by one block instead of stalling the audio thread
                    if let Ok(mut mailbox) = mailbox_cb.try_lock() {
                        if let Some(update) = mailbox.graphs.take() {
                            engine.set_graph(update);
                        }
                        for (name, table) in mailbox.samples.drain(..) {
                            engine.register_sample(name, table);
                        }
                    }

                    let frames_needed = data.len() / 2; // Stereo frames
                    let mut frame_idx = 0;

                    while frame_idx < frames_needed {
                        let block = (frames_needed - frame_idx).min(BLOCK_SIZE);
                        engine.render_block(&mut left[..block], &mut right[..block]);

                        for i in 0..block {
                            // Safety limiter: hard clip to ±0.5
                            let l = left[i].clamp(-0.5, 0.5);
                            let r = right[i].clamp(-0.5, 0.5);

                            let out_idx = (frame_idx + i) * 2;
                            data[out_idx] = l;
                            data[out_idx + 1] = r;

                            if let Some(ref writer) = wav_writer {
                                if let Ok(mut w) = writer.lock() {
                                    let _ = w.write_sample(l);
                                    let _ = w.write_sample(r);
                                }
                            }
                        }

                        frame_idx += block;
                    }
                },
                |err| log::error!("Audio stream error: {err}"),
                None,
            )
            .context("Failed to build audio stream")?;

        stream.play().context("Failed to start audio stream")?;

        Ok(Self {
            mailbox,
            _stream: stream,
        })
    }

    /// Post the graphs for the next tick; `None` renders silence.
    /// Last submission before a block boundary wins.
    pub fn submit(&self, graphs: Option<[Signal; 2]>) {
        if let Ok(mut mailbox) = self.mailbox.lock() {
            mailbox.graphs = Some(graphs);
        }
    }

    /// Hand an impulse table to the engine's sample bank
    pub fn register_sample(&self, name: String, table: Vec<f32>) {
        if let Ok(mut mailbox) = self.mailbox.lock() {
            mailbox.samples.push((name, table));
        }
    }
}
