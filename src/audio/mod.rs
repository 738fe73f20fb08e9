//! Generative audio: declarative signal graphs built from simulation
//! telemetry, rendered by a keyed real-time engine.

mod engine;
mod graph;
mod system;

pub use engine::GraphEngine;
pub use graph::{build_stereo_graph, delay_taps, math, pan_gain, Signal};
pub use system::AudioSystem;
