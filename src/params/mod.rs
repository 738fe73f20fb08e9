//! Parameter definitions with documented ranges and semantics.
//!
//! All magic numbers are extracted here with:
//! - Units (seconds, Hz, samples, normalized [0,1] ranges)
//! - Documented ranges and meanings
//! - `Default` impls matching the installation's boot state

mod audio;
mod render;
mod sim;
mod state;

// Re-export all types
pub use audio::{audio_constants, AudioConfig};
pub use render::{RecordingConfig, RenderConfig};
pub use sim::SimConfig;
pub use state::{ParamPatch, ParameterState};
