//! Lumafield library - audio-reactive particle field installation

pub mod audio;
pub mod cli;
pub mod control;
pub mod params;
pub mod particles;
pub mod render;
pub mod text;
pub mod video;
