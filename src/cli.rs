//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::params::RecordingConfig;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "Lumafield")]
#[command(about = "Audio-reactive particle field installation", long_about = None)]
pub struct Args {
    /// Image sequence directory standing in for the live camera feed
    #[arg(long, value_name = "DIR")]
    pub video: Option<PathBuf>,

    /// Record the session to PNG frames + WAV (duration in seconds)
    #[arg(long, value_name = "SECONDS")]
    pub record: Option<f32>,

    /// Canvas pixels per particle
    #[arg(long, value_name = "PIXELS", default_value = "9")]
    pub density: u32,
}

impl Args {
    /// Create recording configuration if recording mode is enabled
    pub fn create_recording_config(&self) -> Option<RecordingConfig> {
        self.record.map(|duration| {
            let config = RecordingConfig::new(duration);

            // Create output directories
            std::fs::create_dir_all(config.frames_dir())
                .expect("Failed to create frames directory");
            std::fs::create_dir_all(&config.output_dir).expect("Failed to create output directory");

            config
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["lumafield"]);
        assert!(args.video.is_none());
        assert!(args.record.is_none());
        assert_eq!(args.density, 9);
    }

    #[test]
    fn test_record_duration() {
        let args = Args::parse_from(["lumafield", "--record", "12.5"]);
        assert_eq!(args.record, Some(12.5));
    }
}
