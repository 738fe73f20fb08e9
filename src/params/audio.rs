//! Audio synthesis configuration and constants.

/// Synthesis configuration with telemetry-to-sound mappings
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Output sample rate (Hz)
    pub sample_rate_hz: usize,

    /// Base cutoff of the telemetry lowpass (Hz), before the speed-change
    /// excursion is added
    pub base_cutoff_hz: f32,

    /// Cutoff excursion per unit of (scaled) deceleration
    pub decel_cutoff_scale: f32,

    /// Cutoff excursion per unit of (scaled) acceleration
    pub accel_cutoff_scale: f32,

    /// Cutoff clamp range (Hz)
    pub cutoff_range_hz: (f32, f32),

    /// Smoothing time constant for the keyed control values (seconds)
    pub smoothing_tau_s: f32,

    /// Bipolar pan gain range driven by the pan telemetry
    pub pan_change_scale: f32,

    /// Delay line length per text character (samples)
    pub delay_line_size: usize,

    /// Delay tap feedback amount, normalized [0, 1)
    pub delay_feedback: f32,

    /// Only the last N characters of the text get delay taps
    pub max_delay_taps: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            base_cutoff_hz: 500.0,
            decel_cutoff_scale: 500.0,
            accel_cutoff_scale: 4000.0,
            cutoff_range_hz: (100.0, 30_000.0),
            smoothing_tau_s: 2.0,
            pan_change_scale: 0.1,
            delay_line_size: 44_100,
            delay_feedback: 0.1,
            max_delay_taps: 10,
        }
    }
}

impl AudioConfig {
    /// Validate configuration before the engine starts
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.sample_rate_hz > 0, "Sample rate must be > 0");
        anyhow::ensure!(self.delay_line_size > 0, "Delay line size must be > 0");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.delay_feedback),
            "Delay feedback must be in [0, 1), got {}",
            self.delay_feedback
        );
        Ok(())
    }
}

/// Audio constants (compile-time, match the engine block setup)
pub mod audio_constants {
    /// Samples rendered per engine block
    pub const BLOCK_SIZE: usize = 128;

    /// Keyed constants ramp to a new value over this many samples so a
    /// rebuilt graph never steps the signal audibly
    pub const CONST_RAMP_SAMPLES: usize = 256;

    /// Telemetry scale: mean speed first-difference -> filter drive
    pub const SPEED_CHANGE_SCALE: f32 = 100.0;

    /// Telemetry scale: mean pan readback -> stereo position drive
    pub const PAN_SCALE: f32 = 1000.0;

    /// Scale degrees spanned by the key row mapping (text -> pitch)
    pub const KEY_SPAN: f32 = 48.0;

    /// MIDI note range the key row maps onto
    pub const KEY_NOTE_RANGE: (f32, f32) = (30.0, 127.0);

    /// Keyboard row order used to map typed characters to scale indices.
    /// A character's position here is its pitch index; characters not in
    /// the row fall to the bottom of the range.
    pub const KEY_ROW: [char; 47] = [
        '`', '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', '-', '=', 'q', 'w', 'e', 'r', 't',
        'y', 'u', 'i', 'o', 'p', '[', ']', 'a', 's', 'd', 'f', 'g', 'h', 'j', 'k', 'l', ';', '\'',
        '\n', 'z', 'x', 'c', 'v', 'b', 'n', 'm', ',', '.', '/',
    ];

    /// Scale index for a typed character
    pub fn key_index(c: char) -> Option<usize> {
        KEY_ROW.iter().position(|&k| k == c.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AudioConfig::default().validate().is_ok());
    }

    #[test]
    fn test_feedback_out_of_range_rejected() {
        let config = AudioConfig {
            delay_feedback: 1.5,
            ..AudioConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_row_lookup() {
        assert_eq!(audio_constants::key_index('`'), Some(0));
        assert_eq!(audio_constants::key_index('q'), Some(13));
        assert_eq!(audio_constants::key_index('Q'), Some(13));
        assert_eq!(audio_constants::key_index('/'), Some(46));
        assert_eq!(audio_constants::key_index('😀'), None);
    }
}
