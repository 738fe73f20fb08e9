//! Declarative stereo signal graph, rebuilt every tick.
//!
//! The graph is an immutable expression tree, not a runtime object graph:
//! a pure function of (telemetry, parameters) with no retained state. Every
//! tunable leaf is a named constant with a stable string key; the engine
//! interpolates identically-keyed values across rebuilds instead of stepping
//! them, so topology can change every tick without clicks.

use crate::params::audio_constants::{key_index, KEY_NOTE_RANGE, KEY_SPAN};
use crate::params::{AudioConfig, ParameterState};
use crate::particles::TelemetrySummary;

/// One node of the signal expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    WhiteNoise,
    PinkNoise,
    /// Tunable leaf; `key` is the engine's interpolation handle
    Const { key: String, value: f32 },
    /// One-pole smoothing of a control signal, time constant in seconds
    Smooth { tau_s: f32, input: Box<Signal> },
    /// Fixed-size delay line; `time_ms` is a control signal in milliseconds
    Delay {
        key: String,
        size: usize,
        time_ms: Box<Signal>,
        feedback: f32,
        input: Box<Signal>,
    },
    /// Resonant lowpass; cutoff is a control signal in Hz
    Lowpass {
        cutoff: Box<Signal>,
        q: f32,
        input: Box<Signal>,
    },
    /// Product of all inputs
    Mul(Vec<Signal>),
}

/// Scaling and pitch helpers shared by the builder and the engine.
pub mod math {
    /// MIDI note number to frequency (Hz), A4 = 440
    pub fn mtof(note: f32) -> f32 {
        440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
    }

    /// Linear range mapping with clamped input. A degenerate input range
    /// maps everything to `out_min` instead of dividing by zero.
    pub fn scale(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
        scale_exp(x, in_min, in_max, out_min, out_max, 1.0)
    }

    /// Range mapping with an exponent applied to the normalized position
    pub fn scale_exp(
        x: f32,
        in_min: f32,
        in_max: f32,
        out_min: f32,
        out_max: f32,
        exponent: f32,
    ) -> f32 {
        let span = in_max - in_min;
        let t = if span.abs() < f32::EPSILON {
            0.0
        } else {
            ((x - in_min) / span).clamp(0.0, 1.0)
        };
        out_min + t.powf(exponent) * (out_max - out_min)
    }

    /// Time constant (seconds) to one-pole coefficient at `sample_rate`
    pub fn tau2pole(tau_s: f32, sample_rate: f32) -> f32 {
        (-1.0 / (tau_s.max(1e-6) * sample_rate)).exp()
    }

    /// Milliseconds to (fractional) samples
    pub fn ms2samps(ms: f32, sample_rate: f32) -> f32 {
        (ms * sample_rate / 1000.0).max(0.0)
    }
}

/// Delay tap plan for the current text: (absolute character index, delay ms).
///
/// Only the last `max_taps` characters get taps; the key index of each
/// character maps to a pitch, and the tap delay is that pitch's period in
/// milliseconds. Characters outside the key row fall to the bottom of the
/// range rather than erroring.
pub fn delay_taps(text: &str, max_taps: usize) -> Vec<(usize, f32)> {
    let letters: Vec<char> = text.chars().collect();
    let start = letters.len().saturating_sub(max_taps);
    letters[start..]
        .iter()
        .enumerate()
        .map(|(offset, &ch)| {
            let index = start + offset;
            let degree = key_index(ch).map(|v| v as f32).unwrap_or(-1.0);
            let note = math::scale(degree, 0.0, KEY_SPAN, KEY_NOTE_RANGE.0, KEY_NOTE_RANGE.1);
            (index, 1000.0 / math::mtof(note))
        })
        .collect()
}

/// Complementary per-channel pan gain for a given pan telemetry value.
///
/// Channel 0 and 1 get mirrored scale ranges so they move in opposition:
/// at `pan_mean == 0` both sit at full (center) gain, and a positive
/// excursion raises one channel exactly as the mirrored excursion raises
/// the other.
pub fn pan_gain(channel: usize, pan_mean: f32, range: f32) -> f32 {
    if channel == 0 {
        math::scale(pan_mean, -range, 0.0, 0.0, 1.0)
    } else {
        math::scale(pan_mean, 0.0, range, 1.0, 0.0)
    }
}

/// Noise excitation filtered through per-character delay taps
fn excitation(text: &str, config: &AudioConfig) -> Signal {
    let mut signal = Signal::PinkNoise;
    for (index, amount_ms) in delay_taps(text, config.max_delay_taps) {
        let key = format!("delay-{index}");
        signal = Signal::Delay {
            key: key.clone(),
            size: config.delay_line_size,
            time_ms: Box::new(Signal::Const {
                key,
                value: amount_ms,
            }),
            feedback: config.delay_feedback,
            input: Box::new(signal),
        };
    }
    signal
}

fn build_channel(
    channel: usize,
    telemetry: &TelemetrySummary,
    params: &ParameterState,
    config: &AudioConfig,
) -> Signal {
    let change = telemetry.speed_change_mean;
    let excursion = if change < 0.0 {
        change * config.decel_cutoff_scale
    } else {
        change * config.accel_cutoff_scale
    };
    let cutoff = (config.base_cutoff_hz + excursion)
        .clamp(config.cutoff_range_hz.0, config.cutoff_range_hz.1);

    let reactive_lowpass = Signal::Lowpass {
        cutoff: Box::new(Signal::Smooth {
            tau_s: config.smoothing_tau_s,
            input: Box::new(Signal::Const {
                key: "freq".to_string(),
                value: cutoff,
            }),
        }),
        q: math::scale_exp(telemetry.speed_mean, 0.0, 20.0, 0.0, 1.0, 2.0),
        input: Box::new(excitation(&params.text, config)),
    };

    // Second, fixed lowpass governed by the lowpass control, in series
    let fixed_lowpass = Signal::Lowpass {
        cutoff: Box::new(Signal::Const {
            key: "lowpass".to_string(),
            value: math::mtof(params.lowpass.clamp(0.0, 1.0) * 200.0),
        }),
        q: 1.0,
        input: Box::new(reactive_lowpass),
    };

    let pan = Signal::Smooth {
        tau_s: config.smoothing_tau_s,
        input: Box::new(Signal::Const {
            key: format!("{channel}:pan"),
            value: pan_gain(channel, telemetry.pan_mean, config.pan_change_scale),
        }),
    };

    Signal::Mul(vec![
        fixed_lowpass,
        pan,
        Signal::Const {
            key: "volume".to_string(),
            value: params.volume.clamp(0.0, 1.0),
        },
    ])
}

/// Build both channel graphs for the current tick
pub fn build_stereo_graph(
    telemetry: &TelemetrySummary,
    params: &ParameterState,
    config: &AudioConfig,
) -> [Signal; 2] {
    [
        build_channel(0, telemetry, params, config),
        build_channel(1, telemetry, params, config),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_const(signal: &Signal, key: &str) -> Option<f32> {
        match signal {
            Signal::Const { key: k, value } if k == key => Some(*value),
            Signal::Const { .. } | Signal::WhiteNoise | Signal::PinkNoise => None,
            Signal::Smooth { input, .. } => find_const(input, key),
            Signal::Delay { time_ms, input, .. } => {
                find_const(time_ms, key).or_else(|| find_const(input, key))
            }
            Signal::Lowpass { cutoff, input, .. } => {
                find_const(cutoff, key).or_else(|| find_const(input, key))
            }
            Signal::Mul(inputs) => inputs.iter().find_map(|s| find_const(s, key)),
        }
    }

    fn count_delays(signal: &Signal) -> usize {
        match signal {
            Signal::Delay { input, .. } => 1 + count_delays(input),
            Signal::Smooth { input, .. } => count_delays(input),
            Signal::Lowpass { input, .. } => count_delays(input),
            Signal::Mul(inputs) => inputs.iter().map(count_delays).sum(),
            _ => 0,
        }
    }

    #[test]
    fn test_mtof_reference_points() {
        assert!((math::mtof(69.0) - 440.0).abs() < 1e-3);
        assert!((math::mtof(57.0) - 220.0).abs() < 1e-3);
    }

    #[test]
    fn test_scale_clamps_and_guards_zero_span() {
        assert_eq!(math::scale(5.0, 0.0, 1.0, 0.0, 10.0), 10.0);
        assert_eq!(math::scale(-5.0, 0.0, 1.0, 0.0, 10.0), 0.0);
        // Degenerate range must not divide by zero
        assert_eq!(math::scale(3.0, 2.0, 2.0, 0.0, 10.0), 0.0);
    }

    #[test]
    fn test_empty_text_builds_zero_taps() {
        assert!(delay_taps("", 10).is_empty());
    }

    #[test]
    fn test_eleven_chars_build_last_ten_taps() {
        let taps = delay_taps("abcdefghijk", 10);
        assert_eq!(taps.len(), 10);
        // Absolute indices of characters 2..11 (0-based 1..=10)
        let indices: Vec<usize> = taps.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (1..=10).collect::<Vec<_>>());
        for (_, ms) in &taps {
            assert!(*ms > 0.0 && ms.is_finite());
        }
    }

    #[test]
    fn test_unknown_characters_fall_to_range_bottom() {
        let taps = delay_taps("€", 10);
        assert_eq!(taps.len(), 1);
        let expected = 1000.0 / math::mtof(KEY_NOTE_RANGE.0);
        assert!((taps[0].1 - expected).abs() < 1e-3);
    }

    #[test]
    fn test_delay_keys_follow_absolute_index() {
        let telemetry = TelemetrySummary::default();
        let params = ParameterState {
            text: "abcdefghijk".to_string(),
            ..ParameterState::default()
        };
        let config = AudioConfig::default();
        let [left, _] = build_stereo_graph(&telemetry, &params, &config);

        assert_eq!(count_delays(&left), 10);
        assert!(find_const(&left, "delay-1").is_some());
        assert!(find_const(&left, "delay-10").is_some());
        assert!(find_const(&left, "delay-0").is_none());
    }

    #[test]
    fn test_pan_symmetry() {
        let range = 0.1;
        // Center: both channels at full gain
        assert!((pan_gain(0, 0.0, range) - 1.0).abs() < 1e-6);
        assert!((pan_gain(1, 0.0, range) - 1.0).abs() < 1e-6);
        // Mirrored excursions are numerically complementary
        for p in [-0.1_f32, -0.05, 0.02, 0.07, 0.1] {
            assert!((pan_gain(0, p, range) - pan_gain(1, -p, range)).abs() < 1e-6);
        }
        // Full positive pan mutes channel 1, full negative mutes channel 0
        assert!(pan_gain(1, 0.1, range) < 1e-6);
        assert!(pan_gain(0, -0.1, range) < 1e-6);
    }

    #[test]
    fn test_cutoff_clamped_for_extreme_telemetry() {
        let config = AudioConfig::default();
        let params = ParameterState::default();
        for change in [-1e6_f32, -5.0, 0.0, 5.0, 1e6] {
            let telemetry = TelemetrySummary {
                speed_change_mean: change,
                ..TelemetrySummary::default()
            };
            let [left, _] = build_stereo_graph(&telemetry, &params, &config);
            let cutoff = find_const(&left, "freq").unwrap();
            assert!((100.0..=30_000.0).contains(&cutoff), "cutoff {cutoff}");
        }
    }

    #[test]
    fn test_volume_leaf_present_and_clamped() {
        let telemetry = TelemetrySummary::default();
        let params = ParameterState {
            volume: 3.0,
            ..ParameterState::default()
        };
        let config = AudioConfig::default();
        let [left, right] = build_stereo_graph(&telemetry, &params, &config);
        assert_eq!(find_const(&left, "volume"), Some(1.0));
        assert_eq!(find_const(&right, "volume"), Some(1.0));
    }

    #[test]
    fn test_channels_share_keys_except_pan() {
        let telemetry = TelemetrySummary::default();
        let params = ParameterState::default();
        let config = AudioConfig::default();
        let [left, right] = build_stereo_graph(&telemetry, &params, &config);
        assert!(find_const(&left, "0:pan").is_some());
        assert!(find_const(&left, "1:pan").is_none());
        assert!(find_const(&right, "1:pan").is_some());
        assert_eq!(find_const(&left, "freq"), find_const(&right, "freq"));
    }
}
