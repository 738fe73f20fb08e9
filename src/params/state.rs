//! Live control state fed in from the external control surface.

use serde::Deserialize;

/// Latest externally-supplied control values, read every frame.
///
/// Mutated only by [`ParamPatch::apply_to`]; last write per field wins.
/// Scalar fields are kept as supplied and clamped at point of use, so a
/// out-of-range slider never corrupts GPU buffers or the audio graph.
#[derive(Debug, Clone)]
pub struct ParameterState {
    /// Global particle speed multiplier (nominal [0, 25], sliders send speed^2)
    pub speed: f32,
    /// Particle sprite radius scale, normalized [0, 1]
    pub circle_size: f32,
    /// Depth of luma modulation on particle speed, normalized [0, 1]
    pub strength: f32,
    /// Fixed lowpass position, normalized [0, 1] (mapped through mtof * 200)
    pub lowpass: f32,
    /// Master output gain, normalized [0, 1]
    pub volume: f32,
    /// Typed text; drives the text raster and the audio delay taps
    pub text: String,
    /// Text layer compositing alpha, normalized [0, 1]
    pub text_opacity: f32,
    /// Per-ring rotation of the text layout, normalized [0, 1] of a full turn
    pub rotate: f32,
    /// Per-ring translation of the text layout, normalized [0, 1] of the width
    pub translate: f32,
    /// Particle sprite alpha, normalized [0, 1]
    pub opacity: f32,
    /// Velocity field rotation angle, normalized [0, 1] of a full turn
    pub angle: f32,
    /// Freeze video texture updates while true
    pub pause_video: bool,
    /// Gate for audio graph submission; false renders silence
    pub play_audio: bool,
    /// Resample trigger: each increment captures the current speed-change
    /// array into the engine's sample bank
    pub set_sample: u32,
}

impl Default for ParameterState {
    fn default() -> Self {
        Self {
            speed: 1.0,
            circle_size: 0.5,
            strength: 1.0,
            lowpass: 1.0,
            volume: 1.0,
            text: String::new(),
            text_opacity: 0.0,
            rotate: 0.0,
            translate: 0.0,
            opacity: 0.2,
            angle: 0.0,
            pause_video: false,
            play_audio: true,
            set_sample: 0,
        }
    }
}

/// Partial update sent by the control surface as `{"set": {..}}`.
///
/// Missing fields leave the current value untouched. Non-finite scalars are
/// dropped on merge so a malformed message can never inject NaN/Inf.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParamPatch {
    pub speed: Option<f32>,
    pub circle_size: Option<f32>,
    pub strength: Option<f32>,
    pub lowpass: Option<f32>,
    pub volume: Option<f32>,
    pub text: Option<String>,
    pub text_opacity: Option<f32>,
    pub rotate: Option<f32>,
    pub translate: Option<f32>,
    pub opacity: Option<f32>,
    pub angle: Option<f32>,
    pub pause_video: Option<bool>,
    pub play_audio: Option<bool>,
    pub set_sample: Option<u32>,
}

impl ParamPatch {
    /// Shallow merge into `state`, last write per field wins.
    pub fn apply_to(&self, state: &mut ParameterState) {
        merge_finite(&mut state.speed, self.speed);
        merge_finite(&mut state.circle_size, self.circle_size);
        merge_finite(&mut state.strength, self.strength);
        merge_finite(&mut state.lowpass, self.lowpass);
        merge_finite(&mut state.volume, self.volume);
        if let Some(text) = &self.text {
            state.text = text.clone();
        }
        merge_finite(&mut state.text_opacity, self.text_opacity);
        merge_finite(&mut state.rotate, self.rotate);
        merge_finite(&mut state.translate, self.translate);
        merge_finite(&mut state.opacity, self.opacity);
        merge_finite(&mut state.angle, self.angle);
        if let Some(pause) = self.pause_video {
            state.pause_video = pause;
        }
        if let Some(play) = self.play_audio {
            state.play_audio = play;
        }
        if let Some(sample) = self.set_sample {
            state.set_sample = sample;
        }
    }
}

fn merge_finite(target: &mut f32, value: Option<f32>) {
    match value {
        Some(v) if v.is_finite() => *target = v,
        Some(v) => log::warn!("Dropping non-finite parameter value {v}"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_merges_only_present_fields() {
        let mut state = ParameterState::default();
        let patch = ParamPatch {
            speed: Some(2.5),
            text: Some("hi".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut state);

        assert_eq!(state.speed, 2.5);
        assert_eq!(state.text, "hi");
        // Untouched fields keep their defaults
        assert_eq!(state.circle_size, 0.5);
        assert_eq!(state.volume, 1.0);
    }

    #[test]
    fn test_last_write_wins_per_field() {
        let mut state = ParameterState::default();
        ParamPatch {
            volume: Some(0.3),
            ..Default::default()
        }
        .apply_to(&mut state);
        ParamPatch {
            volume: Some(0.8),
            ..Default::default()
        }
        .apply_to(&mut state);

        assert_eq!(state.volume, 0.8);
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let mut state = ParameterState::default();
        ParamPatch {
            speed: Some(f32::NAN),
            strength: Some(f32::INFINITY),
            ..Default::default()
        }
        .apply_to(&mut state);

        assert_eq!(state.speed, 1.0);
        assert_eq!(state.strength, 1.0);
    }

    #[test]
    fn test_patch_deserializes_from_control_json() {
        let patch: ParamPatch =
            serde_json::from_str(r#"{"speed": 0.5, "text": "abc", "pause_video": true}"#).unwrap();
        assert_eq!(patch.speed, Some(0.5));
        assert_eq!(patch.text.as_deref(), Some("abc"));
        assert_eq!(patch.pause_video, Some(true));
        assert!(patch.volume.is_none());
    }
}
