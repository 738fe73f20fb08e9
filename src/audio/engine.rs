//! Keyed graph engine: renders the declarative [`Signal`] trees in real
//! time, preserving state across rebuilds by node key.
//!
//! The graph topology may change every tick, but stateful nodes whose key
//! survives a rebuild keep their state: delay lines keep their contents,
//! smoothers keep their output, and named constants ramp to new values over
//! a short window instead of stepping. This is what makes per-tick rebuilds
//! click-free.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::params::audio_constants::CONST_RAMP_SAMPLES;

use super::graph::{math, Signal};

/// Named constant with a linear ramp toward its latest value
#[derive(Debug, Clone)]
struct ConstRamp {
    current: f32,
    target: f32,
    remaining: usize,
}

impl ConstRamp {
    fn starting_at(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            remaining: 0,
        }
    }

    fn retarget(&mut self, value: f32) {
        self.target = value;
        self.remaining = if (value - self.current).abs() > f32::EPSILON {
            CONST_RAMP_SAMPLES
        } else {
            0
        };
    }

    fn tick(&mut self) -> f32 {
        if self.remaining > 0 {
            self.current += (self.target - self.current) / self.remaining as f32;
            self.remaining -= 1;
        } else {
            self.current = self.target;
        }
        self.current
    }
}

/// Fixed-size ring buffer with feedback
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size],
            write: 0,
        }
    }

    fn process(&mut self, x: f32, delay_samples: f32, feedback: f32) -> f32 {
        let size = self.buffer.len();
        let delay = (delay_samples as usize).clamp(1, size - 1);
        let read = (self.write + size - delay) % size;
        let out = self.buffer[read];
        self.buffer[self.write] = x + feedback * out;
        self.write = (self.write + 1) % size;
        out
    }
}

/// RBJ lowpass biquad; coefficients recomputed when the cutoff or Q moves
#[derive(Debug, Clone, Default)]
struct Biquad {
    cached_cutoff: f32,
    cached_q: f32,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    fn process(&mut self, x: f32, cutoff_hz: f32, q: f32, sample_rate: f32) -> f32 {
        let cutoff = cutoff_hz.clamp(10.0, 0.45 * sample_rate);
        let q = q.clamp(0.05, 20.0);
        if (cutoff - self.cached_cutoff).abs() > 0.01 || (q - self.cached_q).abs() > 1e-3 {
            self.recompute(cutoff, q, sample_rate);
        }
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    fn recompute(&mut self, cutoff: f32, q: f32, sample_rate: f32) {
        let omega = std::f32::consts::TAU * cutoff / sample_rate;
        let alpha = omega.sin() / (2.0 * q);
        let cosw = omega.cos();
        let a0 = 1.0 + alpha;
        self.b0 = (1.0 - cosw) / 2.0 / a0;
        self.b1 = (1.0 - cosw) / a0;
        self.b2 = self.b0;
        self.a1 = -2.0 * cosw / a0;
        self.a2 = (1.0 - alpha) / a0;
        self.cached_cutoff = cutoff;
        self.cached_q = q;
    }
}

/// Pink noise filter state (Paul Kellet economy approximation)
#[derive(Debug, Clone, Default)]
struct PinkState {
    b0: f32,
    b1: f32,
    b2: f32,
}

impl PinkState {
    fn process(&mut self, white: f32) -> f32 {
        self.b0 = 0.99765 * self.b0 + white * 0.0990460;
        self.b1 = 0.96300 * self.b1 + white * 0.2965164;
        self.b2 = 0.57000 * self.b2 + white * 1.0526913;
        (self.b0 + self.b1 + self.b2 + white * 0.1848) * 0.2
    }
}

/// State detached from a retired program, waiting for a matching key
enum NodeState {
    Const(ConstRamp),
    Smooth(f32),
    Delay(DelayLine),
    Lowpass(Biquad),
    Pink(PinkState),
}

/// One node of a compiled program; inputs reference lower indices
enum CompiledNode {
    White,
    Pink {
        key: String,
        state: PinkState,
    },
    Const {
        key: String,
        state: ConstRamp,
    },
    Smooth {
        key: String,
        pole: f32,
        y: f32,
        input: usize,
    },
    Delay {
        key: String,
        state: DelayLine,
        feedback: f32,
        time_ms: usize,
        input: usize,
    },
    Lowpass {
        key: String,
        state: Biquad,
        q: f32,
        cutoff: usize,
        input: usize,
    },
    Mul {
        inputs: Vec<usize>,
    },
}

struct Program {
    nodes: Vec<CompiledNode>,
    values: Vec<f32>,
    root: usize,
}

/// Real-time renderer for a pair of channel graphs
pub struct GraphEngine {
    sample_rate: f32,
    programs: [Option<Program>; 2],
    stash: HashMap<String, NodeState>,
    samples: HashMap<String, Vec<f32>>,
    rng: SmallRng,
}

impl GraphEngine {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            programs: [None, None],
            stash: HashMap::new(),
            samples: HashMap::new(),
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Install new channel graphs, or `None` for silence.
    ///
    /// States of the outgoing programs are stashed by key before the new
    /// ones compile, so identically-keyed nodes pick up where they left
    /// off. A compile error leaves the engine silent rather than panicking;
    /// an uncaught failure here would stop sound output entirely.
    pub fn set_graph(&mut self, graphs: Option<[Signal; 2]>) {
        for chan in 0..2 {
            if let Some(program) = self.programs[chan].take() {
                self.harvest(chan, program);
            }
        }
        let Some(graphs) = graphs else {
            // Silence: keep the stash so state survives a play/pause gap
            return;
        };
        for (chan, signal) in graphs.iter().enumerate() {
            match self.compile(chan, signal) {
                Ok(program) => self.programs[chan] = Some(program),
                Err(e) => {
                    log::error!("Audio graph compile failed, rendering silence: {e}");
                    self.programs = [None, None];
                    break;
                }
            }
        }
        // The stash only carries state across the rebuild happening right
        // now; a key the new programs did not reclaim is retired for good.
        // Without this, every retired delay key would pin its line forever.
        self.stash.clear();
    }

    /// Store an impulse table in the named sample bank
    pub fn register_sample(&mut self, name: String, data: Vec<f32>) {
        log::info!("Registered sample '{name}' ({} frames)", data.len());
        self.samples.insert(name, data);
    }

    pub fn sample(&self, name: &str) -> Option<&[f32]> {
        self.samples.get(name).map(|v| v.as_slice())
    }

    /// Render one block; channels without a program render silence
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let sample_rate = self.sample_rate;
        let Self { programs, rng, .. } = self;
        for (chan, out) in [left, right].into_iter().enumerate() {
            match programs[chan].as_mut() {
                Some(program) => {
                    for sample in out.iter_mut() {
                        *sample = program.tick(rng, sample_rate);
                    }
                }
                None => out.fill(0.0),
            }
        }
    }

    fn harvest(&mut self, chan: usize, program: Program) {
        for node in program.nodes {
            match node {
                CompiledNode::Const { key, state } => {
                    self.stash.insert(state_key(chan, "const", &key), NodeState::Const(state));
                }
                CompiledNode::Smooth { key, y, .. } => {
                    self.stash.insert(state_key(chan, "smooth", &key), NodeState::Smooth(y));
                }
                CompiledNode::Delay { key, state, .. } => {
                    self.stash.insert(state_key(chan, "delay", &key), NodeState::Delay(state));
                }
                CompiledNode::Lowpass { key, state, .. } => {
                    self.stash.insert(state_key(chan, "lpf", &key), NodeState::Lowpass(state));
                }
                CompiledNode::Pink { key, state } => {
                    self.stash.insert(state_key(chan, "pink", &key), NodeState::Pink(state));
                }
                CompiledNode::White | CompiledNode::Mul { .. } => {}
            }
        }
    }

    fn compile(&mut self, chan: usize, signal: &Signal) -> anyhow::Result<Program> {
        let mut nodes = Vec::new();
        let mut anon = AnonKeys::default();
        let root = self.compile_node(chan, signal, &mut nodes, &mut anon)?;
        let values = vec![0.0; nodes.len()];
        Ok(Program {
            nodes,
            values,
            root,
        })
    }

    /// Flatten post-order so every input index precedes its consumer.
    ///
    /// Unkeyed stateful nodes take their state key from the nearest keyed
    /// constant beneath them when one exists, and a per-kind counter
    /// otherwise. Keyed delay taps consume neither, so a change in tap
    /// count cannot shift the key of any node above the chain; the pan and
    /// cutoff smoothers keep their state while the text grows and shrinks.
    fn compile_node(
        &mut self,
        chan: usize,
        signal: &Signal,
        nodes: &mut Vec<CompiledNode>,
        anon: &mut AnonKeys,
    ) -> anyhow::Result<usize> {
        let node = match signal {
            Signal::WhiteNoise => CompiledNode::White,
            Signal::PinkNoise => {
                let key = bump(&mut anon.pink);
                let state = match self.stash.remove(&state_key(chan, "pink", &key)) {
                    Some(NodeState::Pink(s)) => s,
                    _ => PinkState::default(),
                };
                CompiledNode::Pink { key, state }
            }
            Signal::Const { key, value } => {
                let state = match self.stash.remove(&state_key(chan, "const", key)) {
                    Some(NodeState::Const(mut ramp)) => {
                        ramp.retarget(*value);
                        ramp
                    }
                    _ => ConstRamp::starting_at(*value),
                };
                CompiledNode::Const {
                    key: key.clone(),
                    state,
                }
            }
            Signal::Smooth { tau_s, input } => {
                let key = match leaf_key(input) {
                    Some(leaf) => leaf.to_string(),
                    None => bump(&mut anon.smooth),
                };
                let input = self.compile_node(chan, input, nodes, anon)?;
                let y = match self.stash.remove(&state_key(chan, "smooth", &key)) {
                    Some(NodeState::Smooth(y)) => y,
                    _ => 0.0,
                };
                CompiledNode::Smooth {
                    key,
                    pole: math::tau2pole(*tau_s, self.sample_rate),
                    y,
                    input,
                }
            }
            Signal::Delay {
                key,
                size,
                time_ms,
                feedback,
                input,
            } => {
                anyhow::ensure!(*size > 1, "Delay line size must exceed 1, got {size}");
                anyhow::ensure!(
                    (0.0..1.0).contains(feedback),
                    "Delay feedback must be in [0, 1), got {feedback}"
                );
                let time_ms = self.compile_node(chan, time_ms, nodes, anon)?;
                let input = self.compile_node(chan, input, nodes, anon)?;
                let state = match self.stash.remove(&state_key(chan, "delay", key)) {
                    Some(NodeState::Delay(line)) if line.buffer.len() == *size => line,
                    _ => DelayLine::new(*size),
                };
                CompiledNode::Delay {
                    key: key.clone(),
                    state,
                    feedback: *feedback,
                    time_ms,
                    input,
                }
            }
            Signal::Lowpass { cutoff, q, input } => {
                let key = match leaf_key(cutoff) {
                    Some(leaf) => leaf.to_string(),
                    None => bump(&mut anon.lowpass),
                };
                let cutoff = self.compile_node(chan, cutoff, nodes, anon)?;
                let input = self.compile_node(chan, input, nodes, anon)?;
                let state = match self.stash.remove(&state_key(chan, "lpf", &key)) {
                    Some(NodeState::Lowpass(b)) => b,
                    _ => Biquad::default(),
                };
                CompiledNode::Lowpass {
                    key,
                    state,
                    q: *q,
                    cutoff,
                    input,
                }
            }
            Signal::Mul(children) => {
                anyhow::ensure!(!children.is_empty(), "Mul node requires at least one input");
                let mut inputs = Vec::with_capacity(children.len());
                for child in children {
                    inputs.push(self.compile_node(chan, child, nodes, anon)?);
                }
                CompiledNode::Mul { inputs }
            }
        };
        nodes.push(node);
        Ok(nodes.len() - 1)
    }
}

fn state_key(chan: usize, kind: &str, key: &str) -> String {
    format!("{chan}:{kind}:{key}")
}

/// Per-kind counters for stateful nodes with no derivable key
#[derive(Default)]
struct AnonKeys {
    smooth: u32,
    lowpass: u32,
    pink: u32,
}

fn bump(counter: &mut u32) -> String {
    *counter += 1;
    format!("#{counter}")
}

/// Nearest keyed constant under a control input; the node consuming the
/// input borrows it as a stable state key
fn leaf_key(signal: &Signal) -> Option<&str> {
    match signal {
        Signal::Const { key, .. } => Some(key),
        Signal::Smooth { input, .. } => leaf_key(input),
        _ => None,
    }
}

impl Program {
    fn tick(&mut self, rng: &mut SmallRng, sample_rate: f32) -> f32 {
        for idx in 0..self.nodes.len() {
            let value = match &mut self.nodes[idx] {
                CompiledNode::White => rng.gen::<f32>() * 2.0 - 1.0,
                CompiledNode::Pink { state, .. } => state.process(rng.gen::<f32>() * 2.0 - 1.0),
                CompiledNode::Const { state, .. } => state.tick(),
                CompiledNode::Smooth { pole, y, input, .. } => {
                    let x = self.values[*input];
                    *y = *pole * *y + (1.0 - *pole) * x;
                    *y
                }
                CompiledNode::Delay {
                    state,
                    feedback,
                    time_ms,
                    input,
                    ..
                } => {
                    let delay = math::ms2samps(self.values[*time_ms], sample_rate);
                    state.process(self.values[*input], delay, *feedback)
                }
                CompiledNode::Lowpass {
                    state,
                    q,
                    cutoff,
                    input,
                    ..
                } => state.process(self.values[*input], self.values[*cutoff], *q, sample_rate),
                CompiledNode::Mul { inputs } => {
                    inputs.iter().map(|i| self.values[*i]).product()
                }
            };
            self.values[idx] = value;
        }
        self.values[self.root]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_const(key: &str, value: f32) -> Signal {
        Signal::Const {
            key: key.to_string(),
            value,
        }
    }

    fn render(engine: &mut GraphEngine, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        engine.render_block(&mut left, &mut right);
        (left, right)
    }

    #[test]
    fn test_no_program_renders_silence() {
        let mut engine = GraphEngine::new(44_100.0);
        let (left, right) = render(&mut engine, 64);
        assert!(left.iter().all(|s| *s == 0.0));
        assert!(right.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_const_outputs_value_immediately_on_first_appearance() {
        let mut engine = GraphEngine::new(44_100.0);
        engine.set_graph(Some([keyed_const("volume", 0.7), keyed_const("volume", 0.7)]));
        let (left, _) = render(&mut engine, 16);
        assert!(left.iter().all(|s| (*s - 0.7).abs() < 1e-6));
    }

    #[test]
    fn test_keyed_const_ramps_instead_of_stepping() {
        let mut engine = GraphEngine::new(44_100.0);
        engine.set_graph(Some([keyed_const("freq", 1.0), keyed_const("freq", 1.0)]));
        render(&mut engine, 8);

        engine.set_graph(Some([keyed_const("freq", 2.0), keyed_const("freq", 2.0)]));
        let (left, _) = render(&mut engine, CONST_RAMP_SAMPLES + 32);

        // Never a discontinuous jump: consecutive samples move by no more
        // than the configured ramp delta
        let max_step = 1.0 / CONST_RAMP_SAMPLES as f32 + 1e-5;
        assert!((left[0] - 1.0).abs() < max_step, "first sample {}", left[0]);
        for pair in left.windows(2) {
            assert!((pair[1] - pair[0]).abs() <= max_step);
        }
        // And it does arrive at the target
        assert!((left.last().unwrap() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_unkeyed_rebuild_with_same_key_does_not_ramp_same_value() {
        let mut engine = GraphEngine::new(44_100.0);
        engine.set_graph(Some([keyed_const("volume", 0.5), keyed_const("volume", 0.5)]));
        render(&mut engine, 8);
        // Rebuild with the same value: output stays flat
        engine.set_graph(Some([keyed_const("volume", 0.5), keyed_const("volume", 0.5)]));
        let (left, _) = render(&mut engine, 8);
        assert!(left.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_delay_line_delays_by_requested_samples() {
        let mut line = DelayLine::new(64);
        // Impulse in, expect it back exactly 10 samples later
        let mut outputs = Vec::new();
        for n in 0..20 {
            let x = if n == 0 { 1.0 } else { 0.0 };
            outputs.push(line.process(x, 10.0, 0.0));
        }
        for (n, out) in outputs.iter().enumerate() {
            if n == 10 {
                assert!((out - 1.0).abs() < 1e-6);
            } else {
                assert!(out.abs() < 1e-6, "unexpected output at {n}: {out}");
            }
        }
    }

    #[test]
    fn test_delay_feedback_produces_echoes() {
        let mut line = DelayLine::new(64);
        let mut outputs = Vec::new();
        for n in 0..35 {
            let x = if n == 0 { 1.0 } else { 0.0 };
            outputs.push(line.process(x, 10.0, 0.5));
        }
        assert!((outputs[10] - 1.0).abs() < 1e-6);
        assert!((outputs[20] - 0.5).abs() < 1e-6);
        assert!((outputs[30] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_delay_state_survives_rebuild_with_same_key() {
        let mut engine = GraphEngine::new(44_100.0);
        let tap = |value: f32| Signal::Delay {
            key: "delay-1".to_string(),
            size: 4410,
            time_ms: Box::new(keyed_const("delay-1", 50.0)),
            feedback: 0.0,
            input: Box::new(keyed_const("drive", value)),
        };
        engine.set_graph(Some([tap(1.0), tap(1.0)]));
        render(&mut engine, 512);

        // Rebuild: the line's contents from the first program must still
        // come out the far end
        engine.set_graph(Some([tap(0.0), tap(0.0)]));
        // Stop short of the point where the second program's own writes
        // would start emerging, so only carried-over state can be heard
        let frames = math::ms2samps(50.0, 44_100.0) as usize - 64;
        let (left, _) = render(&mut engine, frames);
        assert!(
            left.iter().any(|s| s.abs() > 0.25),
            "delay line state was dropped on rebuild"
        );
    }

    #[test]
    fn test_pan_smoother_survives_tap_count_change() {
        let mut engine = GraphEngine::new(44_100.0);
        // Smoother over a keyed constant, multiplied by a tap chain whose
        // length tracks the text, like the stereo builder's pan branch
        let graph = |taps: usize| {
            let mut chain = keyed_const("drive", 1.0);
            for i in 0..taps {
                chain = Signal::Delay {
                    key: format!("delay-{i}"),
                    size: 64,
                    time_ms: Box::new(keyed_const(&format!("delay-{i}"), 0.1)),
                    feedback: 0.0,
                    input: Box::new(chain),
                };
            }
            Signal::Mul(vec![
                chain,
                Signal::Smooth {
                    tau_s: 0.05,
                    input: Box::new(keyed_const("pan", 0.8)),
                },
            ])
        };

        engine.set_graph(Some([graph(0), graph(0)]));
        render(&mut engine, 16_384); // settle the smoother

        // Growing the tap chain must not reset the smoother: its state key
        // derives from the constant it smooths, not its position in the tree
        engine.set_graph(Some([graph(3), graph(3)]));
        let (left, _) = render(&mut engine, 64);
        // Past the fresh lines' fill time the product is the smoother alone
        assert!(
            (left[32] - 0.8).abs() < 0.05,
            "pan smoother state lost on tap-count change: {}",
            left[32]
        );
    }

    #[test]
    fn test_stash_does_not_accumulate_retired_keys() {
        let mut engine = GraphEngine::new(44_100.0);
        // Scrolling text: the absolute-index delay key advances every
        // rebuild, retiring the previous one each time
        for start in 0..40 {
            let tap = |i: usize| Signal::Delay {
                key: format!("delay-{i}"),
                size: 64,
                time_ms: Box::new(keyed_const(&format!("delay-{i}"), 1.0)),
                feedback: 0.1,
                input: Box::new(Signal::PinkNoise),
            };
            engine.set_graph(Some([tap(start), tap(start)]));
            render(&mut engine, 8);
        }
        assert!(
            engine.stash.is_empty(),
            "retired keys left in the stash: {}",
            engine.stash.len()
        );
    }

    #[test]
    fn test_smoother_converges_exponentially() {
        let mut engine = GraphEngine::new(1000.0);
        let smoothed = || Signal::Smooth {
            tau_s: 0.01,
            input: Box::new(keyed_const("x", 1.0)),
        };
        engine.set_graph(Some([smoothed(), smoothed()]));
        let (left, _) = render(&mut engine, 200);
        // Monotone rise toward 1.0, no overshoot
        for pair in left.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-6);
        }
        assert!(left[199] > 0.99 && left[199] <= 1.0 + 1e-6);
    }

    #[test]
    fn test_lowpass_attenuates_high_frequencies() {
        let sr = 44_100.0;
        let mut biquad = Biquad::default();
        // 100 Hz cutoff vs a ~10 kHz square-ish input: output power drops
        let mut in_power = 0.0;
        let mut out_power = 0.0;
        for n in 0..4096 {
            let x = if (n / 2) % 2 == 0 { 1.0 } else { -1.0 };
            let y = biquad.process(x, 100.0, 0.7, sr);
            in_power += x * x;
            out_power += y * y;
        }
        assert!(out_power < in_power * 0.05);
    }

    #[test]
    fn test_lowpass_tracks_q_changes_alone() {
        let mut biquad = Biquad::default();
        biquad.process(1.0, 1000.0, 0.7, 44_100.0);
        let before = (biquad.b0, biquad.a1);
        biquad.process(1.0, 1000.0, 5.0, 44_100.0);
        assert!(
            (biquad.b0 - before.0).abs() > 1e-9 || (biquad.a1 - before.1).abs() > 1e-9,
            "coefficients ignored a Q change at fixed cutoff"
        );
    }

    #[test]
    fn test_invalid_graph_falls_back_to_silence() {
        let mut engine = GraphEngine::new(44_100.0);
        let broken = || Signal::Delay {
            key: "delay-1".to_string(),
            size: 0,
            time_ms: Box::new(keyed_const("delay-1", 10.0)),
            feedback: 0.1,
            input: Box::new(Signal::PinkNoise),
        };
        engine.set_graph(Some([broken(), broken()]));
        let (left, right) = render(&mut engine, 64);
        assert!(left.iter().all(|s| *s == 0.0));
        assert!(right.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_sample_bank_roundtrip() {
        let mut engine = GraphEngine::new(44_100.0);
        engine.register_sample("convolution-1".to_string(), vec![0.5, -0.5]);
        assert_eq!(engine.sample("convolution-1"), Some(&[0.5, -0.5][..]));
        assert!(engine.sample("convolution-2").is_none());
    }

    #[test]
    fn test_mul_multiplies_inputs() {
        let mut engine = GraphEngine::new(44_100.0);
        let product = || {
            Signal::Mul(vec![
                keyed_const("a", 0.5),
                keyed_const("b", 0.5),
                keyed_const("c", 2.0),
            ])
        };
        engine.set_graph(Some([product(), product()]));
        let (left, _) = render(&mut engine, 4);
        assert!(left.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }
}
