//! Small polyphonic sine synth used by `bridgectl` to exercise the bridge end to end.
use dasp_frame::{Frame, Stereo};
use dasp_signal::{ConstHz, Signal, Sine};

use crate::midi::{MidiEvent, NOTE_OFF, NOTE_ON};
use crate::params::{ParameterHints, ParameterInfo};
use crate::plugin::{PluginCore, RunContext};

/// Simultaneous voices.
pub const MAX_VOICES: usize = 16;

/// Output gain, CC 7.
pub const PARAM_GAIN: u32 = 0;
/// Transpose in semitones, CC 14.
pub const PARAM_TRANSPOSE: u32 = 1;
/// Release time in milliseconds, CC 72.
pub const PARAM_RELEASE: u32 = 2;
/// Silence every voice, CC 120.
pub const PARAM_PANIC: u32 = 3;
/// Peak output level of the last cycle.
pub const PARAM_LEVEL: u32 = 4;
/// Voices sounding after the last cycle.
pub const PARAM_VOICES: u32 = 5;

const PARAMETERS: [ParameterInfo; 6] = [
    ParameterInfo::new("Gain", "gain")
        .with_ranges(0.0, 1.0, 0.5)
        .with_midi_cc(7),
    ParameterInfo::new("Transpose", "transpose")
        .with_hints(ParameterHints::AUTOMATABLE.union(ParameterHints::INTEGER))
        .with_ranges(-24.0, 24.0, 0.0)
        .with_unit("st")
        .with_midi_cc(14),
    ParameterInfo::new("Release", "release")
        .with_hints(ParameterHints::AUTOMATABLE.union(ParameterHints::LOGARITHMIC))
        .with_ranges(5.0, 2000.0, 200.0)
        .with_unit("ms")
        .with_midi_cc(72),
    ParameterInfo::new("Panic", "panic")
        .with_hints(ParameterHints::TRIGGER)
        .with_midi_cc(120),
    ParameterInfo::new("Level", "level").with_hints(ParameterHints::OUTPUT),
    ParameterInfo::new("Voices", "voices")
        .with_hints(ParameterHints::OUTPUT.union(ParameterHints::INTEGER))
        .with_ranges(0.0, MAX_VOICES as f32, 0.0),
];

struct Program {
    name: &'static str,
    gain: f32,
    transpose: f32,
    release: f32,
}

const PROGRAMS: [Program; 3] = [
    Program {
        name: "Init",
        gain: 0.5,
        transpose: 0.0,
        release: 200.0,
    },
    Program {
        name: "Pad",
        gain: 0.4,
        transpose: 0.0,
        release: 1500.0,
    },
    Program {
        name: "Pluck",
        gain: 0.7,
        transpose: 12.0,
        release: 40.0,
    },
];

const SILENCE: f32 = 1.0e-4;

#[derive(Default)]
struct Voice {
    note: u8,
    signal: Option<Sine<ConstHz>>,
    velocity: f32,
    envelope: f32,
    releasing: bool,
}

impl Voice {
    fn is_active(&self) -> bool {
        self.signal.is_some()
    }
}

/// Sine synth with MIDI thru of the notes it plays.
pub struct ToneGenerator {
    values: [f32; PARAMETERS.len()],
    voices: [Voice; MAX_VOICES],
    sample_rate: f64,
    a4: f32,
    panic_pending: bool,
}

impl Default for ToneGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneGenerator {
    /// Synth with every parameter at its default.
    pub fn new() -> Self {
        let mut values = [0.0; PARAMETERS.len()];
        for (value, info) in values.iter_mut().zip(PARAMETERS.iter()) {
            *value = info.ranges.def;
        }
        Self {
            values,
            voices: Default::default(),
            sample_rate: 48_000.0,
            a4: 440.0,
            panic_pending: false,
        }
    }

    /// Voices currently sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    fn frequency(&self, note: u8) -> f64 {
        let note = f32::from(note) + self.values[PARAM_TRANSPOSE as usize];
        f64::from(self.a4) * 2f64.powf(f64::from(note - 69.0) / 12.0)
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        let slot = self
            .voices
            .iter()
            .position(|v| !v.is_active())
            .or_else(|| self.voices.iter().position(|v| v.releasing))
            .unwrap_or(0);
        let signal = dasp_signal::rate(self.sample_rate)
            .const_hz(self.frequency(note))
            .sine();
        self.voices[slot] = Voice {
            note,
            signal: Some(signal),
            velocity: f32::from(velocity) / 127.0,
            envelope: 1.0,
            releasing: false,
        };
    }

    fn note_off(&mut self, note: u8) {
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.note == note {
                voice.releasing = true;
            }
        }
    }

    fn release_coefficient(&self) -> f32 {
        let seconds = f64::from(self.values[PARAM_RELEASE as usize]) / 1000.0;
        (-6.9 / (seconds * self.sample_rate)).exp() as f32
    }

    fn handle_event(&mut self, event: &MidiEvent<'_>, context: &mut RunContext<'_>) {
        let [status, note, velocity] = match event.bytes() {
            [status, note, velocity] => [*status, *note, *velocity],
            _ => return,
        };
        match status & 0xF0 {
            NOTE_ON if velocity > 0 => self.note_on(note, velocity),
            NOTE_ON | NOTE_OFF => self.note_off(note),
            _ => return,
        }
        context.write_midi(event);
    }
}

impl PluginCore for ToneGenerator {
    fn name(&self) -> &str {
        "Tone Generator"
    }

    fn parameters(&self) -> &[ParameterInfo] {
        &PARAMETERS
    }

    fn activate(&mut self) {
        self.voices = Default::default();
    }

    fn deactivate(&mut self) {
        self.voices = Default::default();
    }

    fn run(
        &mut self,
        _inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: u32,
        midi: &[MidiEvent<'_>],
        context: &mut RunContext<'_>,
    ) {
        if std::mem::take(&mut self.panic_pending) {
            self.voices = Default::default();
        }
        for event in midi {
            self.handle_event(event, context);
        }

        let gain = self.values[PARAM_GAIN as usize];
        let coefficient = self.release_coefficient();
        let mut peak = 0.0f32;

        for index in 0..frames as usize {
            let mut mix = Stereo::<f32>::EQUILIBRIUM;
            for voice in self.voices.iter_mut() {
                let Some(signal) = voice.signal.as_mut() else {
                    continue;
                };
                let sample = signal.next() as f32 * voice.velocity * voice.envelope;
                mix = mix.add_amp([sample, sample]);
                if voice.releasing {
                    voice.envelope *= coefficient;
                    if voice.envelope < SILENCE {
                        *voice = Voice::default();
                    }
                }
            }
            let frame: Stereo<f32> = mix.map(|sample| sample * gain);
            for (channel, output) in outputs.iter_mut().enumerate() {
                if let Some(slot) = output.get_mut(index) {
                    *slot = frame[channel % 2];
                }
            }
            peak = peak.max(frame[0].abs()).max(frame[1].abs());
        }

        self.values[PARAM_LEVEL as usize] = peak.min(1.0);
        self.values[PARAM_VOICES as usize] = self.active_voices() as f32;
    }

    fn set_buffer_size(&mut self, _frames: u32) {}

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn parameter_value(&self, index: u32) -> f32 {
        self.values.get(index as usize).copied().unwrap_or_default()
    }

    fn set_parameter_value(&mut self, index: u32, value: f32) {
        let Some(info) = PARAMETERS.get(index as usize) else {
            return;
        };
        let mut value = info.ranges.fix_value(value);
        if info.hints.contains(ParameterHints::INTEGER) {
            value = value.round();
        }
        if index == PARAM_PANIC && value > 0.5 {
            self.panic_pending = true;
        }
        self.values[index as usize] = value;
    }

    fn program_count(&self) -> u32 {
        PROGRAMS.len() as u32
    }

    fn program_name(&self, index: u32) -> Option<&str> {
        PROGRAMS.get(index as usize).map(|program| program.name)
    }

    fn load_program(&mut self, index: u32) {
        let Some(program) = PROGRAMS.get(index as usize) else {
            return;
        };
        self.values[PARAM_GAIN as usize] = program.gain;
        self.values[PARAM_TRANSPOSE as usize] = program.transpose;
        self.values[PARAM_RELEASE as usize] = program.release;
    }

    fn set_state(&mut self, key: &str, value: &str) {
        if key != "a4" {
            return;
        }
        if let Ok(hz) = value.trim().parse::<f32>() {
            self.a4 = hz.clamp(400.0, 480.0);
        }
    }

    fn state(&self, key: &str) -> Option<String> {
        (key == "a4").then(|| format!("{:.1}", self.a4))
    }
}
