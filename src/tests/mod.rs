mod event_channel;
mod parameter_tracking;

use crate::midi::MidiEvent;
use crate::params::{ParameterHints, ParameterInfo};
use crate::plugin::{PluginCore, RunContext};

/// Parameter-only core: stores values and records the writes it receives.
pub(crate) struct ValueCore {
    pub info: Vec<ParameterInfo>,
    pub values: Vec<f32>,
    pub writes: Vec<(u32, f32)>,
    pub programs: Vec<Vec<f32>>,
    pub loaded: Vec<u32>,
}

impl ValueCore {
    pub fn new(info: Vec<ParameterInfo>) -> Self {
        let values = info.iter().map(|p| p.ranges.def).collect();
        Self {
            info,
            values,
            writes: Vec::new(),
            programs: Vec::new(),
            loaded: Vec::new(),
        }
    }

    pub fn with_programs(mut self, programs: Vec<Vec<f32>>) -> Self {
        self.programs = programs;
        self
    }
}

impl PluginCore for ValueCore {
    fn name(&self) -> &str {
        "value core"
    }

    fn parameters(&self) -> &[ParameterInfo] {
        &self.info
    }

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    fn run(
        &mut self,
        _inputs: &[&[f32]],
        _outputs: &mut [&mut [f32]],
        _frames: u32,
        _midi: &[MidiEvent<'_>],
        _context: &mut RunContext<'_>,
    ) {
    }

    fn set_buffer_size(&mut self, _frames: u32) {}

    fn set_sample_rate(&mut self, _sample_rate: f64) {}

    fn parameter_value(&self, index: u32) -> f32 {
        self.values[index as usize]
    }

    fn set_parameter_value(&mut self, index: u32, value: f32) {
        self.writes.push((index, value));
        self.values[index as usize] = value;
    }

    fn program_count(&self) -> u32 {
        self.programs.len() as u32
    }

    fn load_program(&mut self, index: u32) {
        self.loaded.push(index);
        self.values.clone_from(&self.programs[index as usize]);
    }
}

/// Depth (CC 1, 0..10), mode (CC 1, integer), fire (trigger), meter (output).
pub(crate) fn sample_parameters() -> Vec<ParameterInfo> {
    vec![
        ParameterInfo::new("Depth", "depth")
            .with_ranges(0.0, 10.0, 0.0)
            .with_midi_cc(1),
        ParameterInfo::new("Mode", "mode")
            .with_hints(ParameterHints::AUTOMATABLE.union(ParameterHints::INTEGER))
            .with_ranges(0.0, 3.0, 0.0)
            .with_midi_cc(1),
        ParameterInfo::new("Fire", "fire").with_hints(ParameterHints::TRIGGER),
        ParameterInfo::new("Meter", "meter")
            .with_hints(ParameterHints::OUTPUT)
            .with_midi_cc(2),
    ]
}
