//! Contract between the bridge and the DSP core it drives.
use crate::midi::{MidiEvent, MidiOutputPort};
use crate::params::ParameterInfo;
use crate::transport::TimePosition;

/// Requests a core may queue from inside one `run` call.
pub const MAX_CORE_REQUESTS: usize = 32;

/// The signal-processing unit behind the bridge.
///
/// Every method is called from the audio thread once the bridge is running; lifecycle methods
/// are called from whichever thread owns the bridge at the time.
pub trait PluginCore: Send {
    /// Human-readable plugin name.
    fn name(&self) -> &str;

    /// Static parameter description in index order.
    fn parameters(&self) -> &[ParameterInfo];

    /// Prepare for processing.
    fn activate(&mut self);

    /// Stop processing and release per-activation resources.
    fn deactivate(&mut self);

    /// Process one cycle of `frames` frames.
    fn run(
        &mut self,
        inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: u32,
        midi: &[MidiEvent<'_>],
        context: &mut RunContext<'_>,
    );

    /// Maximum frames per cycle changed.
    fn set_buffer_size(&mut self, frames: u32);

    /// Sample rate changed.
    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Transport position for the cycle about to run.
    fn set_time_position(&mut self, _position: &TimePosition) {}

    /// Current value of parameter `index`.
    fn parameter_value(&self, index: u32) -> f32;

    /// Set parameter `index`.
    fn set_parameter_value(&mut self, index: u32, value: f32);

    /// Number of built-in programs.
    fn program_count(&self) -> u32 {
        0
    }

    /// Display name of program `index`.
    fn program_name(&self, _index: u32) -> Option<&str> {
        None
    }

    /// Replace all input parameter values with program `index`.
    fn load_program(&mut self, _index: u32) {}

    /// Apply a key/value state change.
    fn set_state(&mut self, _key: &str, _value: &str) {}

    /// Current value of a state key.
    fn state(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Host services available to a core while it runs.
pub struct RunContext<'a> {
    midi_out: &'a mut dyn MidiOutputPort,
    requests: [(u32, f32); MAX_CORE_REQUESTS],
    request_count: usize,
}

impl<'a> RunContext<'a> {
    /// Wrap the host's MIDI output for one cycle.
    pub fn new(midi_out: &'a mut dyn MidiOutputPort) -> Self {
        Self {
            midi_out,
            requests: [(0, 0.0); MAX_CORE_REQUESTS],
            request_count: 0,
        }
    }

    /// Emit a MIDI event to the host output.
    pub fn write_midi(&mut self, event: &MidiEvent<'_>) -> bool {
        self.midi_out.write(event.frame, event.bytes())
    }

    /// Ask the bridge to change one of the core's own parameters after `run` returns.
    ///
    /// The change is announced to the UI. Returns `false` when the request queue is full.
    pub fn request_parameter_change(&mut self, index: u32, value: f32) -> bool {
        if self.request_count == MAX_CORE_REQUESTS {
            return false;
        }
        self.requests[self.request_count] = (index, value);
        self.request_count += 1;
        true
    }

    /// Parameter changes queued during `run`.
    pub fn requests(&self) -> &[(u32, f32)] {
        &self.requests[..self.request_count]
    }
}
