#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use plugin_bridge::bridge::UiHost;
use plugin_bridge::control::PluginUi;
use plugin_bridge::host::{HostCallbacks, MidiPortBuffer, ProcessContext};
use plugin_bridge::midi::MidiEvent;
use plugin_bridge::params::{ParameterHints, ParameterInfo};
use plugin_bridge::transport::{HostPosition, PositionFlags, TimePosition};
use plugin_bridge::{Bridge, BridgeConfig, BridgeError, BridgeUi, PluginCore, RunContext};

pub const DEPTH: u32 = 0;
pub const MODE: u32 = 1;
pub const FIRE: u32 = 2;
pub const METER: u32 = 3;
pub const FRAMES: u32 = 64;

/// One `run` call as the core saw it.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub frames: u32,
    pub midi: Vec<(u32, Vec<u8>)>,
    pub values: Vec<f32>,
    pub position: Option<TimePosition>,
}

/// Core that records every call the bridge makes.
pub struct RecordingCore {
    info: Vec<ParameterInfo>,
    pub values: Vec<f32>,
    pub calls: Vec<String>,
    pub runs: Vec<RunRecord>,
    pub states: Vec<(String, String)>,
    pub requests_per_run: Vec<(u32, f32)>,
    pub thru: bool,
    pub position: Option<TimePosition>,
    pub deactivations: Arc<AtomicU32>,
}

impl RecordingCore {
    pub fn new() -> Self {
        let info = vec![
            ParameterInfo::new("Depth", "depth")
                .with_ranges(0.0, 10.0, 0.0)
                .with_midi_cc(1),
            ParameterInfo::new("Mode", "mode")
                .with_hints(ParameterHints::AUTOMATABLE.union(ParameterHints::INTEGER))
                .with_ranges(0.0, 3.0, 0.0)
                .with_midi_cc(1),
            ParameterInfo::new("Fire", "fire").with_hints(ParameterHints::TRIGGER),
            ParameterInfo::new("Meter", "meter").with_hints(ParameterHints::OUTPUT),
        ];
        let values = info.iter().map(|p| p.ranges.def).collect();
        Self {
            info,
            values,
            calls: Vec::new(),
            runs: Vec::new(),
            states: Vec::new(),
            requests_per_run: Vec::new(),
            thru: false,
            position: None,
            deactivations: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn deactivation_count(&self) -> u32 {
        self.deactivations.load(Ordering::SeqCst)
    }
}

impl PluginCore for RecordingCore {
    fn name(&self) -> &str {
        "recorder"
    }

    fn parameters(&self) -> &[ParameterInfo] {
        &self.info
    }

    fn activate(&mut self) {
        self.calls.push("activate".into());
    }

    fn deactivate(&mut self) {
        self.calls.push("deactivate".into());
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }

    fn run(
        &mut self,
        _inputs: &[&[f32]],
        outputs: &mut [&mut [f32]],
        frames: u32,
        midi: &[MidiEvent<'_>],
        context: &mut RunContext<'_>,
    ) {
        self.calls.push("run".into());
        for output in outputs.iter_mut() {
            output.fill(0.25);
        }
        if self.thru {
            for event in midi {
                context.write_midi(event);
            }
        }
        for &(index, value) in &self.requests_per_run {
            context.request_parameter_change(index, value);
        }
        self.values[METER as usize] = midi.len() as f32;
        self.runs.push(RunRecord {
            frames,
            midi: midi.iter().map(|e| (e.frame, e.bytes().to_vec())).collect(),
            values: self.values.clone(),
            position: self.position,
        });
    }

    fn set_buffer_size(&mut self, frames: u32) {
        self.calls.push(format!("buffer_size {frames}"));
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.calls.push(format!("sample_rate {sample_rate}"));
    }

    fn set_time_position(&mut self, position: &TimePosition) {
        self.position = Some(*position);
    }

    fn parameter_value(&self, index: u32) -> f32 {
        self.values[index as usize]
    }

    fn set_parameter_value(&mut self, index: u32, value: f32) {
        self.calls.push(format!("set {index} {value}"));
        self.values[index as usize] = value;
    }

    fn program_count(&self) -> u32 {
        2
    }

    fn program_name(&self, index: u32) -> Option<&str> {
        ["First", "Second"].get(index as usize).copied()
    }

    fn load_program(&mut self, index: u32) {
        self.calls.push(format!("program {index}"));
        self.values[DEPTH as usize] = if index == 0 { 1.0 } else { 7.0 };
        self.values[MODE as usize] = index as f32;
    }

    fn set_state(&mut self, key: &str, value: &str) {
        self.states.push((key.to_string(), value.to_string()));
    }
}

/// UI that records what the bridge tells it.
#[derive(Default)]
pub struct RecordingUi {
    pub changes: Vec<(u32, f32)>,
    pub programs: Vec<u32>,
    pub title: String,
    pub ticks: u32,
    pub quit_called: bool,
    pub stop_after: Option<u32>,
}

impl RecordingUi {
    pub fn saw(&self, index: u32, value: f32) -> bool {
        self.changes
            .iter()
            .any(|&(i, v)| i == index && (v - value).abs() < 1e-6)
    }

    pub fn take(&mut self) -> Vec<(u32, f32)> {
        std::mem::take(&mut self.changes)
    }
}

impl PluginUi for RecordingUi {
    fn parameter_changed(&mut self, index: u32, value: f32) {
        self.changes.push((index, value));
    }

    fn program_loaded(&mut self, index: u32) {
        self.programs.push(index);
    }

    fn set_window_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn exec_idle(&mut self, _host: &mut UiHost) -> Result<(), BridgeError> {
        self.ticks += 1;
        if self.stop_after.is_some_and(|limit| self.ticks >= limit) {
            self.quit_called = true;
        }
        Ok(())
    }

    fn quit(&mut self) {
        self.quit_called = true;
    }

    fn is_running(&self) -> bool {
        !self.quit_called
    }
}

pub fn running_bridge(
    core: RecordingCore,
    config: &BridgeConfig,
) -> (Bridge<RecordingCore>, BridgeUi) {
    let (mut bridge, ui) = Bridge::new(core, config).expect("bridge");
    bridge.activate(48_000.0, FRAMES).expect("activate");
    (bridge, ui)
}

pub fn position(sequence: u64) -> HostPosition {
    HostPosition {
        unique_1: sequence,
        unique_2: sequence,
        rolling: true,
        frame: sequence * u64::from(FRAMES),
        valid: PositionFlags::BBT,
        bar: 1,
        beat: 1,
        tick: 0,
        tick_double: 0.0,
        bar_start_tick: 0.0,
        beats_per_bar: 4.0,
        beat_type: 4.0,
        ticks_per_beat: 1920.0,
        beats_per_minute: 120.0,
    }
}

pub fn host_midi(events: &[(u32, &[u8])]) -> MidiPortBuffer {
    let mut buffer = MidiPortBuffer::with_capacity(1024, 8192);
    for (time, bytes) in events {
        assert!(buffer.push(*time, bytes));
    }
    buffer
}

/// Run one cycle with stereo outputs prefilled with `1.0`; returns the outputs.
pub fn cycle_with<C: HostCallbacks>(
    callbacks: &mut C,
    midi_in: &MidiPortBuffer,
    midi_out: &mut MidiPortBuffer,
    position: HostPosition,
) -> [Vec<f32>; 2] {
    let mut left = vec![1.0f32; FRAMES as usize];
    let mut right = vec![1.0f32; FRAMES as usize];
    {
        let mut outputs: [&mut [f32]; 2] = [left.as_mut_slice(), right.as_mut_slice()];
        callbacks.process(ProcessContext {
            frames: FRAMES,
            inputs: &[],
            outputs: &mut outputs,
            midi_in,
            midi_out: Some(midi_out),
            position,
        });
    }
    [left, right]
}

pub fn cycle<C: HostCallbacks>(callbacks: &mut C, midi_in: &MidiPortBuffer) -> [Vec<f32>; 2] {
    let mut midi_out = MidiPortBuffer::with_capacity(1024, 8192);
    cycle_with(callbacks, midi_in, &mut midi_out, position(1))
}
