//! Per-cycle merge of UI notes and host MIDI into one bounded event list.
use crate::midi::{
    CONTROL_CHANGE, MidiEvent, MidiEventList, MidiInputPort, PROGRAM_CHANGE,
};
use crate::params::{ParameterStore, apply_parameter};
use crate::plugin::PluginCore;
use crate::ring::EventConsumer;

/// Size of one UI note record in the event channel.
pub const NOTE_RECORD_SIZE: usize = 3;

/// What [`MidiMultiplexer::gather`] did during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatherOutcome {
    /// Notes taken from the UI channel.
    pub from_ui: u32,
    /// Host events appended to the list.
    pub from_host: u32,
    /// Control and program changes turned into parameter writes or program loads.
    pub intercepted: u32,
    /// Host events left out because the list was full.
    pub dropped: u32,
    /// The host failed to deliver an event and the scan stopped early.
    pub fetch_failed: bool,
    /// Program loaded from a program-change message, if any.
    pub program: Option<u32>,
}

/// Builds the event list handed to the DSP core.
///
/// UI notes always come first at frame 0, host events follow in host order. Control changes on
/// channel 1 bound to a parameter and program changes on channel 1 are applied to the core
/// directly instead of being forwarded.
pub struct MidiMultiplexer {
    notes: Option<EventConsumer>,
    cc_map: [Option<u32>; 128],
    program_count: u32,
    forward_intercepted: bool,
}

impl MidiMultiplexer {
    /// Multiplexer reading UI notes from `notes`, when the UI has a channel.
    pub fn new(notes: Option<EventConsumer>, forward_intercepted: bool) -> Self {
        Self {
            notes,
            cc_map: [None; 128],
            program_count: 0,
            forward_intercepted,
        }
    }

    /// Rebuild the CC bindings and program bound for the current parameter set.
    ///
    /// When two input parameters claim the same CC the lower index wins. Declarations outside
    /// the 7-bit controller range bind nothing.
    pub fn prepare(&mut self, store: &ParameterStore, program_count: u32) {
        self.cc_map = [None; 128];
        for (index, info) in store.infos().iter().enumerate() {
            if info.is_output() {
                continue;
            }
            let Some(slot) = info
                .midi_cc
                .and_then(|cc| self.cc_map.get_mut(usize::from(cc)))
            else {
                continue;
            };
            if slot.is_none() {
                *slot = Some(index as u32);
            }
        }
        self.program_count = program_count;
    }

    /// Parameter bound to control change `cc`.
    pub fn parameter_for_cc(&self, cc: u8) -> Option<u32> {
        self.cc_map.get(usize::from(cc)).copied().flatten()
    }

    /// Bytes of UI notes waiting in the channel.
    pub fn pending_notes(&self) -> usize {
        self.notes.as_ref().map_or(0, EventConsumer::available_read)
    }

    /// Fill `events` for the cycle. Never allocates.
    pub fn gather<'a, P: PluginCore + ?Sized>(
        &mut self,
        input: &'a dyn MidiInputPort,
        core: &mut P,
        store: &ParameterStore,
        events: &mut MidiEventList<'a>,
    ) -> GatherOutcome {
        let mut outcome = GatherOutcome::default();

        if let Some(notes) = self.notes.as_mut() {
            let mut record = [0u8; NOTE_RECORD_SIZE];
            while !events.is_full() && notes.read_exact(&mut record) {
                events.push(MidiEvent::short(0, record[0], record[1], record[2]));
                outcome.from_ui += 1;
            }
        }

        let count = input.event_count();
        let room = events.remaining().min(count as usize) as u32;
        outcome.dropped = count - room;

        for index in 0..room {
            let raw = match input.event(index) {
                Ok(raw) => raw,
                Err(_) => {
                    outcome.fetch_failed = true;
                    break;
                }
            };
            let bytes = raw.bytes;

            if self.intercept(bytes, core, store, &mut outcome) {
                outcome.intercepted += 1;
                if !self.forward_intercepted {
                    continue;
                }
            }

            events.push(MidiEvent::from_bytes(raw.time, bytes));
            outcome.from_host += 1;
        }

        outcome
    }

    fn intercept<P: PluginCore + ?Sized>(
        &self,
        bytes: &[u8],
        core: &mut P,
        store: &ParameterStore,
        outcome: &mut GatherOutcome,
    ) -> bool {
        match bytes {
            [CONTROL_CHANGE, cc, value] => {
                let Some(index) = self.parameter_for_cc(*cc) else {
                    return false;
                };
                let Some(info) = store.info(index) else {
                    return false;
                };
                let normalized = f32::from(*value & 0x7F) / 127.0;
                let value = info.ranges.unnormalized_value(normalized);
                apply_parameter(core, store, index, value, true)
            }
            [PROGRAM_CHANGE, program] => {
                let program = u32::from(*program);
                if program >= self.program_count {
                    return false;
                }
                core.load_program(program);
                outcome.program = Some(program);
                true
            }
            _ => false,
        }
    }
}
