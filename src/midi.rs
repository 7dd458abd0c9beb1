//! MIDI event representation shared by the host ports, the multiplexer and the DSP core.
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::bridge::BridgeShared;
use crate::ring::EventProducer;

/// Upper bound on events handed to the DSP core in one cycle.
pub const MAX_MIDI_EVENTS: usize = 512;

/// Payload bytes stored inside a [`MidiEvent`] without borrowing.
pub const MIDI_INLINE_SIZE: usize = 4;

/// Note-off status (channel in the low nibble).
pub const NOTE_OFF: u8 = 0x80;
/// Note-on status (channel in the low nibble).
pub const NOTE_ON: u8 = 0x90;
/// Control-change status (channel in the low nibble).
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Program-change status (channel in the low nibble).
pub const PROGRAM_CHANGE: u8 = 0xC0;

/// Event payload: copied inline when small, borrowed from the host buffer otherwise.
///
/// The borrowed variant cannot outlive the cycle whose input buffer it points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiData<'a> {
    /// Up to [`MIDI_INLINE_SIZE`] bytes held by value.
    Inline {
        /// Storage; only the first `len` bytes are meaningful.
        bytes: [u8; MIDI_INLINE_SIZE],
        /// Number of valid bytes.
        len: u8,
    },
    /// Larger payload owned by the host for the current cycle.
    External(&'a [u8]),
}

/// A timestamped MIDI message inside the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent<'a> {
    /// Frame offset from the start of the cycle.
    pub frame: u32,
    /// Message bytes.
    pub data: MidiData<'a>,
}

impl<'a> MidiEvent<'a> {
    /// Zero-length placeholder used to fill fixed arrays.
    pub const EMPTY: Self = Self {
        frame: 0,
        data: MidiData::Inline {
            bytes: [0; MIDI_INLINE_SIZE],
            len: 0,
        },
    };

    /// Build an event, copying `bytes` inline when they fit.
    pub fn from_bytes(frame: u32, bytes: &'a [u8]) -> Self {
        let data = if bytes.len() <= MIDI_INLINE_SIZE {
            let mut inline = [0u8; MIDI_INLINE_SIZE];
            inline[..bytes.len()].copy_from_slice(bytes);
            MidiData::Inline {
                bytes: inline,
                len: bytes.len() as u8,
            }
        } else {
            MidiData::External(bytes)
        };
        Self { frame, data }
    }

    /// Build a 3-byte channel message.
    pub fn short(frame: u32, status: u8, data1: u8, data2: u8) -> Self {
        Self {
            frame,
            data: MidiData::Inline {
                bytes: [status, data1, data2, 0],
                len: 3,
            },
        }
    }

    /// Message bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            MidiData::Inline { bytes, len } => &bytes[..*len as usize],
            MidiData::External(bytes) => bytes,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        match &self.data {
            MidiData::Inline { len, .. } => *len as usize,
            MidiData::External(bytes) => bytes.len(),
        }
    }

    /// Status byte, or 0 for an empty event.
    pub fn status(&self) -> u8 {
        self.bytes().first().copied().unwrap_or(0)
    }
}

/// Fixed-capacity event list assembled on the audio thread's stack once per cycle.
pub struct MidiEventList<'a> {
    events: [MidiEvent<'a>; MAX_MIDI_EVENTS],
    len: usize,
}

impl Default for MidiEventList<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> MidiEventList<'a> {
    /// Empty list.
    pub fn new() -> Self {
        Self {
            events: [MidiEvent::EMPTY; MAX_MIDI_EVENTS],
            len: 0,
        }
    }

    /// Append `event`; returns `false` once the list is full.
    pub fn push(&mut self, event: MidiEvent<'a>) -> bool {
        if self.len == MAX_MIDI_EVENTS {
            return false;
        }
        self.events[self.len] = event;
        self.len += 1;
        true
    }

    /// Number of collected events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the cap has been reached.
    pub fn is_full(&self) -> bool {
        self.len == MAX_MIDI_EVENTS
    }

    /// Remaining room before the cap.
    pub fn remaining(&self) -> usize {
        MAX_MIDI_EVENTS - self.len
    }

    /// Collected events in insertion order.
    pub fn as_slice(&self) -> &[MidiEvent<'a>] {
        &self.events[..self.len]
    }
}

/// Raw event as stored in a host-native MIDI buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMidiEvent<'a> {
    /// Frame offset within the cycle.
    pub time: u32,
    /// Message bytes.
    pub bytes: &'a [u8],
}

/// Failure reported by a host when fetching one event out of its MIDI buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("host failed to deliver midi event {index}")]
pub struct MidiFetchError {
    /// Index that could not be fetched.
    pub index: u32,
}

/// Host-native MIDI input buffer for one cycle.
pub trait MidiInputPort {
    /// Number of events in the buffer.
    fn event_count(&self) -> u32;

    /// Fetch event `index`.
    fn event(&self, index: u32) -> Result<RawMidiEvent<'_>, MidiFetchError>;
}

/// Host-native MIDI output buffer for one cycle.
pub trait MidiOutputPort {
    /// Drop everything written so far.
    fn clear(&mut self);

    /// Append an event; returns `false` when the buffer cannot take it.
    fn write(&mut self, frame: u32, bytes: &[u8]) -> bool;
}

/// Output sink used when the host exposes no MIDI output.
#[derive(Debug, Default)]
pub struct DiscardMidi;

impl MidiOutputPort for DiscardMidi {
    fn clear(&mut self) {}

    fn write(&mut self, _frame: u32, _bytes: &[u8]) -> bool {
        false
    }
}

/// UI-side writer of note messages into the event channel.
pub struct NoteSender {
    producer: EventProducer,
    shared: Arc<BridgeShared>,
}

impl NoteSender {
    pub(crate) fn new(producer: EventProducer, shared: Arc<BridgeShared>) -> Self {
        Self { producer, shared }
    }

    /// Queue a note-on (velocity > 0) or note-off (velocity 0) for the next cycle.
    ///
    /// Returns `false` and drops the note when the channel is full.
    pub fn send_note(&mut self, channel: u8, note: u8, velocity: u8) -> bool {
        let status = if velocity != 0 { NOTE_ON } else { NOTE_OFF };
        let message = [status | (channel & 0x0F), note & 0x7F, velocity & 0x7F];
        if !self.producer.write_record(&message) {
            self.shared
                .stats
                .notes_dropped
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }
}
