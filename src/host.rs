//! Audio host side of the bridge.
//!
//! A host owns the realtime thread and calls into a [`HostCallbacks`] implementation. The crate
//! ships [`ClockHost`], a timer-driven host that runs cycles at the configured period without any
//! audio device, feeding silence in, discarding audio out and reporting a steady transport.
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::BridgeError;
use crate::midi::{MidiFetchError, MidiInputPort, MidiOutputPort, RawMidiEvent};
use crate::transport::{HostPosition, SimulatedTransport};

/// Most audio ports a [`ClockHost`] exposes per direction.
pub const MAX_AUDIO_PORTS: usize = 8;

/// Calls a host makes into the bridge.
pub trait HostCallbacks: Send {
    /// Maximum frames per cycle changed.
    fn buffer_size_changed(&mut self, frames: u32);

    /// Sample rate changed.
    fn sample_rate_changed(&mut self, sample_rate: f64);

    /// Run one cycle. Called on the realtime thread.
    fn process(&mut self, context: ProcessContext<'_>);

    /// The host went away; no further `process` calls follow.
    fn shutdown(&mut self);
}

/// Everything the host lends the bridge for one cycle.
pub struct ProcessContext<'a> {
    /// Frames in this cycle.
    pub frames: u32,
    /// Audio input buffers, one per port.
    pub inputs: &'a [&'a [f32]],
    /// Audio output buffers, one per port.
    pub outputs: &'a mut [&'a mut [f32]],
    /// Host MIDI input for this cycle.
    pub midi_in: &'a dyn MidiInputPort,
    /// Host MIDI output, when the host exposes one.
    pub midi_out: Option<&'a mut dyn MidiOutputPort>,
    /// Transport snapshot taken at the start of the cycle.
    pub position: HostPosition,
}

#[derive(Debug, Clone, Copy)]
struct PortEvent {
    time: u32,
    start: usize,
    end: usize,
}

/// Host-native MIDI buffer: one flat byte arena plus an event index.
///
/// Capacity is fixed at construction; writes past it fail instead of growing.
#[derive(Debug)]
pub struct MidiPortBuffer {
    bytes: Vec<u8>,
    events: Vec<PortEvent>,
    max_events: usize,
    max_bytes: usize,
    fail_at: Option<u32>,
}

impl MidiPortBuffer {
    /// Buffer holding at most `max_events` events and `max_bytes` payload bytes.
    pub fn with_capacity(max_events: usize, max_bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(max_bytes),
            events: Vec::with_capacity(max_events),
            max_events,
            max_bytes,
            fail_at: None,
        }
    }

    /// Append an event. Returns `false` when the buffer is full.
    ///
    /// The arena never reallocates on the audio thread.
    pub fn push(&mut self, time: u32, bytes: &[u8]) -> bool {
        if self.events.len() == self.max_events || self.bytes.len() + bytes.len() > self.max_bytes
        {
            return false;
        }
        let start = self.bytes.len();
        self.bytes.extend_from_slice(bytes);
        self.events.push(PortEvent {
            time,
            start,
            end: self.bytes.len(),
        });
        true
    }

    /// Make fetching event `index` fail, as a misbehaving host would.
    pub fn fail_fetch_at(&mut self, index: Option<u32>) {
        self.fail_at = index;
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = RawMidiEvent<'_>> + '_ {
        self.events.iter().map(|event| RawMidiEvent {
            time: event.time,
            bytes: &self.bytes[event.start..event.end],
        })
    }
}

impl MidiInputPort for MidiPortBuffer {
    fn event_count(&self) -> u32 {
        self.events.len() as u32
    }

    fn event(&self, index: u32) -> Result<RawMidiEvent<'_>, MidiFetchError> {
        if self.fail_at == Some(index) {
            return Err(MidiFetchError { index });
        }
        let event = self
            .events
            .get(index as usize)
            .ok_or(MidiFetchError { index })?;
        Ok(RawMidiEvent {
            time: event.time,
            bytes: &self.bytes[event.start..event.end],
        })
    }
}

impl MidiOutputPort for MidiPortBuffer {
    fn clear(&mut self) {
        self.bytes.clear();
        self.events.clear();
    }

    fn write(&mut self, frame: u32, bytes: &[u8]) -> bool {
        self.push(frame, bytes)
    }
}

impl Default for MidiPortBuffer {
    fn default() -> Self {
        Self::with_capacity(PORT_MAX_EVENTS, PORT_MAX_BYTES)
    }
}

/// Settings of a [`ClockHost`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockHostConfig {
    /// Sample rate reported to the callbacks.
    pub sample_rate: f64,
    /// Frames per cycle.
    pub buffer_size: u32,
    /// Audio input ports, all silent.
    pub inputs: usize,
    /// Audio output ports.
    pub outputs: usize,
    /// Transport reported with every cycle.
    pub transport: SimulatedTransport,
}

impl Default for ClockHostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            buffer_size: 256,
            inputs: 0,
            outputs: 2,
            transport: SimulatedTransport::default(),
        }
    }
}

const RUN: u8 = 0;
const STOP: u8 = 1;
const DISCONNECT: u8 = 2;

const PORT_MAX_EVENTS: usize = 1024;
const PORT_MAX_BYTES: usize = 16 * 1024;

struct ClockCounters {
    cycles: AtomicU64,
    midi_out_events: AtomicU64,
}

/// Timer-driven host running [`HostCallbacks`] on its own thread.
pub struct ClockHost<C: HostCallbacks + 'static> {
    command: Arc<AtomicU8>,
    counters: Arc<ClockCounters>,
    midi_tx: Sender<Vec<u8>>,
    thread: Option<JoinHandle<C>>,
}

impl<C: HostCallbacks + 'static> ClockHost<C> {
    /// Spawn the host thread. The callbacks first receive the buffer size and sample rate,
    /// then one `process` call per period.
    pub fn start(callbacks: C, config: ClockHostConfig) -> Result<Self, BridgeError> {
        if config.inputs > MAX_AUDIO_PORTS || config.outputs > MAX_AUDIO_PORTS {
            return Err(BridgeError::InvalidConfig(format!(
                "clock host supports at most {MAX_AUDIO_PORTS} ports per direction"
            )));
        }
        if config.buffer_size == 0 || config.sample_rate <= 0.0 {
            return Err(BridgeError::InvalidConfig(
                "clock host needs a positive buffer size and sample rate".into(),
            ));
        }

        let command = Arc::new(AtomicU8::new(RUN));
        let counters = Arc::new(ClockCounters {
            cycles: AtomicU64::new(0),
            midi_out_events: AtomicU64::new(0),
        });
        let (midi_tx, midi_rx) = unbounded();

        let thread = std::thread::Builder::new()
            .name("clock-host".into())
            .spawn({
                let command = Arc::clone(&command);
                let counters = Arc::clone(&counters);
                move || run_clock(callbacks, config, &command, &counters, &midi_rx)
            })?;

        info!(
            sample_rate = config.sample_rate,
            buffer_size = config.buffer_size,
            "clock host started"
        );
        Ok(Self {
            command,
            counters,
            midi_tx,
            thread: Some(thread),
        })
    }

    /// Queue for raw MIDI messages delivered at frame 0 of the next cycle.
    pub fn midi_sender(&self) -> Sender<Vec<u8>> {
        self.midi_tx.clone()
    }

    /// Cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.counters.cycles.load(Ordering::Relaxed)
    }

    /// Events the callbacks wrote to the MIDI output so far.
    pub fn midi_out_events(&self) -> u64 {
        self.counters.midi_out_events.load(Ordering::Relaxed)
    }

    /// Stop after the current cycle and hand the callbacks back.
    pub fn stop(self) -> Result<C, BridgeError> {
        self.finish(STOP)
    }

    /// Simulate the server going away: the callbacks get `shutdown` before the thread exits.
    pub fn disconnect(self) -> Result<C, BridgeError> {
        self.finish(DISCONNECT)
    }

    fn finish(mut self, command: u8) -> Result<C, BridgeError> {
        self.command.store(command, Ordering::Release);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| BridgeError::HostThread("clock host already stopped".into()))?;
        let callbacks = thread
            .join()
            .map_err(|_| BridgeError::HostThread("clock host thread panicked".into()))?;
        info!(cycles = self.cycles(), "clock host stopped");
        Ok(callbacks)
    }
}

impl<C: HostCallbacks + 'static> Drop for ClockHost<C> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.command.store(STOP, Ordering::Release);
            if thread.join().is_err() {
                warn!("clock host thread panicked");
            }
        }
    }
}

fn run_clock<C: HostCallbacks>(
    mut callbacks: C,
    config: ClockHostConfig,
    command: &AtomicU8,
    counters: &ClockCounters,
    midi_rx: &Receiver<Vec<u8>>,
) -> C {
    let frames = config.buffer_size as usize;
    callbacks.buffer_size_changed(config.buffer_size);
    callbacks.sample_rate_changed(config.sample_rate);

    let input_buffers = vec![vec![0.0f32; frames]; config.inputs];
    let mut output_buffers = vec![vec![0.0f32; frames]; config.outputs];
    let mut midi_in = MidiPortBuffer::default();
    let mut midi_out = MidiPortBuffer::default();

    let period = Duration::from_secs_f64(f64::from(config.buffer_size) / config.sample_rate);
    let mut deadline = Instant::now();
    let mut frame = 0u64;
    let mut sequence = 0u64;

    loop {
        match command.load(Ordering::Acquire) {
            RUN => {}
            DISCONNECT => {
                debug!("clock host disconnecting");
                callbacks.shutdown();
                break;
            }
            _ => break,
        }

        midi_in.clear();
        while let Ok(message) = midi_rx.try_recv() {
            if !midi_in.push(0, &message) {
                warn!(len = message.len(), "clock host midi input full");
                break;
            }
        }
        midi_out.clear();
        for buffer in output_buffers.iter_mut() {
            buffer.fill(0.0);
        }

        let mut inputs_iter = input_buffers.iter();
        let inputs: [&[f32]; MAX_AUDIO_PORTS] = std::array::from_fn(|_| {
            inputs_iter
                .next()
                .map_or_else(Default::default, Vec::as_slice)
        });
        let mut outputs_iter = output_buffers.iter_mut();
        let mut outputs: [&mut [f32]; MAX_AUDIO_PORTS] = std::array::from_fn(|_| {
            outputs_iter
                .next()
                .map_or_else(Default::default, Vec::as_mut_slice)
        });

        callbacks.process(ProcessContext {
            frames: config.buffer_size,
            inputs: &inputs[..config.inputs],
            outputs: &mut outputs[..config.outputs],
            midi_in: &midi_in,
            midi_out: Some(&mut midi_out),
            position: config
                .transport
                .snapshot(frame, config.sample_rate, sequence),
        });

        counters
            .midi_out_events
            .fetch_add(midi_out.len() as u64, Ordering::Relaxed);
        counters.cycles.fetch_add(1, Ordering::Relaxed);
        if config.transport.rolling {
            frame += u64::from(config.buffer_size);
        }
        sequence += 1;

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }

    callbacks
}
