//! The process-cycle orchestrator and its UI-side handle.
//!
//! [`Bridge`] lives on the host's realtime thread and owns the DSP core. [`BridgeUi`] lives on
//! the UI thread. They share only atomics, the parameter store, the note channel and two bounded
//! queues for state strings, so nothing on the audio path locks or allocates.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, info, warn};

use crate::BridgeError;
use crate::config::BridgeConfig;
use crate::control::PluginUi;
use crate::host::{HostCallbacks, ProcessContext};
use crate::midi::{DiscardMidi, MidiEventList, MidiOutputPort, NoteSender};
use crate::multiplexer::MidiMultiplexer;
use crate::params::{
    ParameterChangeTracker, ParameterInfo, ParameterStore, apply_parameter,
};
use crate::plugin::{PluginCore, RunContext};
use crate::ring::EventChannel;
use crate::shutdown::ShutdownToken;
use crate::transport::TimePositionTranslator;
use crate::trigger::TriggerResetPolicy;

/// Pending state changes the UI may queue before the audio thread catches up.
pub const STATE_QUEUE_DEPTH: usize = 16;

/// State changes applied per cycle at most.
pub const MAX_STATE_CHANGES_PER_CYCLE: usize = 4;

const NO_PROGRAM: i32 = -1;

/// Lifecycle of a bridge.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Created, not yet activated.
    Idle = 0,
    /// Configuring the core.
    Activating = 1,
    /// Processing cycles.
    Running = 2,
    /// The host is gone or deactivation started; cycles are no longer processed.
    Deactivating = 3,
    /// The core was deactivated.
    ShuttingDown = 4,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Activating,
            2 => Self::Running,
            3 => Self::Deactivating,
            _ => Self::ShuttingDown,
        }
    }

    /// Lower-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Activating => "activating",
            Self::Running => "running",
            Self::Deactivating => "deactivating",
            Self::ShuttingDown => "shutting down",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters updated by the audio thread, read by anybody.
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Cycles processed while running.
    pub cycles: AtomicU64,
    /// UI notes lost because the note channel was full.
    pub notes_dropped: AtomicU64,
    /// Host MIDI events left out because the event list was full.
    pub midi_events_dropped: AtomicU64,
    /// Cycles whose host MIDI scan stopped on a fetch error.
    pub midi_fetch_errors: AtomicU64,
    /// Transport snapshots taken while the host was rewriting them.
    pub invalid_positions: AtomicU64,
    /// Control and program changes applied by the bridge.
    pub intercepted: AtomicU64,
    /// Programs loaded through MIDI.
    pub program_changes: AtomicU64,
    /// Parameter requests refused for an unknown or output parameter.
    pub rejected_requests: AtomicU64,
    /// State changes applied to the core.
    pub state_changes: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    if by != 0 {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Snapshot of a bridge for display.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeStatus {
    /// Current lifecycle state.
    pub lifecycle: Lifecycle,
    /// Sample rate the core runs at.
    pub sample_rate: f64,
    /// Maximum frames per cycle.
    pub buffer_size: u32,
    /// Last loaded program, if the core has programs.
    pub program: Option<u32>,
    /// Cycles processed.
    pub cycles: u64,
    /// UI notes dropped.
    pub notes_dropped: u64,
    /// Host MIDI events dropped.
    pub midi_events_dropped: u64,
    /// Host MIDI fetch errors.
    pub midi_fetch_errors: u64,
    /// Torn transport snapshots.
    pub invalid_positions: u64,
    /// Intercepted control and program changes.
    pub intercepted: u64,
    /// Programs loaded through MIDI.
    pub program_changes: u64,
    /// State changes applied to the core.
    pub state_changes: u64,
    /// Rejected parameter requests.
    pub rejected_requests: u64,
    /// Whether shutdown was requested.
    pub shutdown_requested: bool,
}

/// State both sides of the bridge can reach.
#[derive(Debug)]
pub struct BridgeShared {
    lifecycle: AtomicU8,
    program_changed: AtomicI32,
    current_program: AtomicI32,
    sample_rate: AtomicU64,
    buffer_size: AtomicU32,
    /// Audio-thread counters.
    pub stats: BridgeStats,
    shutdown: ShutdownToken,
}

impl BridgeShared {
    fn new(shutdown: ShutdownToken) -> Self {
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Idle as u8),
            program_changed: AtomicI32::new(NO_PROGRAM),
            current_program: AtomicI32::new(NO_PROGRAM),
            sample_rate: AtomicU64::new(0f64.to_bits()),
            buffer_size: AtomicU32::new(0),
            stats: BridgeStats::default(),
            shutdown,
        }
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Move to `to` if the current state is one of `from`. Returns the previous state.
    fn transition(&self, from: &[Lifecycle], to: Lifecycle) -> Result<Lifecycle, BridgeError> {
        let mut current = self.lifecycle.load(Ordering::Acquire);
        loop {
            let state = Lifecycle::from_u8(current);
            if !from.contains(&state) {
                return Err(BridgeError::InvalidTransition { from: state, to });
            }
            match self.lifecycle.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(from = %state, to = %to, "lifecycle transition");
                    return Ok(state);
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn record_program(&self, program: u32) {
        self.current_program.store(program as i32, Ordering::Release);
        self.program_changed.store(program as i32, Ordering::Release);
    }

    /// Snapshot for display.
    pub fn status(&self) -> BridgeStatus {
        let program = self.current_program.load(Ordering::Acquire);
        let stats = &self.stats;
        BridgeStatus {
            lifecycle: self.lifecycle(),
            sample_rate: f64::from_bits(self.sample_rate.load(Ordering::Relaxed)),
            buffer_size: self.buffer_size.load(Ordering::Relaxed),
            program: u32::try_from(program).ok(),
            cycles: stats.cycles.load(Ordering::Relaxed),
            notes_dropped: stats.notes_dropped.load(Ordering::Relaxed),
            midi_events_dropped: stats.midi_events_dropped.load(Ordering::Relaxed),
            midi_fetch_errors: stats.midi_fetch_errors.load(Ordering::Relaxed),
            invalid_positions: stats.invalid_positions.load(Ordering::Relaxed),
            intercepted: stats.intercepted.load(Ordering::Relaxed),
            program_changes: stats.program_changes.load(Ordering::Relaxed),
            state_changes: stats.state_changes.load(Ordering::Relaxed),
            rejected_requests: stats.rejected_requests.load(Ordering::Relaxed),
            shutdown_requested: self.shutdown.is_signaled(),
        }
    }
}

/// A key/value state change travelling from the UI to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// State key.
    pub key: String,
    /// New value.
    pub value: String,
}

/// Realtime half: owns the DSP core and runs one cycle per host callback.
pub struct Bridge<P: PluginCore> {
    core: P,
    params: Arc<ParameterStore>,
    shared: Arc<BridgeShared>,
    translator: TimePositionTranslator,
    multiplexer: MidiMultiplexer,
    triggers: TriggerResetPolicy,
    state_rx: Receiver<StateChange>,
    recycle_tx: Sender<StateChange>,
}

impl<P: PluginCore> Bridge<P> {
    /// Wrap `core`, returning the realtime half and the UI half.
    pub fn new(core: P, config: &BridgeConfig) -> Result<(Self, BridgeUi), BridgeError> {
        let params = Arc::new(ParameterStore::new(core.parameters().to_vec()));
        let shared = Arc::new(BridgeShared::new(ShutdownToken::new()));

        let channel = if config.channel.shared_memory {
            EventChannel::new_shared(config.channel.capacity)?
        } else {
            EventChannel::new_local(config.channel.capacity)
        };
        let (producer, consumer) = channel.split();

        let (state_tx, state_rx) = bounded(STATE_QUEUE_DEPTH);
        let (recycle_tx, recycle_rx) = bounded(STATE_QUEUE_DEPTH);

        let title = if config.client.name.is_empty() {
            core.name().to_string()
        } else {
            config.client.name.clone()
        };
        let program_names = (0..core.program_count())
            .map(|index| core.program_name(index).unwrap_or_default().to_string())
            .collect();

        info!(
            plugin = core.name(),
            parameters = params.len(),
            programs = core.program_count(),
            shared_memory = config.channel.shared_memory,
            "bridge created"
        );

        let ui = BridgeUi {
            tracker: ParameterChangeTracker::new(Arc::clone(&params)),
            host: UiHost {
                notes: NoteSender::new(producer, Arc::clone(&shared)),
                params: Arc::clone(&params),
                shared: Arc::clone(&shared),
                state_tx,
                recycle_rx,
                program_names,
            },
            title,
        };

        let bridge = Self {
            core,
            params,
            shared,
            translator: TimePositionTranslator::new(),
            multiplexer: MidiMultiplexer::new(Some(consumer), config.midi.forward_intercepted),
            triggers: TriggerResetPolicy::default(),
            state_rx,
            recycle_tx,
        };
        Ok((bridge, ui))
    }

    /// Configure and start the core. Program 0 is loaded and every input parameter is
    /// announced to the UI.
    pub fn activate(&mut self, sample_rate: f64, buffer_size: u32) -> Result<(), BridgeError> {
        self.shared.transition(&[Lifecycle::Idle], Lifecycle::Activating)?;

        self.configure(sample_rate, buffer_size);

        let program_count = self.core.program_count();
        if program_count > 0 {
            self.core.load_program(0);
            self.shared.record_program(0);
        }
        self.params.refresh_inputs(&self.core, true);
        self.params.mirror_outputs(&self.core);

        self.multiplexer.prepare(&self.params, program_count);
        self.triggers = TriggerResetPolicy::from_store(&self.params);

        self.core.activate();
        self.shared
            .transition(&[Lifecycle::Activating], Lifecycle::Running)?;
        info!(
            plugin = self.core.name(),
            sample_rate, buffer_size, "bridge activated"
        );
        Ok(())
    }

    /// Stop the core. Valid while running or after the host shut down.
    pub fn deactivate(&mut self) -> Result<(), BridgeError> {
        self.shared.transition(
            &[Lifecycle::Running, Lifecycle::Deactivating],
            Lifecycle::Deactivating,
        )?;
        self.core.deactivate();
        self.shared
            .transition(&[Lifecycle::Deactivating], Lifecycle::ShuttingDown)?;
        let status = self.shared.status();
        info!(
            cycles = status.cycles,
            notes_dropped = status.notes_dropped,
            midi_events_dropped = status.midi_events_dropped,
            "bridge deactivated"
        );
        Ok(())
    }

    fn configure(&mut self, sample_rate: f64, buffer_size: u32) {
        self.core.set_sample_rate(sample_rate);
        self.core.set_buffer_size(buffer_size);
        self.shared
            .sample_rate
            .store(sample_rate.to_bits(), Ordering::Relaxed);
        self.shared.buffer_size.store(buffer_size, Ordering::Relaxed);
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Snapshot for display.
    pub fn status(&self) -> BridgeStatus {
        self.shared.status()
    }

    /// Token that stops the UI loop when signaled.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shared.shutdown.clone()
    }

    /// Shared parameter store.
    pub fn parameters(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    /// The wrapped core.
    pub fn core(&self) -> &P {
        &self.core
    }

    /// Current value of state `key`, as the core reports it.
    pub fn state(&self, key: &str) -> Option<String> {
        self.core.state(key)
    }

    fn apply_ui_requests(&mut self) {
        for index in 0..self.params.len() {
            if let Some(value) = self.params.take_request(index) {
                apply_parameter(&mut self.core, &self.params, index, value, false);
            }
        }
    }

    fn apply_state_changes(&mut self) {
        for _ in 0..MAX_STATE_CHANGES_PER_CYCLE {
            let Ok(change) = self.state_rx.try_recv() else {
                break;
            };
            self.core.set_state(&change.key, &change.value);
            bump(&self.shared.stats.state_changes, 1);
            // Hand the strings back so they are freed on the UI thread.
            let _ = self.recycle_tx.try_send(change);
        }
    }

    fn apply_core_requests(&mut self, requests: &[(u32, f32)]) {
        for &(index, value) in requests {
            let writable = self.params.info(index).is_some_and(|info| !info.is_output());
            if !writable {
                bump(&self.shared.stats.rejected_requests, 1);
                continue;
            }
            apply_parameter(&mut self.core, &self.params, index, value, true);
        }
    }
}

impl<P: PluginCore> HostCallbacks for Bridge<P> {
    fn buffer_size_changed(&mut self, frames: u32) {
        self.core.set_buffer_size(frames);
        self.shared.buffer_size.store(frames, Ordering::Relaxed);
    }

    fn sample_rate_changed(&mut self, sample_rate: f64) {
        self.core.set_sample_rate(sample_rate);
        self.shared
            .sample_rate
            .store(sample_rate.to_bits(), Ordering::Relaxed);
    }

    fn process(&mut self, context: ProcessContext<'_>) {
        let ProcessContext {
            frames,
            inputs,
            outputs,
            midi_in,
            midi_out,
            position,
        } = context;

        if self.shared.lifecycle() != Lifecycle::Running {
            for output in outputs.iter_mut() {
                let len = output.len().min(frames as usize);
                output[..len].fill(0.0);
            }
            if let Some(port) = midi_out {
                port.clear();
            }
            return;
        }

        let stats = &self.shared.stats;
        bump(&stats.cycles, 1);

        if !position.is_consistent() {
            bump(&stats.invalid_positions, 1);
        }
        let time = self.translator.translate(&position);
        self.core.set_time_position(time);

        self.apply_ui_requests();
        self.apply_state_changes();
        self.triggers.apply(&mut self.core, &self.params);

        let mut discard = DiscardMidi;
        let midi_out: &mut dyn MidiOutputPort = match midi_out {
            Some(port) => port,
            None => &mut discard,
        };
        midi_out.clear();

        let mut events = MidiEventList::new();
        let outcome = self
            .multiplexer
            .gather(midi_in, &mut self.core, &self.params, &mut events);

        let stats = &self.shared.stats;
        bump(&stats.midi_events_dropped, u64::from(outcome.dropped));
        bump(&stats.intercepted, u64::from(outcome.intercepted));
        if outcome.fetch_failed {
            bump(&stats.midi_fetch_errors, 1);
        }
        if let Some(program) = outcome.program {
            self.shared.record_program(program);
            bump(&stats.program_changes, 1);
            self.params.refresh_inputs(&self.core, true);
        }

        let mut run_context = RunContext::new(midi_out);
        self.core
            .run(inputs, outputs, frames, events.as_slice(), &mut run_context);
        self.apply_core_requests(run_context.requests());

        self.params.mirror_outputs(&self.core);
    }

    fn shutdown(&mut self) {
        warn!("host has shut down, quitting");
        if let Err(err) = self.shared.transition(
            &[Lifecycle::Activating, Lifecycle::Running],
            Lifecycle::Deactivating,
        ) {
            debug!(%err, "host shutdown outside of an active cycle");
        }
        self.shared.shutdown.signal();
    }
}

impl<P: PluginCore> Drop for Bridge<P> {
    fn drop(&mut self) {
        if !matches!(
            self.shared.lifecycle(),
            Lifecycle::Running | Lifecycle::Deactivating
        ) {
            return;
        }
        if let Err(err) = self.deactivate() {
            warn!(%err, "failed to deactivate bridge on drop");
        }
    }
}

/// UI-thread services: notes, parameter and state requests, read access to shared state.
pub struct UiHost {
    notes: NoteSender,
    params: Arc<ParameterStore>,
    shared: Arc<BridgeShared>,
    state_tx: Sender<StateChange>,
    recycle_rx: Receiver<StateChange>,
    program_names: Vec<String>,
}

impl UiHost {
    /// Queue a note for the next cycle; velocity 0 sends a note-off.
    pub fn send_note(&mut self, channel: u8, note: u8, velocity: u8) -> bool {
        self.notes.send_note(channel, note, velocity)
    }

    /// Ask the audio thread to set an input parameter. Returns the clamped value.
    pub fn set_parameter_value(&self, index: u32, value: f32) -> Result<f32, BridgeError> {
        match self.params.request(index, value) {
            Ok(value) => {
                debug!(index, value, "parameter change requested");
                Ok(value)
            }
            Err(err) => {
                bump(&self.shared.stats.rejected_requests, 1);
                Err(err)
            }
        }
    }

    /// Queue a state change for the audio thread.
    pub fn set_state(&mut self, key: &str, value: &str) -> Result<(), BridgeError> {
        self.recycle();
        self.state_tx
            .try_send(StateChange {
                key: key.to_string(),
                value: value.to_string(),
            })
            .map_err(|_| BridgeError::StateQueueFull)?;
        debug!(key, value, "state change requested");
        Ok(())
    }

    /// Free state strings the audio thread handed back. Returns how many were freed.
    pub fn recycle(&mut self) -> usize {
        self.recycle_rx.try_iter().count()
    }

    /// Parameter descriptions in index order.
    pub fn parameters(&self) -> &[ParameterInfo] {
        self.params.infos()
    }

    /// Last value the audio thread published for `index`.
    pub fn parameter_value(&self, index: u32) -> Option<f32> {
        self.params.value(index)
    }

    /// Name of program `index`.
    pub fn program_name(&self, index: u32) -> Option<&str> {
        self.program_names.get(index as usize).map(String::as_str)
    }

    /// Number of programs.
    pub fn program_count(&self) -> u32 {
        self.program_names.len() as u32
    }

    /// Snapshot for display.
    pub fn status(&self) -> BridgeStatus {
        self.shared.status()
    }

    /// Token that stops the UI loop when signaled.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shared.shutdown.clone()
    }
}

/// UI half of a bridge. Drive it with [`BridgeUi::idle`] on every UI tick.
pub struct BridgeUi {
    tracker: ParameterChangeTracker,
    host: UiHost,
    title: String,
}

impl BridgeUi {
    /// Window title: the client name, or the plugin name when no client name is set.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// UI-side services.
    pub fn host(&self) -> &UiHost {
        &self.host
    }

    /// Mutable UI-side services.
    pub fn host_mut(&mut self) -> &mut UiHost {
        &mut self.host
    }

    /// One idle tick: deliver pending notifications to `ui`, then let it do its own work.
    ///
    /// Returns whether the UI is still running.
    pub fn idle<U: PluginUi + ?Sized>(&mut self, ui: &mut U) -> Result<bool, BridgeError> {
        if self.host.shared.shutdown.is_signaled() {
            if ui.is_running() {
                info!("shutdown requested, closing ui");
                ui.quit();
            }
            return Ok(false);
        }

        let program = self
            .host
            .shared
            .program_changed
            .swap(NO_PROGRAM, Ordering::AcqRel);
        if let Ok(program) = u32::try_from(program) {
            ui.program_loaded(program);
        }

        for change in self.tracker.poll_outputs() {
            ui.parameter_changed(change.index, change.value);
        }

        self.host.recycle();
        ui.exec_idle(&mut self.host)?;
        Ok(ui.is_running())
    }
}
