//! Parameter description, shared value storage and UI change tracking.
//!
//! The audio thread is the only trusted writer of parameter values. It publishes every value it
//! writes into a [`ParameterStore`] so the UI thread can read it without touching the DSP core,
//! and raises a per-parameter dirty flag for input changes the UI did not originate. The UI
//! thread drains those flags once per idle tick through a [`ParameterChangeTracker`].
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bitflags::bitflags;

use crate::BridgeError;
use crate::plugin::PluginCore;

bitflags! {
    /// Behavioural hints attached to a parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParameterHints: u32 {
        /// The host may automate the parameter.
        const AUTOMATABLE = 0x01;
        /// Only the minimum and maximum are meaningful.
        const BOOLEAN = 0x02 | Self::AUTOMATABLE.bits();
        /// Values are whole numbers.
        const INTEGER = 0x04;
        /// Values should be displayed on a logarithmic scale.
        const LOGARITHMIC = 0x08;
        /// Written by the DSP core, read by everybody else.
        const OUTPUT = 0x10;
        /// Momentary event that falls back to its default once consumed.
        const TRIGGER = 0x20 | Self::BOOLEAN.bits();
    }
}

/// Value range of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRanges {
    /// Lowest accepted value.
    pub min: f32,
    /// Highest accepted value.
    pub max: f32,
    /// Default value.
    pub def: f32,
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            def: 0.0,
        }
    }
}

impl ParameterRanges {
    /// Create a range from its bounds and default.
    pub const fn new(min: f32, max: f32, def: f32) -> Self {
        Self { min, max, def }
    }

    /// Clamp `value` into the range.
    pub fn fix_value(&self, value: f32) -> f32 {
        if value <= self.min {
            self.min
        } else if value >= self.max {
            self.max
        } else {
            value
        }
    }

    /// Map a plain value to `0.0..=1.0`.
    pub fn normalized_value(&self, value: f32) -> f32 {
        if self.max <= self.min {
            return 0.0;
        }
        ((self.fix_value(value) - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// Map a `0.0..=1.0` value back into the range.
    pub fn unnormalized_value(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        self.min + normalized * (self.max - self.min)
    }
}

/// Static description of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    /// Display name.
    pub name: &'static str,
    /// Stable machine-readable identifier.
    pub symbol: &'static str,
    /// Unit label, possibly empty.
    pub unit: &'static str,
    /// Behavioural hints.
    pub hints: ParameterHints,
    /// Value range.
    pub ranges: ParameterRanges,
    /// MIDI CC (0-127) bound to this parameter, if any.
    pub midi_cc: Option<u8>,
}

impl ParameterInfo {
    /// Create an automatable input parameter on `0.0..=1.0`.
    pub const fn new(name: &'static str, symbol: &'static str) -> Self {
        Self {
            name,
            symbol,
            unit: "",
            hints: ParameterHints::AUTOMATABLE,
            ranges: ParameterRanges::new(0.0, 1.0, 0.0),
            midi_cc: None,
        }
    }

    /// Replace the hints.
    pub const fn with_hints(mut self, hints: ParameterHints) -> Self {
        self.hints = hints;
        self
    }

    /// Replace the range.
    pub const fn with_ranges(mut self, min: f32, max: f32, def: f32) -> Self {
        self.ranges = ParameterRanges::new(min, max, def);
        self
    }

    /// Set the unit label.
    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// Bind a MIDI CC number.
    pub const fn with_midi_cc(mut self, cc: u8) -> Self {
        self.midi_cc = Some(cc);
        self
    }

    /// Whether the DSP core owns this parameter's value.
    pub fn is_output(&self) -> bool {
        self.hints.contains(ParameterHints::OUTPUT)
    }

    /// Whether the parameter models a momentary event.
    pub fn is_trigger(&self) -> bool {
        self.hints.contains(ParameterHints::TRIGGER)
    }
}

/// Approximate float equality used to ignore float noise between observations.
pub fn is_equal(a: f32, b: f32) -> bool {
    (a - b).abs() < f32::EPSILON
}

/// Parameter values shared between the audio thread and the UI thread.
pub struct ParameterStore {
    info: Box<[ParameterInfo]>,
    values: Box<[AtomicU32]>,
    changed: Box<[AtomicBool]>,
    requests: Box<[AtomicU32]>,
    requested: Box<[AtomicBool]>,
}

impl ParameterStore {
    /// Allocate storage for `info`, every value starting at its default.
    pub fn new(info: Vec<ParameterInfo>) -> Self {
        let values = info
            .iter()
            .map(|p| AtomicU32::new(p.ranges.def.to_bits()))
            .collect();
        let changed = info.iter().map(|_| AtomicBool::new(false)).collect();
        let requests = info.iter().map(|_| AtomicU32::new(0)).collect();
        let requested = info.iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            info: info.into_boxed_slice(),
            values,
            changed,
            requests,
            requested,
        }
    }

    /// Number of parameters.
    pub fn len(&self) -> u32 {
        self.info.len() as u32
    }

    /// Whether the plugin declares no parameters.
    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    /// Description of parameter `index`.
    pub fn info(&self, index: u32) -> Option<&ParameterInfo> {
        self.info.get(index as usize)
    }

    /// All descriptions in index order.
    pub fn infos(&self) -> &[ParameterInfo] {
        &self.info
    }

    /// Last value published by the audio thread.
    pub fn value(&self, index: u32) -> Option<f32> {
        self.values
            .get(index as usize)
            .map(|v| f32::from_bits(v.load(Ordering::Acquire)))
    }

    /// Record the value the DSP core now holds. Audio thread only.
    pub fn publish(&self, index: u32, value: f32) -> bool {
        match self.values.get(index as usize) {
            Some(slot) => {
                slot.store(value.to_bits(), Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Raise the dirty flag of an input parameter. Audio thread only, never blocks.
    pub fn mark_changed(&self, index: u32) -> bool {
        match self.changed.get(index as usize) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Clear and return the dirty flag of `index`. UI thread only.
    pub fn take_changed(&self, index: u32) -> bool {
        self.changed
            .get(index as usize)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }

    /// Ask the audio thread to set an input parameter on its next cycle.
    ///
    /// Repeated requests before the next cycle coalesce into the latest value.
    pub fn request(&self, index: u32, value: f32) -> Result<f32, BridgeError> {
        let info = self
            .info(index)
            .ok_or(BridgeError::UnknownParameter(index))?;
        if info.is_output() {
            return Err(BridgeError::OutputParameter(index));
        }
        let value = info.ranges.fix_value(value);
        self.requests[index as usize].store(value.to_bits(), Ordering::Relaxed);
        self.requested[index as usize].store(true, Ordering::Release);
        Ok(value)
    }

    /// Take the pending UI request for `index`, if any. Audio thread only.
    pub fn take_request(&self, index: u32) -> Option<f32> {
        let flag = self.requested.get(index as usize)?;
        if !flag.swap(false, Ordering::Acquire) {
            return None;
        }
        Some(f32::from_bits(
            self.requests[index as usize].load(Ordering::Relaxed),
        ))
    }

    /// Copy every output parameter's current value out of the core.
    pub fn mirror_outputs<P: PluginCore + ?Sized>(&self, core: &P) {
        for (index, info) in self.info.iter().enumerate() {
            if info.is_output() {
                self.publish(index as u32, core.parameter_value(index as u32));
            }
        }
    }

    /// Copy every input parameter's current value out of the core, optionally flagging each
    /// one for the UI.
    pub fn refresh_inputs<P: PluginCore + ?Sized>(&self, core: &P, notify: bool) {
        for (index, info) in self.info.iter().enumerate() {
            if info.is_output() {
                continue;
            }
            self.publish(index as u32, core.parameter_value(index as u32));
            if notify {
                self.mark_changed(index as u32);
            }
        }
    }
}

/// Write `value` into the core and publish what the core kept.
///
/// Every bridge-originated parameter write goes through here. Returns `false` for an unknown
/// index, leaving the core untouched.
pub fn apply_parameter<P: PluginCore + ?Sized>(
    core: &mut P,
    store: &ParameterStore,
    index: u32,
    value: f32,
    notify: bool,
) -> bool {
    if index >= store.len() {
        return false;
    }
    core.set_parameter_value(index, value);
    store.publish(index, core.parameter_value(index));
    if notify {
        store.mark_changed(index);
    }
    true
}

/// One value change to deliver to the UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterChange {
    /// Parameter index.
    pub index: u32,
    /// New value.
    pub value: f32,
}

/// UI-side poller turning the store's state into change notifications.
pub struct ParameterChangeTracker {
    store: Arc<ParameterStore>,
    last_output: Vec<f32>,
}

impl ParameterChangeTracker {
    /// Track `store`. Output values are compared against zero until first seen.
    pub fn new(store: Arc<ParameterStore>) -> Self {
        let last_output = vec![0.0; store.len() as usize];
        Self { store, last_output }
    }

    /// Collect the changes since the previous poll, in index order.
    pub fn poll_outputs(&mut self) -> Vec<ParameterChange> {
        let mut changes = Vec::new();
        for (index, info) in self.store.infos().iter().enumerate() {
            let index = index as u32;
            if info.is_output() {
                let value = self.store.value(index).unwrap_or_default();
                let last = &mut self.last_output[index as usize];
                if is_equal(*last, value) {
                    continue;
                }
                *last = value;
                changes.push(ParameterChange { index, value });
            } else if self.store.take_changed(index) {
                let value = self.store.value(index).unwrap_or_default();
                changes.push(ParameterChange { index, value });
            }
        }
        changes
    }
}
