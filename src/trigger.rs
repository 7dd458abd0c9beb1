//! Self-resetting trigger parameters.
//!
//! Hosts without native trigger semantics would leave a fired trigger stuck at its non-default
//! value, so the bridge returns each one to its default before every `run`.
use crate::params::{ParameterStore, apply_parameter, is_equal};
use crate::plugin::PluginCore;

/// Trigger parameters and their defaults, collected once at activation.
#[derive(Debug, Default)]
pub struct TriggerResetPolicy {
    triggers: Box<[(u32, f32)]>,
}

impl TriggerResetPolicy {
    /// Collect every parameter flagged as a trigger.
    pub fn from_store(store: &ParameterStore) -> Self {
        let triggers = store
            .infos()
            .iter()
            .enumerate()
            .filter(|(_, info)| info.is_trigger())
            .map(|(index, info)| (index as u32, info.ranges.def))
            .collect();
        Self { triggers }
    }

    /// Indices of the tracked triggers.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.triggers.iter().map(|(index, _)| *index)
    }

    /// Force every fired trigger back to its default. Returns how many were reset.
    pub fn apply<P: PluginCore + ?Sized>(&self, core: &mut P, store: &ParameterStore) -> u32 {
        let mut reset = 0;
        for &(index, default) in self.triggers.iter() {
            if is_equal(default, core.parameter_value(index)) {
                continue;
            }
            if apply_parameter(core, store, index, default, true) {
                reset += 1;
            }
        }
        reset
    }
}
