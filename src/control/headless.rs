use std::time::Duration;

use tracing::{debug, info};

use crate::BridgeError;
use crate::bridge::UiHost;
use crate::control::PluginUi;

/// UI without a screen: reports changes through `tracing` and sleeps between ticks.
#[derive(Debug)]
pub struct HeadlessUi {
    interval: Duration,
    running: bool,
}

impl HeadlessUi {
    /// Headless UI ticking every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: true,
        }
    }
}

impl PluginUi for HeadlessUi {
    fn parameter_changed(&mut self, index: u32, value: f32) {
        debug!(index, value, "parameter changed");
    }

    fn program_loaded(&mut self, index: u32) {
        info!(index, "program loaded");
    }

    fn set_window_title(&mut self, title: &str) {
        debug!(title, "headless ui has no window to title");
    }

    fn exec_idle(&mut self, _host: &mut UiHost) -> Result<(), BridgeError> {
        std::thread::sleep(self.interval);
        Ok(())
    }

    fn quit(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
