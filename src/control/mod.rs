//! UI contract and the idle loop that drives it.
use tracing::info;

use crate::BridgeError;
use crate::bridge::{BridgeUi, UiHost};

/// Log-only UI for running without a terminal.
pub mod headless;
/// Ratatui-based interactive console.
pub mod ui;

/// A plugin user interface driven from the UI thread.
pub trait PluginUi {
    /// Input parameter `index` changed on the audio side, or output `index` has a new value.
    fn parameter_changed(&mut self, index: u32, value: f32);

    /// The audio side loaded program `index`.
    fn program_loaded(&mut self, index: u32);

    /// Set the window title.
    fn set_window_title(&mut self, title: &str);

    /// One idle tick of the UI's own work. May block for up to one idle interval.
    fn exec_idle(&mut self, host: &mut UiHost) -> Result<(), BridgeError>;

    /// Ask the UI to close.
    fn quit(&mut self);

    /// Whether the UI is still open.
    fn is_running(&self) -> bool;
}

/// Run `ui` until it closes or shutdown is requested.
pub fn exec<U: PluginUi + ?Sized>(ui: &mut U, bridge: &mut BridgeUi) -> Result<(), BridgeError> {
    ui.set_window_title(bridge.title());
    info!(title = bridge.title(), "ui started");
    while bridge.idle(ui)? {}
    info!("ui closed");
    Ok(())
}
