#![deny(missing_docs)]

//! Realtime control-data bridge between an audio host, a plugin DSP core and its UI.
//!
//! The [`Bridge`](bridge::Bridge) runs on the host's realtime thread. Each cycle it merges UI
//! notes with host MIDI, applies MIDI-mapped parameter and program changes, resets trigger
//! parameters, hands the host transport to the core and runs it. The UI thread drives a
//! [`BridgeUi`](bridge::BridgeUi) on a timer to learn about parameter and program changes the
//! audio side made. The two sides share only atomics, a lock-free
//! [`EventChannel`](ring::EventChannel) for notes and bounded queues, so the audio path never
//! blocks or allocates.

use std::collections::VecDeque;
use std::io;
use std::sync::Once;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::Level;

pub mod bridge;
pub mod config;
pub mod control;
pub mod host;
pub mod midi;
pub mod multiplexer;
pub mod params;
pub mod plugin;
pub mod ring;
pub mod shutdown;
pub mod tone;
pub mod transport;
pub mod trigger;

#[cfg(test)]
mod tests;

pub use bridge::{Bridge, BridgeStatus, BridgeUi, Lifecycle, UiHost};
pub use config::BridgeConfig;
pub use host::{ClockHost, HostCallbacks, ProcessContext};
pub use plugin::{PluginCore, RunContext};
pub use shutdown::ShutdownToken;

const LOG_CAPACITY: usize = 256;

static LOG_BUFFER: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(64)));
static TRACING_INIT: Once = Once::new();

/// Error enumeration surfaced across the public API.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// Terminal, mapping or file access failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A configuration file is not valid TOML or has unexpected keys.
    #[error("malformed configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// The configuration could not be rendered.
    #[error("cannot render configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Parameter index beyond the plugin's parameter count.
    #[error("unknown parameter index {0}")]
    UnknownParameter(u32),
    /// Write request for a parameter only the DSP core may set.
    #[error("parameter {0} is an output and cannot be written")]
    OutputParameter(u32),
    /// Lifecycle operation called in the wrong state.
    #[error("cannot move from {from} to {to}")]
    InvalidTransition {
        /// State the bridge was in.
        from: Lifecycle,
        /// State that was requested.
        to: Lifecycle,
    },
    /// The audio thread has not drained earlier state changes yet.
    #[error("state change queue is full")]
    StateQueueFull,
    /// The process signal handler could not be installed.
    #[error("cannot install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    /// The host thread failed.
    #[error("host thread failed: {0}")]
    HostThread(String),
}

/// Where [`init_tracing`] sends formatted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    /// Standard error.
    Stderr,
    /// The in-memory line buffer read through [`pop_log`], for when a console owns the screen.
    Buffer,
}

/// Install the global `tracing` subscriber once. Later calls are ignored.
pub fn init_tracing(level: Level, sink: LogSink) {
    TRACING_INIT.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false);
        let _ = match sink {
            LogSink::Stderr => builder.with_writer(io::stderr).try_init(),
            LogSink::Buffer => builder.with_writer(BufferedLine::default).try_init(),
        };
    });
}

/// Append a line to the log buffer, dropping the oldest beyond capacity.
pub fn push_log(line: impl Into<String>) {
    let mut guard = LOG_BUFFER.lock();
    guard.push_back(line.into());
    while guard.len() > LOG_CAPACITY {
        guard.pop_front();
    }
}

/// Take the oldest buffered log line.
pub fn pop_log() -> Option<String> {
    LOG_BUFFER.lock().pop_front()
}

/// Writer for one formatted event; the line is buffered when the writer is dropped.
#[derive(Default)]
struct BufferedLine(Vec<u8>);

impl io::Write for BufferedLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BufferedLine {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.0);
        let line = line.trim_end();
        if !line.is_empty() {
            push_log(line);
        }
    }
}
