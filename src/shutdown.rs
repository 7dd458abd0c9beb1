//! Process-wide quit request shared by signal handlers, the host and the UI loop.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::BridgeError;

/// Cloneable quit flag. Once signaled it stays signaled.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    /// Fresh, unsignaled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from any thread, including signal context.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether shutdown was requested.
    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Route SIGINT and SIGTERM into `token`.
///
/// Only one handler can be installed per process; a second call fails with
/// [`BridgeError::Signal`].
pub fn install_signal_handler(token: ShutdownToken) -> Result<(), BridgeError> {
    ctrlc::set_handler(move || token.signal())?;
    info!("signal handler installed");
    Ok(())
}
