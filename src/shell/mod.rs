//! Remote shells and the commands running in them.
//!
//! A [`Shell`] is an open WinRS shell on the remote host. It runs at most one
//! [`Command`] at a time: starting a second command while the first is still
//! held fails with [`Error::InvalidState`]. Shells are created through a
//! [`Client`] and must be closed explicitly, since each open shell counts
//! against the remote host's per-user quota.

pub mod command;
pub mod pool;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transport::{CommandOptions, Transport};

pub use command::{Command, CommandState, OutputBuffer, OutputSink};
pub use pool::{Client, ShellPool};

use command::ShellLease;

/// Whether a shell can still accept commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    /// The remote shell exists
    Open,
    /// The remote shell was deleted
    Closed,
}

/// An open remote shell.
pub struct Shell {
    id: String,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    state: Mutex<ShellState>,
    busy: Arc<AtomicBool>,
    closing: tokio::sync::Mutex<()>,
}

impl Shell {
    pub(crate) fn new(id: String, transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self {
            id,
            transport,
            retry,
            state: Mutex::new(ShellState::Open),
            busy: Arc::new(AtomicBool::new(false)),
            closing: tokio::sync::Mutex::new(()),
        }
    }

    /// Shell identifier assigned by the listener.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> ShellState {
        *self.state.lock()
    }

    /// True while a command started on this shell is still held.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start a command; its output streams into `stdout` and `stderr`.
    ///
    /// Fails with [`Error::InvalidState`] if the shell is closed or another
    /// command on it has not been dropped yet.
    pub async fn start_command(
        &self,
        command: &str,
        args: &[String],
        options: CommandOptions,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Command> {
        if self.state() == ShellState::Closed {
            return Err(Error::invalid_state(format!("shell {} is closed", self.id)));
        }
        let lease = ShellLease::acquire(&self.busy).ok_or_else(|| {
            Error::invalid_state(format!("shell {} is already running a command", self.id))
        })?;

        let command_id = self
            .transport
            .create_command(&self.id, command, args, options)
            .await?;
        debug!(shell_id = %self.id, command_id = %command_id, command = %command, "Command started");

        Ok(Command::start(
            command_id,
            self.id.clone(),
            Arc::clone(&self.transport),
            self.retry.clone(),
            stdout,
            stderr,
            lease,
        ))
    }

    /// Delete the remote shell. Closing an already-closed shell is a no-op.
    ///
    /// Concurrent calls are serialized, so the delete is sent once.
    pub async fn close(&self) -> Result<()> {
        let _closing = self.closing.lock().await;
        if self.state() == ShellState::Closed {
            return Ok(());
        }
        self.transport.delete_shell(&self.id).await?;
        *self.state.lock() = ShellState::Closed;
        debug!(shell_id = %self.id, "Shell closed");
        Ok(())
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("id", &self.id)
            .field("endpoint", &self.transport.endpoint())
            .field("state", &self.state())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        if *self.state.get_mut() == ShellState::Open {
            warn!(shell_id = %self.id, "Shell dropped while open; it stays allocated until the remote idle timeout");
        }
    }
}
