//! One remote command running inside a shell.
//!
//! Starting a command spawns a task that polls the listener for output and
//! writes it to the caller's sinks in arrival order. [`Command::wait`] joins
//! that task, so by the time an exit code is returned every byte has been
//! written. [`Command::signal`] terminates the command and is safe to call at
//! any point, including after completion.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transport::{ReceivedOutput, Transport};

/// Destination for a command's stdout or stderr.
pub type OutputSink = Box<dyn Write + Send>;

/// In-memory output sink that can be read back after the command finishes.
///
/// Clones share the same buffer, so keep one clone and pass the other to
/// [`Shell::start_command`](super::Shell::start_command).
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    /// Bytes written so far, decoded lossily as UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    /// Boxed clone usable as an [`OutputSink`].
    pub fn sink(&self) -> OutputSink {
        Box::new(self.clone())
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Lifecycle of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    /// Output is still being received
    Running,
    /// Terminate was sent before completion was observed
    Signaled,
    /// The listener reported the command as done
    Completed,
}

/// Marks a shell as busy for as long as a command holds it.
#[derive(Debug)]
pub(crate) struct ShellLease(Arc<AtomicBool>);

impl ShellLease {
    /// Take the lease if the shell is idle.
    pub(crate) fn acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(busy)))
    }
}

impl Drop for ShellLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A command started on a remote shell.
pub struct Command {
    id: String,
    shell_id: String,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<CommandState>>,
    receiver: Option<JoinHandle<Result<i32>>>,
    exit_code: Option<i32>,
    signaled: bool,
    _lease: ShellLease,
}

impl Command {
    pub(crate) fn start(
        id: String,
        shell_id: String,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        stdout: OutputSink,
        stderr: OutputSink,
        lease: ShellLease,
    ) -> Self {
        let state = Arc::new(Mutex::new(CommandState::Running));
        let receiver = tokio::spawn(stream_output(
            Arc::clone(&transport),
            shell_id.clone(),
            id.clone(),
            retry,
            stdout,
            stderr,
            Arc::clone(&state),
        ));

        Self {
            id,
            shell_id,
            transport,
            state,
            receiver: Some(receiver),
            exit_code: None,
            signaled: false,
            _lease: lease,
        }
    }

    /// Command identifier assigned by the listener.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier of the shell the command runs in.
    pub fn shell_id(&self) -> &str {
        &self.shell_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CommandState {
        *self.state.lock()
    }

    /// Send bytes to the command's stdin; `eof` closes the stream.
    pub async fn send_input(&self, data: &[u8], eof: bool) -> Result<()> {
        if self.state() != CommandState::Running {
            return Err(Error::invalid_state(format!(
                "command {} is no longer running",
                self.id
            )));
        }
        self.transport
            .send_input(&self.shell_id, &self.id, data, eof)
            .await
    }

    /// Wait for the command to finish and return its exit code.
    ///
    /// Returns only after all output has been written to the sinks. Calling
    /// it again after success returns the same exit code.
    pub async fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        let receiver = self.receiver.take().ok_or_else(|| {
            Error::invalid_state(format!("output of command {} was already consumed", self.id))
        })?;

        let code = receiver.await.map_err(|e| {
            Error::invalid_state(format!("output task of command {} failed: {e}", self.id))
        })??;

        self.exit_code = Some(code);
        Ok(code)
    }

    /// Terminate the command.
    ///
    /// Only the first call reaches the listener. A fault caused by the
    /// command having already finished is not an error.
    pub async fn signal(&mut self) -> Result<()> {
        if self.signaled {
            return Ok(());
        }
        self.signaled = true;

        let completed = {
            let mut state = self.state.lock();
            if *state == CommandState::Running {
                *state = CommandState::Signaled;
            }
            *state == CommandState::Completed
        };

        match self
            .transport
            .signal_terminate(&self.shell_id, &self.id)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_protocol() && (completed || self.state() == CommandState::Completed) => {
                debug!(
                    shell_id = %self.shell_id,
                    command_id = %self.id,
                    error = %e,
                    "Ignoring signal fault for completed command"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("shell_id", &self.shell_id)
            .field("state", &self.state())
            .field("signaled", &self.signaled)
            .finish()
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
        if self.signaled {
            return;
        }
        // Dropped mid-flight (cancelled future or unwinding): terminate in the background.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                let shell_id = self.shell_id.clone();
                let command_id = self.id.clone();
                handle.spawn(async move {
                    if let Err(e) = transport.signal_terminate(&shell_id, &command_id).await {
                        debug!(shell_id = %shell_id, command_id = %command_id, error = %e, "Background terminate failed");
                    }
                });
            }
            Err(_) => warn!(
                shell_id = %self.shell_id,
                command_id = %self.id,
                "Command dropped outside a runtime; it was not terminated"
            ),
        }
    }
}

/// Poll the listener until the command is done, writing output as it arrives.
async fn stream_output(
    transport: Arc<dyn Transport>,
    shell_id: String,
    command_id: String,
    retry: RetryPolicy,
    mut stdout: OutputSink,
    mut stderr: OutputSink,
    state: Arc<Mutex<CommandState>>,
) -> Result<i32> {
    let mut failures = 0u32;

    loop {
        let output = match transport.receive_output(&shell_id, &command_id).await {
            Ok(output) => {
                failures = 0;
                output
            }
            Err(e) if e.is_transport() && retry.should_retry(failures + 1) => {
                let delay = retry.delay_for_attempt(failures);
                failures += 1;
                warn!(
                    shell_id = %shell_id,
                    command_id = %command_id,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Receive failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        deliver(&output, &mut stdout, &mut stderr)?;

        if output.done {
            stdout.flush().map_err(|e| Error::io("<stdout>", e))?;
            stderr.flush().map_err(|e| Error::io("<stderr>", e))?;
            *state.lock() = CommandState::Completed;

            let exit_code = output.exit_code.unwrap_or_default();
            trace!(shell_id = %shell_id, command_id = %command_id, exit_code, "Command completed");
            return Ok(exit_code);
        }

        if output.is_empty() {
            tokio::time::sleep(retry.initial_delay).await;
        }
    }
}

fn deliver(output: &ReceivedOutput, stdout: &mut OutputSink, stderr: &mut OutputSink) -> Result<()> {
    if !output.stdout.is_empty() {
        stdout
            .write_all(&output.stdout)
            .map_err(|e| Error::io("<stdout>", e))?;
    }
    if !output.stderr.is_empty() {
        stderr
            .write_all(&output.stderr)
            .map_err(|e| Error::io("<stderr>", e))?;
    }
    Ok(())
}
