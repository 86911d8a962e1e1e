//! Transport layer between the shell state machine and the WinRM listener.
//!
//! A [`Transport`] performs one WS-Management shell operation per call and
//! reports the outcome with the crate's error taxonomy: [`Error::Transport`]
//! when the listener could not be reached, [`Error::Protocol`] when it
//! answered with a fault. It holds no per-shell state; shell and command
//! identifiers are passed in on every call.
//!
//! [`HttpTransport`] is the SOAP-over-HTTP implementation. Tests substitute
//! an in-memory implementation.
//!
//! [`Error::Transport`]: crate::error::Error::Transport
//! [`Error::Protocol`]: crate::error::Error::Protocol

pub mod http;

use async_trait::async_trait;

use crate::error::Result;

pub use http::{build_http_client, HttpTransport};

/// Options attached to a command creation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// `WINRS_CONSOLEMODE_STDIN`: hand stdin to the process in console mode.
    pub console_mode_stdin: bool,
    /// `WINRS_SKIP_CMD_SHELL`: run the command without wrapping it in `cmd.exe`.
    pub skip_cmd_shell: bool,
}

impl CommandOptions {
    /// Create options from the two WinRS flags.
    pub fn new(console_mode_stdin: bool, skip_cmd_shell: bool) -> Self {
        Self {
            console_mode_stdin,
            skip_cmd_shell,
        }
    }
}

/// Output delivered by one receive request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedOutput {
    /// Bytes that arrived on stdout, in order
    pub stdout: Vec<u8>,
    /// Bytes that arrived on stderr, in order
    pub stderr: Vec<u8>,
    /// True once the listener reports the command as done
    pub done: bool,
    /// Exit code, present when `done` is set
    pub exit_code: Option<i32>,
}

impl ReceivedOutput {
    /// A response carrying no output yet.
    pub fn pending() -> Self {
        Self::default()
    }

    /// True if neither stream carried bytes.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// The operations of the WS-Management remote shell protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable endpoint, used in log fields.
    fn endpoint(&self) -> &str;

    /// Create a remote shell and return its identifier.
    async fn create_shell(&self) -> Result<String>;

    /// Start `command` with `args` inside a shell and return the command identifier.
    async fn create_command(
        &self,
        shell_id: &str,
        command: &str,
        args: &[String],
        options: CommandOptions,
    ) -> Result<String>;

    /// Send bytes to a command's stdin; `eof` closes the stream.
    async fn send_input(
        &self,
        shell_id: &str,
        command_id: &str,
        data: &[u8],
        eof: bool,
    ) -> Result<()>;

    /// Poll for output of a running command.
    async fn receive_output(&self, shell_id: &str, command_id: &str) -> Result<ReceivedOutput>;

    /// Send the terminate signal to a command.
    async fn signal_terminate(&self, shell_id: &str, command_id: &str) -> Result<()>;

    /// Delete a shell, releasing its quota slot on the remote host.
    async fn delete_shell(&self, shell_id: &str) -> Result<()>;
}
