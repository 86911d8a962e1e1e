//! Run-to-completion helpers on top of [`Shell::start_command`].
//!
//! These guarantee the remote command is signaled once it is no longer
//! needed, whether waiting succeeded, failed, or the future was dropped.

use tracing::debug;

use crate::error::{Error, Result};
use crate::shell::{OutputBuffer, OutputSink, Shell};
use crate::transport::CommandOptions;

/// Arguments longer than this are elided from error messages.
const MAX_DISPLAYED_ARG_LEN: usize = 64;

/// Run a command to completion, discarding its output.
///
/// A non-zero exit code is reported as [`Error::CommandFailed`].
pub async fn run_command(
    shell: &Shell,
    command: &str,
    args: &[String],
    options: CommandOptions,
) -> Result<()> {
    let stdout = OutputBuffer::new();
    let stderr = OutputBuffer::new();
    let result = run_command_with_output(
        shell,
        command,
        args,
        options,
        stdout.sink(),
        stderr.sink(),
    )
    .await;

    if result.is_err() {
        let stderr = stderr.to_string_lossy();
        if !stderr.trim().is_empty() {
            debug!(shell_id = %shell.id(), command = %command, stderr = %stderr.trim(), "Command stderr");
        }
    }
    result
}

/// Run a command to completion, streaming its output into the given sinks.
///
/// The command is signaled afterwards; a failed signal is only logged, so
/// the result reflects the wait and the exit code alone.
pub async fn run_command_with_output(
    shell: &Shell,
    command: &str,
    args: &[String],
    options: CommandOptions,
    stdout: OutputSink,
    stderr: OutputSink,
) -> Result<()> {
    let mut cmd = shell
        .start_command(command, args, options, stdout, stderr)
        .await?;

    let waited = cmd.wait().await;
    if let Err(e) = cmd.signal().await {
        debug!(shell_id = %shell.id(), command = %command, error = %e, "Failed to signal finished command");
    }

    let exit_code = waited?;

    if exit_code != 0 {
        return Err(Error::CommandFailed {
            command: display_command(command, args),
            exit_code,
        });
    }
    Ok(())
}

/// Like [`run_command`], for bootstrap commands the caller cannot recover from.
///
/// # Panics
///
/// Panics if the command cannot be run or exits with a non-zero code.
pub async fn must_run_command(
    shell: &Shell,
    command: &str,
    args: &[String],
    options: CommandOptions,
) {
    if let Err(e) = run_command(shell, command, args, options).await {
        panic!(
            "error while running command {}: {e}",
            display_command(command, args)
        );
    }
}

/// Command line as shown in errors, with long arguments such as encoded scripts elided.
pub(crate) fn display_command(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        if arg.len() > MAX_DISPLAYED_ARG_LEN {
            line.push_str(&format!("<{} chars>", arg.len()));
        } else {
            line.push_str(arg);
        }
    }
    line
}
