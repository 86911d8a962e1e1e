//! Parallel copy of a local directory tree onto a remote host.
//!
//! [`FileTreeCopier::run`] plans the copy (see [`plan`]) and then executes it
//! with one worker per shell. Every task is a small PowerShell script run to
//! completion on whichever shell is free: directories are created before
//! anything inside them, files are written in chunks sized to fit a single
//! envelope.
//!
//! The first failing task stops the run. Tasks already in flight finish,
//! nothing new is started, and the error is returned with the remote path of
//! the failing task. Whatever was written stays on the remote host.

pub mod plan;
mod queue;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use futures::future::join_all;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::encoding::{format_bytes, format_powershell_command_line};
use crate::error::{Error, Result};
use crate::run::run_command;
use crate::shell::Shell;
use crate::transport::CommandOptions;

pub use plan::{chunk_capacity, CopyTask, TaskKind, WorkPlan, ENVELOPE_OVERHEAD};
use queue::TaskQueue;

/// Summary of a completed copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyReport {
    /// Directories created, including the remote root
    pub dirs: usize,
    /// Files written
    pub files: usize,
    /// Chunk writes performed
    pub chunks: usize,
    /// File content bytes copied
    pub bytes: u64,
    /// Tasks executed by each shell, by shell id
    pub tasks_per_shell: Vec<(String, usize)>,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

impl CopyReport {
    /// Copied bytes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            self.bytes as f64
        }
    }
}

/// Copies a local directory tree to a remote directory over a set of shells.
#[derive(Debug)]
pub struct FileTreeCopier<'a> {
    shells: &'a [Shell],
    remote_root: String,
    local_root: PathBuf,
    max_envelope_size: usize,
}

impl<'a> FileTreeCopier<'a> {
    /// Create a copier.
    ///
    /// `local_root` must be a readable directory and at least one shell is
    /// required. `max_envelope_size` must match what the client announces to
    /// the listener.
    pub fn new(
        shells: &'a [Shell],
        remote_root: impl Into<String>,
        local_root: impl Into<PathBuf>,
        max_envelope_size: usize,
    ) -> Result<Self> {
        let remote_root = remote_root.into();
        let local_root = local_root.into();

        if shells.is_empty() {
            return Err(Error::validation("at least one shell is required"));
        }
        if remote_root.trim().is_empty() {
            return Err(Error::validation("remote root must not be empty"));
        }
        let metadata = std::fs::metadata(&local_root).map_err(|e| Error::io(&local_root, e))?;
        if !metadata.is_dir() {
            return Err(Error::validation(format!(
                "local root '{}' is not a directory",
                local_root.display()
            )));
        }
        std::fs::read_dir(&local_root).map_err(|e| Error::io(&local_root, e))?;

        Ok(Self {
            shells,
            remote_root,
            local_root,
            max_envelope_size,
        })
    }

    /// Copy the tree and report what was done.
    pub async fn run(&self) -> Result<CopyReport> {
        let started = Instant::now();
        let plan = self.plan().await?;
        info!(
            local_root = %self.local_root.display(),
            remote_root = %self.remote_root,
            tasks = plan.tasks.len(),
            files = plan.files,
            bytes = plan.bytes,
            shells = self.shells.len(),
            "Starting copy"
        );

        let queue = TaskQueue::new(&plan.tasks);
        let first_error = Mutex::new(None);
        let counts = join_all(
            self.shells
                .iter()
                .map(|shell| self.worker(shell, &plan, &queue, &first_error)),
        )
        .await;

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        if queue.remaining() > 0 {
            return Err(Error::invalid_state(format!(
                "{} copy tasks were never released",
                queue.remaining()
            )));
        }

        let report = CopyReport {
            dirs: plan.dirs,
            files: plan.files,
            chunks: plan.chunks(),
            bytes: plan.bytes,
            tasks_per_shell: self
                .shells
                .iter()
                .map(|s| s.id().to_string())
                .zip(counts)
                .collect(),
            elapsed: started.elapsed(),
        };
        info!(
            files = report.files,
            dirs = report.dirs,
            chunks = report.chunks,
            copied = %format_bytes(report.bytes as f64),
            elapsed_ms = report.elapsed.as_millis() as u64,
            throughput = %format!("{}/s", format_bytes(report.throughput())),
            "Copy finished"
        );
        Ok(report)
    }

    async fn plan(&self) -> Result<WorkPlan> {
        let local_root = self.local_root.clone();
        let remote_root = self.remote_root.clone();
        let max_envelope_size = self.max_envelope_size;
        tokio::task::spawn_blocking(move || {
            WorkPlan::build(&local_root, &remote_root, max_envelope_size)
        })
        .await
        .map_err(|e| Error::invalid_state(format!("planning task failed: {e}")))?
    }

    async fn worker(
        &self,
        shell: &Shell,
        plan: &WorkPlan,
        queue: &TaskQueue,
        first_error: &Mutex<Option<Error>>,
    ) -> usize {
        let mut executed = 0;
        while let Some(index) = queue.next().await {
            let task = &plan.tasks[index];
            match execute(shell, task).await {
                Ok(()) => {
                    executed += 1;
                    queue.complete(index);
                }
                Err(e) => {
                    let e = Error::copy(task.remote_path.clone(), e);
                    queue.cancel();
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        warn!(shell_id = %shell.id(), error = %e, "Copy task failed, cancelling");
                        *slot = Some(e);
                    } else {
                        debug!(shell_id = %shell.id(), error = %e, "Discarding failure after cancellation");
                    }
                    break;
                }
            }
        }
        executed
    }
}

async fn execute(shell: &Shell, task: &CopyTask) -> Result<()> {
    let script = match &task.kind {
        TaskKind::CreateDir => {
            debug!(shell_id = %shell.id(), path = %task.remote_path, "Creating directory");
            plan::dir_script(&task.remote_path)
        }
        TaskKind::WriteChunk {
            local_path,
            offset,
            len,
            truncate,
        } => {
            let bytes = read_chunk(local_path, *offset, *len).await?;
            debug!(
                shell_id = %shell.id(),
                path = %task.remote_path,
                offset,
                bytes = len,
                "Writing chunk"
            );
            plan::chunk_script(
                &task.remote_path,
                &BASE64_STANDARD.encode(&bytes),
                *offset,
                *truncate,
            )
        }
    };

    let (command, args) = format_powershell_command_line(&script);
    run_command(shell, &command, &args, CommandOptions::new(false, true)).await
}

async fn read_chunk(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    if len == 0 {
        return Ok(buffer);
    }
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .map_err(|e| Error::io(path, e))?;
    file.read_exact(&mut buffer)
        .await
        .map_err(|e| Error::io(path, e))?;
    Ok(buffer)
}
