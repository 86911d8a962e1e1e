//! Shared test utilities for the winrmcp test suite.
//!
//! This module provides:
//! - `FakeTransport`, an in-memory WinRM listener that runs the copier's
//!   PowerShell scripts against a virtual filesystem, reading literals by
//!   PowerShell's own single-quote rules
//! - Fixture helpers for building local trees
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use parking_lot::{Mutex, RwLock};

use winrmcp::encoding::{decode_script, parse_powershell_verbatim_literal, POWERSHELL};
use winrmcp::error::{Error, Result};
use winrmcp::transport::{CommandOptions, ReceivedOutput, Transport};

// ============================================================================
// Virtual Filesystem
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Dir,
    File(Vec<u8>),
}

/// Result a plain (non-script) command produces.
#[derive(Debug, Clone, Default)]
pub struct CannedResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CannedResult {
    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    pub fn output(stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug)]
struct CommandRecord {
    shell_id: String,
    pending: VecDeque<ReceivedOutput>,
    hanging: bool,
    signaled: bool,
    done_delivered: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    open_shells: HashSet<String>,
    active: HashMap<String, String>,
    commands: HashMap<String, CommandRecord>,
    fs: BTreeMap<String, Entry>,
    commands_per_shell: HashMap<String, usize>,
    overlap_violations: usize,
    signals: Vec<String>,
    deleted_shells: Vec<String>,
    executed_paths: Vec<String>,
    max_command_line: usize,
    stdin: Vec<u8>,
}

// ============================================================================
// Fake Transport
// ============================================================================

/// In-memory stand-in for a WinRM listener.
pub struct FakeTransport {
    state: Mutex<FakeState>,
    next_id: AtomicUsize,
    shells_created: AtomicUsize,
    latency: Duration,
    fail_shell_creation_at: Option<usize>,
    failing_paths: RwLock<HashSet<String>>,
    failing_deletes: RwLock<HashSet<String>>,
    canned: RwLock<HashMap<String, CannedResult>>,
    receive_failures: AtomicU32,
    failing_signals: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicUsize::new(0),
            shells_created: AtomicUsize::new(0),
            latency: Duration::from_millis(1),
            fail_shell_creation_at: None,
            failing_paths: RwLock::new(HashSet::new()),
            failing_deletes: RwLock::new(HashSet::new()),
            canned: RwLock::new(HashMap::new()),
            receive_failures: AtomicU32::new(0),
            failing_signals: AtomicBool::new(false),
        }
    }

    /// The `index`-th shell creation (0-based) fails with a transport error.
    pub fn failing_shell_creation_at(mut self, index: usize) -> Self {
        self.fail_shell_creation_at = Some(index);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Scripts targeting `path` exit with code 1.
    pub fn fail_path(&self, path: &str) {
        self.failing_paths.write().insert(path.to_string());
    }

    /// Deleting `shell_id` returns a fault.
    pub fn fail_delete(&self, shell_id: &str) {
        self.failing_deletes.write().insert(shell_id.to_string());
    }

    /// Result for a plain command, keyed by the full command text.
    pub fn set_result(&self, command: &str, result: CannedResult) {
        self.canned.write().insert(command.to_string(), result);
    }

    /// The next `count` receive requests fail at the transport level.
    pub fn fail_receives(&self, count: u32) {
        self.receive_failures.store(count, Ordering::SeqCst);
    }

    /// Terminate signals fail at the transport level.
    pub fn fail_signals(&self, failing: bool) {
        self.failing_signals.store(failing, Ordering::SeqCst);
    }

    /// Pre-create a remote directory.
    pub fn mkdir(&self, path: &str) {
        self.state.lock().fs.insert(path.to_string(), Entry::Dir);
    }

    pub fn entry(&self, path: &str) -> Option<Entry> {
        self.state.lock().fs.get(path).cloned()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.entry(path) {
            Some(Entry::File(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.entry(path), Some(Entry::Dir))
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().fs.keys().cloned().collect()
    }

    pub fn shells_created(&self) -> usize {
        self.shells_created.load(Ordering::SeqCst)
    }

    pub fn open_shells(&self) -> usize {
        self.state.lock().open_shells.len()
    }

    pub fn deleted_shells(&self) -> Vec<String> {
        self.state.lock().deleted_shells.clone()
    }

    pub fn commands_for(&self, shell_id: &str) -> usize {
        self.state
            .lock()
            .commands_per_shell
            .get(shell_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn overlap_violations(&self) -> usize {
        self.state.lock().overlap_violations
    }

    pub fn signal_count(&self) -> usize {
        self.state.lock().signals.len()
    }

    /// Remote paths touched by scripts, in execution order.
    pub fn executed_paths(&self) -> Vec<String> {
        self.state.lock().executed_paths.clone()
    }

    /// Longest command line seen, interpreter and separators included.
    pub fn max_command_line(&self) -> usize {
        self.state.lock().max_command_line
    }

    pub fn stdin(&self) -> Vec<u8> {
        self.state.lock().stdin.clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn run(&self, state: &mut FakeState, command: &str, args: &[String]) -> CannedResult {
        if command == POWERSHELL {
            let Some(encoded) = args.last() else {
                return failure("missing -EncodedCommand payload");
            };
            match decode_script(encoded) {
                Ok(script) => self.run_script(state, &script),
                Err(e) => failure(&e.to_string()),
            }
        } else {
            self.canned.read().get(command).cloned().unwrap_or_default()
        }
    }

    fn run_script(&self, state: &mut FakeState, script: &str) -> CannedResult {
        let Some(path) = script_value(script, "$path = ").and_then(parse_powershell_verbatim_literal) else {
            return failure("script has no $path");
        };
        state.executed_paths.push(path.clone());

        if self.failing_paths.read().contains(&path) {
            return failure("injected failure");
        }
        if !parent_exists(&state.fs, &path) {
            return failure(&format!("parent of {path} does not exist"));
        }

        if script.contains("New-Item -ItemType Directory") {
            return match state.fs.get(&path) {
                Some(Entry::File(_)) => failure("a file exists at that path"),
                _ => {
                    state.fs.insert(path, Entry::Dir);
                    CannedResult::default()
                }
            };
        }

        let payload = script_value(script, "$bytes = [System.Convert]::FromBase64String(")
            .and_then(|v| v.strip_suffix(')'))
            .and_then(parse_powershell_verbatim_literal)
            .and_then(|b64| BASE64_STANDARD.decode(b64).ok());
        let offset = script_value(script, "$null = $stream.Seek(")
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<usize>().ok());
        let (Some(payload), Some(offset)) = (payload, offset) else {
            return failure("malformed chunk script");
        };
        let truncate = script.contains("[System.IO.FileMode]::Create,");

        let mut content = match state.fs.get(&path) {
            Some(Entry::Dir) => return failure("a directory exists at that path"),
            Some(Entry::File(existing)) if !truncate => existing.clone(),
            _ => Vec::new(),
        };
        if content.len() < offset + payload.len() {
            content.resize(offset + payload.len(), 0);
        }
        content[offset..offset + payload.len()].copy_from_slice(&payload);
        state.fs.insert(path, Entry::File(content));
        CannedResult::default()
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn endpoint(&self) -> &str {
        "fake://listener/wsman"
    }

    async fn create_shell(&self) -> Result<String> {
        let index = self.shells_created.fetch_add(1, Ordering::SeqCst);
        if self.fail_shell_creation_at == Some(index) {
            return Err(Error::transport("connection refused"));
        }
        let id = self.next_id("shell");
        self.state.lock().open_shells.insert(id.clone());
        Ok(id)
    }

    async fn create_command(
        &self,
        shell_id: &str,
        command: &str,
        args: &[String],
        _options: CommandOptions,
    ) -> Result<String> {
        tokio::time::sleep(self.latency).await;

        let mut state = self.state.lock();
        if !state.open_shells.contains(shell_id) {
            return Err(Error::protocol(None, format!("unknown shell {shell_id}")));
        }
        if state.active.contains_key(shell_id) {
            state.overlap_violations += 1;
        }

        let line_len = command.len() + args.iter().map(|a| a.len() + 1).sum::<usize>();
        state.max_command_line = state.max_command_line.max(line_len);
        *state.commands_per_shell.entry(shell_id.to_string()).or_default() += 1;

        let id = self.next_id("command");
        state.active.insert(shell_id.to_string(), id.clone());

        let hanging = command == "hang";
        let pending = if hanging {
            VecDeque::new()
        } else {
            let result = self.run(&mut state, command, args);
            split_output(result)
        };
        state.commands.insert(
            id.clone(),
            CommandRecord {
                shell_id: shell_id.to_string(),
                pending,
                hanging,
                signaled: false,
                done_delivered: false,
            },
        );
        Ok(id)
    }

    async fn send_input(
        &self,
        _shell_id: &str,
        command_id: &str,
        data: &[u8],
        _eof: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if !state.commands.contains_key(command_id) {
            return Err(Error::protocol(None, format!("unknown command {command_id}")));
        }
        state.stdin.extend_from_slice(data);
        Ok(())
    }

    async fn receive_output(&self, _shell_id: &str, command_id: &str) -> Result<ReceivedOutput> {
        if self
            .receive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::transport("connection reset by peer"));
        }

        let mut state = self.state.lock();
        let record = state
            .commands
            .get_mut(command_id)
            .ok_or_else(|| Error::protocol(None, format!("unknown command {command_id}")))?;

        if record.hanging {
            if record.signaled {
                record.done_delivered = true;
                return Ok(ReceivedOutput {
                    done: true,
                    exit_code: Some(1),
                    ..Default::default()
                });
            }
            return Ok(ReceivedOutput::pending());
        }

        let output = record.pending.pop_front().unwrap_or(ReceivedOutput {
            done: true,
            exit_code: Some(0),
            ..Default::default()
        });
        if output.done {
            record.done_delivered = true;
        }
        Ok(output)
    }

    async fn signal_terminate(&self, shell_id: &str, command_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.signals.push(command_id.to_string());
        if self.failing_signals.load(Ordering::SeqCst) {
            return Err(Error::transport("connection reset"));
        }
        if state.active.get(shell_id).map(String::as_str) == Some(command_id) {
            state.active.remove(shell_id);
        }

        let record = state
            .commands
            .get_mut(command_id)
            .ok_or_else(|| Error::protocol(None, format!("unknown command {command_id}")))?;
        record.signaled = true;
        if record.done_delivered {
            // The listener has already forgotten finished commands.
            return Err(Error::protocol(
                Some("2150858843".to_string()),
                "The request for the Windows Remote Shell with ShellId failed because the shell was not found",
            ));
        }
        Ok(())
    }

    async fn delete_shell(&self, shell_id: &str) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        if self.failing_deletes.read().contains(shell_id) {
            return Err(Error::protocol(None, format!("cannot delete {shell_id}")));
        }
        let mut state = self.state.lock();
        if !state.open_shells.remove(shell_id) {
            return Err(Error::protocol(None, format!("unknown shell {shell_id}")));
        }
        state.deleted_shells.push(shell_id.to_string());
        state.commands.retain(|_, c| c.shell_id != shell_id);
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn failure(message: &str) -> CannedResult {
    CannedResult {
        exit_code: 1,
        stdout: Vec::new(),
        stderr: message.as_bytes().to_vec(),
    }
}

/// Value following `prefix` on the first script line that starts with it.
fn script_value<'a>(script: &'a str, prefix: &str) -> Option<&'a str> {
    script
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(prefix))
}

fn parent_exists(fs: &BTreeMap<String, Entry>, path: &str) -> bool {
    match path.rsplit_once('\\') {
        Some((parent, _)) if parent.ends_with(':') && !parent.contains('\\') => true,
        Some((parent, _)) => matches!(fs.get(parent), Some(Entry::Dir)),
        None => false,
    }
}

/// Deliver output over several receives: half of stdout, the rest plus stderr, then completion.
fn split_output(result: CannedResult) -> VecDeque<ReceivedOutput> {
    let mid = result.stdout.len() / 2;
    let mut pending = VecDeque::new();
    if mid > 0 {
        pending.push_back(ReceivedOutput {
            stdout: result.stdout[..mid].to_vec(),
            ..Default::default()
        });
    }
    if result.stdout.len() > mid || !result.stderr.is_empty() {
        pending.push_back(ReceivedOutput {
            stdout: result.stdout[mid..].to_vec(),
            stderr: result.stderr.clone(),
            ..Default::default()
        });
    }
    pending.push_back(ReceivedOutput {
        done: true,
        exit_code: Some(result.exit_code),
        ..Default::default()
    });
    pending
}

// ============================================================================
// Fixtures
// ============================================================================

/// Write a file under `root`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Deterministic non-repeating test content.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 251) as u8).collect()
}
