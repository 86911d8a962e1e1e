//! Planning phase of the tree copy.
//!
//! The local tree is walked once and turned into a flat list of
//! [`CopyTask`]s. Each task names at most one task it depends on; together
//! those links form a forest whose roots can run immediately:
//!
//! - a directory depends on its parent directory
//! - the first chunk of a file depends on the file's directory
//! - every later chunk of a file depends on the first chunk
//!
//! Chunks carry explicit offsets, so once the first chunk has created the
//! file the remaining chunks may run on any shell in any order.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::encoding::{command_line_len, encoded_script_len, powershell_verbatim_literal};
use crate::error::{Error, Result};

/// Bytes of every envelope reserved for the SOAP wrapper around the command line.
pub const ENVELOPE_OVERHEAD: usize = 8 * 1024;

/// Work performed by one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Create the remote directory if it does not exist
    CreateDir,
    /// Write `len` bytes read from `local_path` at `offset`
    WriteChunk {
        /// Source file
        local_path: PathBuf,
        /// Byte offset within the file
        offset: u64,
        /// Number of bytes in this chunk
        len: usize,
        /// True for the first chunk, which creates or truncates the file
        truncate: bool,
    },
}

/// One unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTask {
    /// Remote path the task writes to
    pub remote_path: String,
    /// What to do there
    pub kind: TaskKind,
    /// Index of the task that must complete first
    pub depends_on: Option<usize>,
}

impl CopyTask {
    /// True for directory-creation tasks.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, TaskKind::CreateDir)
    }
}

/// Ordered task list for one copy run.
#[derive(Debug, Clone, Default)]
pub struct WorkPlan {
    /// Tasks in walk order; dependencies always point backwards
    pub tasks: Vec<CopyTask>,
    /// Number of directories, including the root
    pub dirs: usize,
    /// Number of regular files
    pub files: usize,
    /// Total bytes of file content
    pub bytes: u64,
}

impl WorkPlan {
    /// Walk `local_root` and build the tasks that recreate it under `remote_root`.
    ///
    /// Entries are visited depth-first in file name order. Symbolic links are
    /// skipped; names that are not valid UTF-8 are rejected.
    pub fn build(local_root: &Path, remote_root: &str, max_envelope_size: usize) -> Result<Self> {
        let remote_root = remote_root.trim_end_matches(['\\', '/']);
        if remote_root.is_empty() {
            return Err(Error::validation("remote root must not be empty"));
        }

        let mut plan = WorkPlan::default();
        let mut dir_tasks: HashMap<PathBuf, usize> = HashMap::new();

        let walker = WalkDir::new(local_root)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                Error::io(path, e.into())
            })?;

            let relative = entry
                .path()
                .strip_prefix(local_root)
                .map_err(|_| {
                    Error::validation(format!(
                        "'{}' is outside the local root",
                        entry.path().display()
                    ))
                })?
                .to_path_buf();
            let remote_path = remote_path(remote_root, &relative)?;
            let parent = relative
                .parent()
                .and_then(|p| dir_tasks.get(p))
                .copied();

            let file_type = entry.file_type();
            if file_type.is_dir() {
                dir_tasks.insert(relative, plan.tasks.len());
                plan.dirs += 1;
                plan.tasks.push(CopyTask {
                    remote_path,
                    kind: TaskKind::CreateDir,
                    depends_on: parent,
                });
            } else if file_type.is_file() {
                let size = entry
                    .metadata()
                    .map_err(|e| Error::io(entry.path(), e.into()))?
                    .len();
                let capacity = chunk_capacity(max_envelope_size, &remote_path)?;
                plan.push_file(entry.path(), remote_path, size, capacity, parent);
            } else {
                debug!(path = %entry.path().display(), "Skipping non-regular entry");
            }
        }

        if plan.dirs == 0 {
            return Err(Error::validation(format!(
                "local root '{}' is not a directory",
                local_root.display()
            )));
        }

        trace!(
            tasks = plan.tasks.len(),
            dirs = plan.dirs,
            files = plan.files,
            bytes = plan.bytes,
            "Copy plan built"
        );
        Ok(plan)
    }

    /// Number of chunk-write tasks.
    pub fn chunks(&self) -> usize {
        self.tasks.len() - self.dirs
    }

    fn push_file(
        &mut self,
        local_path: &Path,
        remote_path: String,
        size: u64,
        capacity: usize,
        parent: Option<usize>,
    ) {
        self.files += 1;
        self.bytes += size;

        let first = self.tasks.len();
        let mut offset = 0u64;
        loop {
            let len = usize::try_from(size - offset)
                .unwrap_or(usize::MAX)
                .min(capacity);
            self.tasks.push(CopyTask {
                remote_path: remote_path.clone(),
                kind: TaskKind::WriteChunk {
                    local_path: local_path.to_path_buf(),
                    offset,
                    len,
                    truncate: offset == 0,
                },
                depends_on: if offset == 0 { parent } else { Some(first) },
            });
            offset += len as u64;
            if offset >= size {
                break;
            }
        }
    }
}

/// Joins `relative` onto `remote_root` with backslash separators.
fn remote_path(remote_root: &str, relative: &Path) -> Result<String> {
    let mut path = remote_root.to_string();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let name = name.to_str().ok_or_else(|| {
            Error::validation(format!(
                "'{}' is not valid UTF-8",
                relative.display()
            ))
        })?;
        path.push('\\');
        path.push_str(name);
    }
    Ok(path)
}

/// Largest raw chunk, in bytes, whose write command for `remote_path`
/// fits inside `max_envelope_size` minus [`ENVELOPE_OVERHEAD`].
///
/// The payload is inflated twice on the way out: base64 inside the script,
/// then UTF-16LE widening and base64 again for `-EncodedCommand`.
pub fn chunk_capacity(max_envelope_size: usize, remote_path: &str) -> Result<usize> {
    let too_small = || {
        Error::validation(format!(
            "max envelope size {max_envelope_size} is too small to write '{remote_path}'"
        ))
    };

    let encoded_budget = max_envelope_size
        .checked_sub(ENVELOPE_OVERHEAD)
        .and_then(|b| b.checked_sub(command_line_len(0)))
        .ok_or_else(too_small)?;
    let script_units = encoded_budget / 4 * 3 / 2;
    let fixed_units = chunk_script(remote_path, "", u64::MAX, false)
        .encode_utf16()
        .count();
    let payload_units = script_units.checked_sub(fixed_units).ok_or_else(too_small)?;

    let capacity = payload_units / 4 * 3;
    if capacity == 0 {
        return Err(too_small());
    }
    debug_assert!(
        command_line_len(encoded_script_len(fixed_units + capacity / 3 * 4))
            <= max_envelope_size - ENVELOPE_OVERHEAD
    );
    Ok(capacity)
}

/// Script that creates `remote_path` as a directory unless it already exists.
pub fn dir_script(remote_path: &str) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'\n\
         $path = {}\n\
         if (-not (Test-Path -LiteralPath $path -PathType Container)) {{\n\
         \x20 $null = New-Item -ItemType Directory -Path $path -Force\n\
         }}\n",
        powershell_verbatim_literal(remote_path)
    )
}

/// Script that writes the base64 `payload` into `remote_path` at `offset`.
///
/// With `truncate` the file is created or truncated first; otherwise it is
/// opened in place.
pub fn chunk_script(remote_path: &str, payload: &str, offset: u64, truncate: bool) -> String {
    let mode = if truncate { "Create" } else { "OpenOrCreate" };
    format!(
        "$ErrorActionPreference = 'Stop'\n\
         $path = {}\n\
         $bytes = [System.Convert]::FromBase64String({})\n\
         $stream = [System.IO.File]::Open($path, [System.IO.FileMode]::{mode}, [System.IO.FileAccess]::Write)\n\
         try {{\n\
         \x20 $null = $stream.Seek({offset}, [System.IO.SeekOrigin]::Begin)\n\
         \x20 $stream.Write($bytes, 0, $bytes.Length)\n\
         }} finally {{\n\
         \x20 $stream.Dispose()\n\
         }}\n",
        powershell_verbatim_literal(remote_path),
        powershell_verbatim_literal(payload),
    )
}
