//! # winrmcp - Parallel file tree copy over WinRM
//!
//! winrmcp drives remote shells on a Windows host through the WS-Management
//! (WinRM) protocol and uses them to copy a local directory tree onto that
//! host, spreading the work across several shells at once.
//!
//! ## Core Concepts
//!
//! - **Client**: one WinRM endpoint plus the HTTP connection pool used to reach it
//! - **Shell**: an open remote shell; runs at most one command at a time
//! - **Command**: a process started in a shell, with streamed stdout/stderr
//! - **Copier**: plans a tree copy as directory and chunk-write tasks and
//!   executes them with one worker per shell
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  FileTreeCopier (copy::*)                    │
//! │        plan: walk + chunking   execute: worker per shell     │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              Run-command helpers (run::*)                    │
//! │           start, wait, always signal                         │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │           Client / Shell / Command (shell::*)                │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │        Transport trait, HttpTransport (SOAP over HTTP)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use winrmcp::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut config = ClientConfig::new("winhost");
//!     config.user = "Administrator".into();
//!     config.password = "secret".into();
//!
//!     let http = build_http_client(&config)?;
//!     let client = Client::new(config, http)?;
//!     let pool = client.create_shells(4).await?;
//!
//!     let copier = FileTreeCopier::new(
//!         pool.shells(),
//!         "C:\\workspace",
//!         ".",
//!         client.max_envelope_size(),
//!     )?;
//!     let report = copier.run().await;
//!     pool.close_all().await?;
//!     println!("copied {} files", report?.files);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::{ClientConfig, Config, CopyConfig};
    pub use crate::copy::{CopyReport, FileTreeCopier};
    pub use crate::encoding::{
        format_bytes, format_powershell_command_line, powershell_single_quoted_literal,
        powershell_verbatim_literal,
    };
    pub use crate::error::{Error, Result};
    pub use crate::retry::RetryPolicy;
    pub use crate::run::{must_run_command, run_command, run_command_with_output};
    pub use crate::shell::{
        Client, Command, CommandState, OutputBuffer, OutputSink, Shell, ShellPool, ShellState,
    };
    pub use crate::transport::{build_http_client, CommandOptions, HttpTransport, Transport};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Configuration file, environment overrides and defaults.
pub mod config;

/// PowerShell quoting and `-EncodedCommand` encoding.
pub mod encoding;

/// Backoff policy for output polling.
pub mod retry;

// ============================================================================
// Remote Shells
// ============================================================================

/// WS-Management transport trait and its HTTP implementation.
pub mod transport;

/// Client, shells, shell pools and commands.
pub mod shell;

/// Run-to-completion helpers.
pub mod run;

// ============================================================================
// File Copy
// ============================================================================

/// Parallel file tree copier.
pub mod copy;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
