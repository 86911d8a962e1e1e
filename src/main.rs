//! winrmcp - copy a directory tree to a Windows host over WinRM
//!
//! This is the entry point for the winrmcp CLI.

mod cli;

use anyhow::{bail, Context, Result};
use cli::Cli;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use winrmcp::prelude::*;

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    if cli.verbosity() >= 2 {
        eprintln!("winrmcp v{}", VERSION);
    }

    // Load configuration; command-line flags win
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    if config.client.host.trim().is_empty() {
        bail!("no host given; pass --host or set WINRMCP_HOST");
    }
    config
        .client
        .validate()
        .context("invalid connection settings")?;

    let http = build_http_client(&config.client).context("failed to build HTTP client")?;
    let client = Client::new(config.client.clone(), http)?.with_retry_policy(config.retry.clone());

    let pool = client
        .create_shells(config.copy.parallelism)
        .await
        .with_context(|| format!("failed to open {} shells", config.copy.parallelism))?;

    match run_session(&client, &pool, &config.copy).await {
        Ok(report) => {
            info!(
                files = report.files,
                bytes = report.bytes,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Run the copy, then close every shell whatever the outcome.
async fn run_session(
    client: &Client,
    pool: &ShellPool,
    copy: &CopyConfig,
) -> winrmcp::error::Result<CopyReport> {
    let result = copy_tree(client, pool, copy).await;

    if let Err(e) = pool.close_all().await {
        warn!(error = %e, "Some shells could not be closed");
    }
    result
}

/// Print the listener configuration, clear the remote root, copy, then list the result.
async fn copy_tree(
    client: &Client,
    pool: &ShellPool,
    copy: &CopyConfig,
) -> winrmcp::error::Result<CopyReport> {
    let shell = pool
        .first()
        .ok_or_else(|| Error::invalid_state("shell pool is empty"))?;
    let options = CommandOptions::new(true, false);
    let remote_root = copy.remote_root.trim_end_matches('\\');

    run_command_with_output(
        shell,
        "winrm get winrm/config",
        &[],
        options,
        Box::new(std::io::stdout()),
        Box::new(std::io::stderr()),
    )
    .await?;

    if copy.clean {
        run_command(
            shell,
            &format!("if exist \"{remote_root}\\\" rd /s /q \"{remote_root}\""),
            &[],
            options,
        )
        .await?;
    }

    let copier = FileTreeCopier::new(
        pool.shells(),
        remote_root,
        &copy.local_root,
        client.max_envelope_size(),
    )?;
    let report = copier.run().await?;
    println!(
        "Copied {} files ({}) in {:.2?}, {}/s",
        report.files,
        format_bytes(report.bytes as f64),
        report.elapsed,
        format_bytes(report.throughput())
    );

    run_command_with_output(
        shell,
        &format!("dir \"{remote_root}\""),
        &[],
        options,
        Box::new(std::io::stdout()),
        Box::new(std::io::stderr()),
    )
    .await?;

    if copy.local_root.join("README.md").is_file() {
        run_command_with_output(
            shell,
            &format!("type \"{remote_root}\\README.md\""),
            &[],
            options,
            Box::new(std::io::stdout()),
            Box::new(std::io::stderr()),
        )
        .await?;
    }

    Ok(report)
}
