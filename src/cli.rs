//! Command-line interface for winrmcp.

use clap::Parser;
use std::path::PathBuf;

use winrmcp::config::{Config, DEFAULT_WINRM_PORT};

/// winrmcp - copy a directory tree to a Windows host over WinRM
///
/// Opens several remote shells, prints the listener configuration, clears the
/// remote root, copies the local tree into it and lists the result.
#[derive(Parser, Debug, Clone)]
#[command(name = "winrmcp")]
#[command(version)]
#[command(about = "Copy a directory tree to a Windows host over WinRM", long_about = None)]
pub struct Cli {
    /// Target host name or address
    #[arg(long, env = "WINRMCP_HOST")]
    pub host: Option<String>,

    /// WinRM port (defaults to 5986, or 5985 with --http)
    #[arg(long)]
    pub port: Option<u16>,

    /// User name
    #[arg(short = 'u', long, env = "WINRMCP_USER")]
    pub user: Option<String>,

    /// Password
    #[arg(short = 'p', long, env = "WINRMCP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Number of shells used for the copy (at least 1)
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Local directory to copy
    #[arg(long)]
    pub local_root: Option<PathBuf>,

    /// Remote directory to copy into
    #[arg(long)]
    pub remote_root: Option<String>,

    /// Use plain HTTP instead of HTTPS
    #[arg(long)]
    pub http: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Keep existing remote content instead of removing the remote root first
    #[arg(long)]
    pub no_clean: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, env = "WINRMCP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the verbosity level
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }

    /// Apply command-line overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.client.host = host.clone();
        }
        if self.http {
            config.client.use_tls = false;
            config.client.port = DEFAULT_WINRM_PORT;
        }
        if let Some(port) = self.port {
            config.client.port = port;
        }
        if let Some(user) = &self.user {
            config.client.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.client.password = password.clone();
        }
        if let Some(parallelism) = self.parallelism {
            config.copy.parallelism = parallelism;
        }
        config.copy.parallelism = config.copy.parallelism.max(1);
        if let Some(local_root) = &self.local_root {
            config.copy.local_root = local_root.clone();
        }
        if let Some(remote_root) = &self.remote_root {
            config.copy.remote_root = remote_root.clone();
        }
        if self.insecure {
            config.client.insecure = true;
        }
        if self.no_clean {
            config.copy.clean = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides() {
        let cli = Cli::parse_from([
            "winrmcp",
            "--host",
            "10.1.2.3",
            "--http",
            "--parallelism",
            "0",
            "--remote-root",
            "D:\\w",
            "--no-clean",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.client.host, "10.1.2.3");
        assert!(!config.client.use_tls);
        assert_eq!(config.client.port, 5985);
        assert_eq!(config.copy.parallelism, 1);
        assert_eq!(config.copy.remote_root, "D:\\w");
        assert!(!config.copy.clean);
    }

    #[test]
    fn test_explicit_port_wins_over_http_default() {
        let cli = Cli::parse_from(["winrmcp", "--http", "--port", "8080", "-vv"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.client.port, 8080);
        assert_eq!(cli.verbosity(), 2);
    }
}
