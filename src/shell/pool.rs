//! Client entry point and shell pools.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::Shell;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Transport};

/// Handle to one WinRM endpoint.
///
/// Cheap to share by reference; every shell created from it talks to the
/// same listener through the same connection pool.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    max_envelope_size: usize,
    retry: RetryPolicy,
}

impl Client {
    /// Create a client that talks SOAP over the given HTTP client.
    ///
    /// Fails with [`Error::Validation`] if the endpoint settings are invalid.
    pub fn new(config: ClientConfig, http: reqwest::Client) -> Result<Self> {
        let max_envelope_size = config.max_envelope_size;
        let transport = HttpTransport::new(config, http)?;
        Self::with_transport(Arc::new(transport), max_envelope_size)
    }

    /// Create a client over any transport implementation.
    pub fn with_transport(transport: Arc<dyn Transport>, max_envelope_size: usize) -> Result<Self> {
        if max_envelope_size == 0 {
            return Err(Error::validation("max envelope size must be positive"));
        }
        Ok(Self {
            transport,
            max_envelope_size,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the output polling policy used by commands.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum envelope size negotiated with the listener.
    pub fn max_envelope_size(&self) -> usize {
        self.max_envelope_size
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Open one remote shell.
    pub async fn create_shell(&self) -> Result<Shell> {
        let id = self.transport.create_shell().await?;
        debug!(shell_id = %id, endpoint = %self.endpoint(), "Shell created");
        Ok(Shell::new(id, Arc::clone(&self.transport), self.retry.clone()))
    }

    /// Open `count` shells, or none at all.
    ///
    /// If any creation fails, the shells opened so far are closed before the
    /// error is returned.
    pub async fn create_shells(&self, count: usize) -> Result<ShellPool> {
        if count == 0 {
            return Err(Error::validation("shell count must be at least 1"));
        }

        let mut shells = Vec::with_capacity(count);
        for index in 0..count {
            match self.create_shell().await {
                Ok(shell) => shells.push(shell),
                Err(e) => {
                    warn!(index, created = shells.len(), error = %e, "Shell creation failed, rolling back");
                    for shell in shells.iter().rev() {
                        if let Err(close_err) = shell.close().await {
                            warn!(shell_id = %shell.id(), error = %close_err, "Rollback close failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(count, endpoint = %self.endpoint(), "Opened shells");
        Ok(ShellPool { shells })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint())
            .field("max_envelope_size", &self.max_envelope_size)
            .finish()
    }
}

/// A set of open shells owned together.
#[derive(Debug)]
pub struct ShellPool {
    shells: Vec<Shell>,
}

impl ShellPool {
    /// All shells in creation order.
    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    /// Number of shells.
    pub fn len(&self) -> usize {
        self.shells.len()
    }

    /// True if the pool holds no shells.
    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    /// First shell, used for one-off commands.
    pub fn first(&self) -> Option<&Shell> {
        self.shells.first()
    }

    /// Close every shell concurrently.
    ///
    /// All shells are attempted even if some fail; the first failure is
    /// returned.
    pub async fn close_all(&self) -> Result<()> {
        let results = join_all(self.shells.iter().map(Shell::close)).await;

        let mut first_error = None;
        for (shell, result) in self.shells.iter().zip(results) {
            if let Err(e) = result {
                warn!(shell_id = %shell.id(), error = %e, "Failed to close shell");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
