//! Shared HTTP connection pool
//!
//! A [`ConnectionPool`] wraps one keep-alive `reqwest::Client` plus a
//! per-target socket ceiling. Requests beyond the ceiling wait for a free
//! slot instead of opening new connections, which keeps file descriptor
//! usage bounded when a daemon stops answering.
//!
//! The pool is cheap to clone; clones share the same client and the same
//! accounting. Construct one at start-up and pass it to every call.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default ceiling on concurrent sockets per target
pub const DEFAULT_MAX_SOCKETS: usize = 20;

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent sockets per `host:port`
    pub max_sockets: usize,
    /// Reuse connections between requests
    pub keep_alive: bool,
    /// How long an idle connection is kept, in seconds
    pub idle_timeout_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sockets: DEFAULT_MAX_SOCKETS,
            keep_alive: true,
            idle_timeout_secs: Some(90),
        }
    }
}

#[derive(Debug)]
struct PoolInner {
    http: reqwest::Client,
    config: PoolConfig,
    targets: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Keep-alive connection pool shared by every call.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool from `config`.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.max_sockets == 0 {
            return Err(Error::InvalidParameter(
                "max_sockets must be at least 1".to_string(),
            ));
        }

        let idle_per_host = if config.keep_alive { config.max_sockets } else { 0 };
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(idle_per_host)
            .pool_idle_timeout(config.idle_timeout_secs.map(Duration::from_secs))
            .build()?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                http,
                config,
                targets: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Create a pool with [`PoolConfig::default`] settings.
    pub fn with_defaults() -> Result<Self> {
        Self::new(PoolConfig::default())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Ceiling on concurrent sockets per target.
    pub fn max_sockets(&self) -> usize {
        self.inner.config.max_sockets
    }

    /// Number of free socket slots for `address` right now.
    pub fn available(&self, address: &str) -> usize {
        self.lock_targets()
            .get(address)
            .map_or(self.max_sockets(), |semaphore| semaphore.available_permits())
    }

    /// Whether `other` shares this pool's client and accounting.
    pub fn same_pool(&self, other: &ConnectionPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Wait for a socket slot for `address`. The slot is released when the
    /// returned permit is dropped.
    pub(crate) async fn checkout(&self, address: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = self.semaphore_for(address);
        if semaphore.available_permits() == 0 {
            tracing::debug!(
                "All {} sockets to {} in use, queueing request",
                self.max_sockets(),
                address
            );
        }
        semaphore
            .acquire_owned()
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    fn semaphore_for(&self, address: &str) -> Arc<Semaphore> {
        let mut targets = self.lock_targets();
        if let Some(semaphore) = targets.get(address) {
            return semaphore.clone();
        }

        // Permits and queued acquires hold a clone, so a count of one means
        // nobody is using or waiting on that target.
        targets.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);

        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_sockets));
        targets.insert(address.to_string(), semaphore.clone());
        semaphore
    }

    fn lock_targets(&self) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        self.inner
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn tracked_targets(&self) -> usize {
        self.lock_targets().len()
    }
}
