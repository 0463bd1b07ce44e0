//! Staging queue: a lease-based buffer sitting between the write path and the durable broker.
//!
//! [`StagingQueue`] holds the projection-specific logic (path trimming, error policy) and
//! delegates storage to a [`StagingBackend`]. Entries are read through a timed lease; an entry
//! that is not removed before its lease runs out becomes visible again, which is how a crashed
//! drainer's work gets picked up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use ted_common::{process, DocumentPath};

use crate::{QueueError, Result};

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Default visibility window for a peeked entry.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

/// An entry read from the staging queue under a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTask {
    /// Handle for [`StagingQueue::remove_pending`]; valid for this lease only
    pub lease_id: String,
    pub message_id: String,
    /// Serialized path to project
    pub payload: String,
    /// How many times the entry has been leased, this lease included
    pub receive_count: u32,
}

/// Point-in-time counts for a staging queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingMetrics {
    /// Entries a drainer could lease right now
    pub visible: u64,
    /// Entries currently held under a lease
    pub leased: u64,
}

/// Storage behind a staging queue.
#[async_trait]
pub trait StagingBackend: Send + Sync {
    /// Queue name
    fn identifier(&self) -> &str;

    /// Create the queue; fails with [`QueueError::QueueExists`] if it is already there.
    async fn create_queue(&self) -> Result<()>;

    /// Append a payload, returning its message id.
    async fn send(&self, payload: &str) -> Result<String>;

    /// Lease the oldest visible entry for `lease`.
    async fn receive(&self, lease: Duration) -> Result<Option<StagedTask>>;

    /// Delete the entry held under `lease_id`. Returns false when the lease is unknown or has
    /// been superseded by a newer one.
    async fn delete(&self, lease_id: &str) -> Result<bool>;

    async fn metrics(&self) -> Result<StagingMetrics>;
}

/// Client for the projection staging queue.
pub struct StagingQueue {
    backend: Arc<dyn StagingBackend>,
    lease: Duration,
}

impl StagingQueue {
    pub fn new(backend: Arc<dyn StagingBackend>) -> Self {
        Self {
            backend,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn identifier(&self) -> &str {
        self.backend.identifier()
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Ensure the queue exists. Safe to call any number of times.
    pub async fn setup(&self) -> Result<()> {
        match self.backend.create_queue().await {
            Ok(()) => {
                info!(queue = %self.identifier(), "Staging queue created");
                Ok(())
            }
            Err(QueueError::QueueExists(_)) => {
                info!(queue = %self.identifier(), "Staging queue already created");
                Ok(())
            }
            Err(QueueError::Provisioning(reason)) => Err(QueueError::Provisioning(reason)),
            Err(e) => Err(QueueError::Provisioning(e.to_string())),
        }
    }

    /// Stage projection work for a written path.
    ///
    /// A document address is staged as its parent collection path, a collection address as
    /// is. Structural errors are returned before anything reaches the backend.
    pub async fn push_pending(&self, path: &str) -> Result<String> {
        let path = process(path)?;
        self.push_path(&path).await
    }

    /// Same as [`push_pending`](Self::push_pending) for an already decoded path.
    pub async fn push_path(&self, path: &DocumentPath) -> Result<String> {
        let target = path.staging_target().to_string();
        let message_id = self.backend.send(&target).await?;

        debug!(
            queue = %self.identifier(),
            message_id = %message_id,
            written = %path,
            staged = %target,
            "Projection task staged"
        );
        Ok(message_id)
    }

    /// Lease the next visible entry.
    ///
    /// Backend failures are logged and reported as an empty queue so polling loops keep going.
    pub async fn peek_pending(&self) -> Option<StagedTask> {
        match self.backend.receive(self.lease).await {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    queue = %self.identifier(),
                    error = %QueueError::Transient(e.to_string()),
                    "Failed to peek staging queue, treating as empty"
                );
                None
            }
        }
    }

    /// Permanently delete a leased entry.
    pub async fn remove_pending(&self, lease_id: &str) -> Result<()> {
        if self.backend.delete(lease_id).await? {
            debug!(queue = %self.identifier(), lease_id = %lease_id, "Staged task removed");
            Ok(())
        } else {
            warn!(
                queue = %self.identifier(),
                lease_id = %lease_id,
                "Remove failed - lease expired or entry already deleted"
            );
            Err(QueueError::NotFound(lease_id.to_string()))
        }
    }

    pub async fn metrics(&self) -> Result<StagingMetrics> {
        self.backend.metrics().await
    }
}

/// Lease ids carry the message id so a delete never needs a lookup table.
pub(crate) fn lease_id(message_id: &str, receipt: &str) -> String {
    format!("{}:{}", message_id, receipt)
}

pub(crate) fn split_lease_id(lease_id: &str) -> Option<(&str, &str)> {
    lease_id.split_once(':')
}
