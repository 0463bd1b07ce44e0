//! Staging Drainer
//!
//! Moves staged projection tasks into the durable broker:
//! - Leases the next visible staging entry
//! - Publishes its path to the broker
//! - Removes the entry only once the broker accepted it
//!
//! A failed publish leaves the entry leased; it becomes visible again when the lease runs out,
//! so a task is never lost between the two queues (it may be published twice). Losing the broker
//! connection ends the drainer with an error instead of retrying forever.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ted_queue::{StagingQueue, TaskBroker};

use crate::{ProjectionError, Result};

/// Drainer configuration
#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Pause between passes
    pub poll_interval: Duration,
    /// Entries handed over per pass at most (0 is treated as 1)
    pub batch_size: u32,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

pub struct StagingDrainer {
    config: DrainerConfig,
    staging: Arc<StagingQueue>,
    broker: Arc<dyn TaskBroker>,
    forwarded: AtomicU64,
    running: AtomicBool,
}

impl StagingDrainer {
    pub fn new(
        config: DrainerConfig,
        staging: Arc<StagingQueue>,
        broker: Arc<dyn TaskBroker>,
    ) -> Self {
        Self {
            config,
            staging,
            broker,
            forwarded: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    /// Total entries handed to the broker since creation
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn batch_limit(&self) -> usize {
        self.config.batch_size.max(1) as usize
    }

    /// One pass over the staging queue. Returns how many entries were handed to the broker.
    ///
    /// Publish failures end the pass and are retried on a later one, except a lost broker
    /// connection, which is returned as an error.
    pub async fn drain_once(&self) -> Result<usize> {
        let limit = self.batch_limit();
        let mut count = 0;
        let mut fault = None;

        while count < limit {
            let Some(task) = self.staging.peek_pending().await else {
                break;
            };

            if let Err(e) = self.broker.push_task(&task.payload).await {
                error!(
                    task = %task.payload,
                    message_id = %task.message_id,
                    error = %e,
                    "Failed to hand staged task to broker, will retry after lease expiry"
                );
                if e.is_connection_fault() {
                    fault = Some(e);
                }
                break;
            }

            if let Err(e) = self.staging.remove_pending(&task.lease_id).await {
                // Already published; the entry will be published again once visible
                warn!(
                    task = %task.payload,
                    message_id = %task.message_id,
                    error = %e,
                    "Failed to remove forwarded task from staging"
                );
            }

            if task.receive_count > 1 {
                debug!(
                    task = %task.payload,
                    receive_count = task.receive_count,
                    "Forwarded redelivered staging entry"
                );
            }

            count += 1;
        }

        if count > 0 {
            self.forwarded.fetch_add(count as u64, Ordering::SeqCst);
            debug!(count = count, queue = %self.broker.queue_name(), "Drained staging queue");
        }
        match fault {
            Some(e) => Err(ProjectionError::Queue(e)),
            None => Ok(count),
        }
    }

    /// Drain until `shutdown` flips to true. A full pass is retried immediately, otherwise the
    /// drainer waits for the poll interval. Returns the error that ended a pass early when the
    /// broker connection is lost.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Drainer already running");
            return Ok(());
        }

        info!(
            staging = %self.staging.identifier(),
            broker_queue = %self.broker.queue_name(),
            poll_interval_ms = %self.config.poll_interval.as_millis(),
            batch_size = %self.config.batch_size,
            "Starting staging drainer"
        );

        while !*shutdown.borrow() {
            let drained = match self.drain_once().await {
                Ok(drained) => drained,
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    error!(
                        broker_queue = %self.broker.queue_name(),
                        forwarded = self.forwarded(),
                        error = %e,
                        "Staging drainer lost the broker"
                    );
                    return Err(e);
                }
            };
            if drained >= self.batch_limit() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(forwarded = self.forwarded(), "Staging drainer stopped");
        Ok(())
    }
}
